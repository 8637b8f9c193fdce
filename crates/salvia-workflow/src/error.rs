use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("no nodes registered")]
  EmptyGraph,

  #[error("no entry node: register a node named 'start'")]
  NoEntryNode,

  #[error("edge references unknown node: from={from}, to={to}")]
  InvalidEdge { from: String, to: String },

  #[error("conditional branch '{label}' from node '{from}' references unknown node '{to}'")]
  InvalidBranch {
    from: String,
    label: String,
    to: String,
  },
}
