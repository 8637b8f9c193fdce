use salvia_workflow::GraphError;
use thiserror::Error;

/// Engine-level faults: errors escaping the step machinery itself, as
/// opposed to node errors recorded in-state. These are routed to the
/// recovery coordinator before the run is given up on.
#[derive(Debug, Error)]
pub enum EngineError {
  #[error("workflow not found: {0}")]
  WorkflowNotFound(String),

  #[error("node '{node}' not present in compiled graph")]
  NodeNotFound { node: String },

  #[error("unknown branch label '{label}' from node '{node}'")]
  UnknownBranch { node: String, label: String },

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  State(#[from] salvia_state::StateError),
}
