use std::collections::HashMap;
use std::sync::Arc;

use salvia_node::WorkflowNode;
use salvia_state::WorkflowState;

/// Predicate mapping a state to a discrete branch label.
pub type EdgePredicate = Arc<dyn Fn(&WorkflowState) -> String + Send + Sync>;

/// A conditional edge: the predicate's label is looked up in the
/// branch map to find the next node name.
#[derive(Clone)]
pub struct ConditionalEdge {
  pub predicate: EdgePredicate,
  pub branches: HashMap<String, String>,
}

/// A compiled, immutable workflow graph.
///
/// Produced by [`GraphRegistry::compile`]; read-only afterwards and
/// safe to share across concurrent executions via `Arc`.
///
/// [`GraphRegistry::compile`]: crate::GraphRegistry::compile
pub struct Graph {
  name: String,
  nodes: HashMap<String, Arc<dyn WorkflowNode>>,
  edges: HashMap<String, Vec<String>>,
  conditional: HashMap<String, ConditionalEdge>,
  entry: String,
}

impl Graph {
  pub(crate) fn new(
    name: String,
    nodes: HashMap<String, Arc<dyn WorkflowNode>>,
    edges: HashMap<String, Vec<String>>,
    conditional: HashMap<String, ConditionalEdge>,
    entry: String,
  ) -> Self {
    Self {
      name,
      nodes,
      edges,
      conditional,
      entry,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// The designated entry node name.
  pub fn entry(&self) -> &str {
    &self.entry
  }

  /// Look up a node by name.
  pub fn node(&self, name: &str) -> Option<&Arc<dyn WorkflowNode>> {
    self.nodes.get(name)
  }

  /// The single unconditional successor of a node, if any.
  pub fn next(&self, from: &str) -> Option<&str> {
    self
      .edges
      .get(from)
      .and_then(|targets| targets.first())
      .map(String::as_str)
  }

  /// The conditional edge registered for a node, if any. Conditional
  /// edges take priority over unconditional ones during execution.
  pub fn conditional(&self, from: &str) -> Option<&ConditionalEdge> {
    self.conditional.get(from)
  }

  pub fn node_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn node_names(&self) -> impl Iterator<Item = &str> {
    self.nodes.keys().map(String::as_str)
  }
}
