use std::collections::HashMap;
use std::sync::Arc;

use salvia_node::WorkflowNode;
use salvia_state::WorkflowState;
use tracing::{debug, info};

use crate::error::GraphError;
use crate::graph::{ConditionalEdge, EdgePredicate, Graph};

/// Mutable registry of nodes and edges, compiled into immutable
/// [`Graph`] snapshots.
///
/// The registry itself is a build-time object: registrations
/// accumulate, then `compile` locks them under a workflow name.
/// Compiling again under the same name atomically replaces the stored
/// graph; executions holding the old `Arc` run to completion on the
/// old snapshot.
#[derive(Default)]
pub struct GraphRegistry {
  nodes: HashMap<String, Arc<dyn WorkflowNode>>,
  edges: HashMap<String, Vec<String>>,
  conditional: HashMap<String, ConditionalEdge>,
  graphs: HashMap<String, Arc<Graph>>,
}

impl GraphRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a node under a name. Re-registering a name replaces the
  /// node for future compiles only.
  pub fn register(&mut self, name: impl Into<String>, node: Arc<dyn WorkflowNode>) {
    let name = name.into();
    debug!(node = %name, "registered node");
    self.nodes.insert(name, node);
  }

  /// Add an unconditional edge.
  pub fn connect(&mut self, from: impl Into<String>, to: impl Into<String>) {
    let (from, to) = (from.into(), to.into());
    debug!(from = %from, to = %to, "added edge");
    self.edges.entry(from).or_default().push(to);
  }

  /// Add a conditional edge: the predicate maps a state to a label,
  /// looked up in `branches` to find the next node.
  pub fn connect_conditional(
    &mut self,
    from: impl Into<String>,
    predicate: EdgePredicate,
    branches: HashMap<String, String>,
  ) {
    let from = from.into();
    debug!(from = %from, branches = branches.len(), "added conditional edge");
    self
      .conditional
      .insert(from, ConditionalEdge { predicate, branches });
  }

  /// Convenience wrapper over [`connect_conditional`] taking a plain
  /// closure.
  ///
  /// [`connect_conditional`]: Self::connect_conditional
  pub fn connect_when(
    &mut self,
    from: impl Into<String>,
    predicate: impl Fn(&WorkflowState) -> String + Send + Sync + 'static,
    branches: HashMap<String, String>,
  ) {
    self.connect_conditional(from, Arc::new(predicate), branches);
  }

  /// Snapshot the current registrations into an immutable graph and
  /// store it under `workflow_name`.
  ///
  /// The node named `start` becomes the entry node. All edge endpoints
  /// and conditional branch targets must reference registered nodes.
  pub fn compile(&mut self, workflow_name: impl Into<String>) -> Result<Arc<Graph>, GraphError> {
    let workflow_name = workflow_name.into();

    if self.nodes.is_empty() {
      return Err(GraphError::EmptyGraph);
    }
    if !self.nodes.contains_key("start") {
      return Err(GraphError::NoEntryNode);
    }

    self.validate_edges()?;

    // Copy-on-compile: rebuild the maps into the snapshot so later
    // registrations never touch a compiled graph.
    let graph = Arc::new(Graph::new(
      workflow_name.clone(),
      self.nodes.clone(),
      self.edges.clone(),
      self.conditional.clone(),
      "start".to_string(),
    ));

    info!(
      workflow = %workflow_name,
      nodes = graph.node_count(),
      "compiled workflow graph"
    );

    self.graphs.insert(workflow_name, Arc::clone(&graph));
    Ok(graph)
  }

  /// Get a compiled graph by workflow name.
  pub fn graph(&self, workflow_name: &str) -> Option<Arc<Graph>> {
    self.graphs.get(workflow_name).cloned()
  }

  /// Drop all registrations (compiled graphs are kept).
  pub fn clear(&mut self) {
    self.nodes.clear();
    self.edges.clear();
    self.conditional.clear();
  }

  fn validate_edges(&self) -> Result<(), GraphError> {
    for (from, targets) in &self.edges {
      if !self.nodes.contains_key(from) {
        return Err(GraphError::InvalidEdge {
          from: from.clone(),
          to: targets.first().cloned().unwrap_or_default(),
        });
      }
      for to in targets {
        if !self.nodes.contains_key(to) {
          return Err(GraphError::InvalidEdge {
            from: from.clone(),
            to: to.clone(),
          });
        }
      }
    }

    for (from, edge) in &self.conditional {
      if !self.nodes.contains_key(from) {
        return Err(GraphError::InvalidEdge {
          from: from.clone(),
          to: String::new(),
        });
      }
      for (label, to) in &edge.branches {
        if !self.nodes.contains_key(to) {
          return Err(GraphError::InvalidBranch {
            from: from.clone(),
            label: label.clone(),
            to: to.clone(),
          });
        }
      }
    }

    Ok(())
  }
}
