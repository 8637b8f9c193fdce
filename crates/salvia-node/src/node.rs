//! The node contract and its execution wrapper.

use async_trait::async_trait;
use salvia_state::WorkflowState;
use tracing::{debug, error};

use crate::config::NodeConfig;
use crate::error::NodeError;

/// A unit of work in a workflow graph.
///
/// Implementations provide a configuration (the node's contract) and a
/// body. The body may perform blocking or async I/O; the engine treats
/// it as an opaque suspension point.
#[async_trait]
pub trait WorkflowNode: Send + Sync {
  /// The node's immutable contract.
  fn config(&self) -> &NodeConfig;

  /// The node body. Errors returned here are recorded on the state by
  /// [`execute`]; they never reach the engine.
  async fn run(&self, state: &mut WorkflowState) -> Result<(), NodeError>;
}

/// Run a node through its three-phase lifecycle: validate, execute,
/// finalize.
///
/// Validation checks the required-input and region contract; a failing
/// check appends an error and skips the body. Body errors are
/// converted into error-log entries. `updated_at` is stamped whether
/// the node succeeds or fails. Returns `true` when the node ran
/// without appending errors.
pub async fn execute(node: &dyn WorkflowNode, state: &mut WorkflowState) -> bool {
  let config = node.config();
  state.set_current_node(&config.name);

  if !validate(config, state) {
    return false;
  }

  debug!(node = %config.name, "node_started");
  let ok = match node.run(state).await {
    Ok(()) => {
      debug!(node = %config.name, "node_completed");
      true
    }
    Err(err) => {
      error!(node = %config.name, error = %err, "node_failed");
      state.add_error(format!("execution error in {}: {err}", config.name), None);
      false
    }
  };

  // Finalize: stamp updated_at on success and failure alike.
  state.updated_at = chrono::Utc::now();
  ok
}

/// Check the node's input and region contract against the state.
///
/// A missing required key or a disallowed region appends an error and
/// returns false without running the body. An absent region passes a
/// region-restricted node: restriction only rejects explicit
/// mismatches.
fn validate(config: &NodeConfig, state: &mut WorkflowState) -> bool {
  for required in &config.required_inputs {
    if !state.data.contains_key(required) {
      state.add_error(
        format!(
          "input validation failed for node {}: missing required input '{required}'",
          config.name
        ),
        None,
      );
      return false;
    }
  }

  if config.region_specific {
    if let Some(region) = state.region() {
      if !config.supported_regions.iter().any(|r| r == region) {
        state.add_error(
          format!(
            "region validation failed for node {}: region '{region}' not supported",
            config.name
          ),
          None,
        );
        return false;
      }
    }
  }

  true
}
