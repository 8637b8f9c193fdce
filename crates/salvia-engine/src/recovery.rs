//! Recovery coordinator.
//!
//! When a run fails with an engine-level fault, the fault is
//! classified into a failure pattern and one of four strategies is
//! applied. A strategy either produces a usable final state or gives
//! up; it never recurses back into recovery.

use salvia_state::{FailurePattern, HealthStatus, RecoveryStrategy, StateError, WorkflowState};
use salvia_workflow::Graph;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::engine::WorkflowEngine;
use crate::records::ExecutionRecorder;

/// Try to recover a failed execution. Returns the recovered final
/// state, or `None` when recovery is not possible or did not work.
///
/// The recovery-attempt counter on `state` is incremented whenever a
/// strategy actually ran, so the caller can tell an attempted-and-
/// failed recovery from one that was never tried.
pub(crate) async fn attempt_recovery<R: ExecutionRecorder>(
  engine: &WorkflowEngine<R>,
  graph: &Graph,
  state: &mut WorkflowState,
  error_text: &str,
) -> Option<WorkflowState> {
  if !state.can_recover() {
    warn!(
      workflow_id = %state.workflow_id,
      recovery_attempts = state.recovery_attempts,
      health_status = %state.health_status,
      "recovery not attempted"
    );
    return None;
  }

  let pattern = FailurePattern::classify(error_text, state.errors.len());
  let strategy = select_strategy(pattern, state);

  info!(
    workflow_id = %state.workflow_id,
    failure_pattern = %pattern,
    strategy = %strategy,
    "recovery_started"
  );

  state.set_health_status(HealthStatus::Recovering, Some(pattern));
  state.set_recovery_strategy(strategy);
  state.increment_recovery();

  let outcome = match strategy {
    RecoveryStrategy::Retry => retry(engine, graph, state).await,
    RecoveryStrategy::Rollback => rollback(state),
    RecoveryStrategy::Skip => skip(state),
    RecoveryStrategy::Fallback => fallback(state),
  };

  match outcome {
    Ok(recovered) => recovered,
    Err(err) => {
      warn!(workflow_id = %state.workflow_id, error = %err, "recovery_strategy_failed");
      state.set_health_status(HealthStatus::Critical, None);
      None
    }
  }
}

/// Map a failure pattern to the strategy to apply, given what the
/// state has to work with.
fn select_strategy(pattern: FailurePattern, state: &WorkflowState) -> RecoveryStrategy {
  match pattern {
    FailurePattern::Transient => {
      if state.should_retry() {
        RecoveryStrategy::Retry
      } else {
        RecoveryStrategy::Fallback
      }
    }
    FailurePattern::Resource => {
      if state.last_checkpoint.is_some() {
        RecoveryStrategy::Rollback
      } else {
        RecoveryStrategy::Skip
      }
    }
    FailurePattern::Persistent => RecoveryStrategy::Skip,
    FailurePattern::Cascading => RecoveryStrategy::Fallback,
  }
}

/// Re-run the whole graph on a copy of the state after a backoff
/// delay. A second fault ends the attempt; it is not re-recovered.
async fn retry<R: ExecutionRecorder>(
  engine: &WorkflowEngine<R>,
  graph: &Graph,
  state: &WorkflowState,
) -> Result<Option<WorkflowState>, StateError> {
  let mut attempt = state.clone();
  attempt.increment_retry();
  attempt.create_checkpoint(&format!("retry_attempt_{}", attempt.retry_count))?;

  tokio::time::sleep(engine.backoff(state.retry_count)).await;

  match engine.run_graph(graph, &mut attempt, None).await {
    Ok(()) => {
      attempt.set_health_status(HealthStatus::Healthy, None);
      Ok(Some(attempt))
    }
    Err(err) => {
      warn!(workflow_id = %state.workflow_id, error = %err, "retry recovery failed");
      Ok(None)
    }
  }
}

/// Roll back to the last checkpoint: drop the newest error and close
/// the run as completed on the checkpointed payload.
fn rollback(state: &mut WorkflowState) -> Result<Option<WorkflowState>, StateError> {
  if state.last_checkpoint.is_none() {
    warn!(workflow_id = %state.workflow_id, "no checkpoint to roll back to");
    return Ok(None);
  }

  state.errors.pop();
  state.set_health_status(HealthStatus::Healthy, None);
  state.complete();
  Ok(Some(state.clone()))
}

/// Skip the failed node: record the skip, checkpoint, and close the
/// run degraded but completed.
fn skip(state: &mut WorkflowState) -> Result<Option<WorkflowState>, StateError> {
  let node = state
    .current_node
    .clone()
    .unwrap_or_else(|| "unknown".to_string());
  state.add_error(format!("skipped node: {node}"), Some(node.as_str()));
  state.create_checkpoint("skip_recovery")?;
  state.set_health_status(HealthStatus::Degraded, None);
  state.complete();
  Ok(Some(state.clone()))
}

/// Close the run in fallback mode: the payload is preserved under
/// `original_data` and `fallback_mode` is flagged for the caller.
fn fallback(state: &mut WorkflowState) -> Result<Option<WorkflowState>, StateError> {
  let original = Value::Object(state.data.clone());
  state.data.insert("original_data".into(), original);
  state.data.insert("fallback_mode".into(), json!(true));
  state.create_checkpoint("fallback")?;
  state.set_health_status(HealthStatus::Degraded, None);
  state.complete();
  Ok(Some(state.clone()))
}
