use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::error::StateError;
use crate::pattern::{FailurePattern, RecoveryStrategy};
use crate::status::{HealthStatus, WorkflowStatus};

fn default_max_retries() -> u32 {
  3
}

fn default_max_recovery_attempts() -> u32 {
  5
}

/// A single entry in the workflow error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
  /// Human-readable error message.
  pub message: String,
  /// Node the error is attributed to, if known.
  pub node: Option<String>,
  /// When the error was recorded.
  pub timestamp: DateTime<Utc>,
  /// Retry count at the time the error occurred.
  pub retry_count: u32,
}

/// The execution state threaded through a single workflow run.
///
/// One instance exists per execution and is exclusively owned by the
/// engine for the duration of the run, then handed to the caller.
/// Every mutation bumps `updated_at`; `completed_at` is set exactly
/// once on the terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
  // Identity. The tenant id is the isolation boundary: state never
  // crosses tenants.
  pub workflow_id: Uuid,
  #[serde(default)]
  pub execution_id: Option<Uuid>,
  pub tenant_id: String,

  // Control.
  #[serde(default)]
  pub current_node: Option<String>,
  #[serde(default)]
  pub status: WorkflowStatus,

  // Payload.
  #[serde(default)]
  pub data: Map<String, Value>,
  /// Read-mostly environment: region, currency, locale.
  #[serde(default)]
  pub context: Map<String, Value>,
  /// Results of sub-task executions, keyed by sub-task id.
  #[serde(default)]
  pub agent_results: Map<String, Value>,

  // Error handling.
  #[serde(default)]
  pub errors: Vec<ErrorEntry>,
  #[serde(default)]
  pub retry_count: u32,
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,

  // Self-healing.
  #[serde(default)]
  pub recovery_attempts: u32,
  #[serde(default = "default_max_recovery_attempts")]
  pub max_recovery_attempts: u32,
  /// Opaque serialized snapshot consumed by the rollback strategy.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_checkpoint: Option<String>,
  #[serde(default)]
  pub health_status: HealthStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failure_pattern: Option<FailurePattern>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub recovery_strategy: Option<RecoveryStrategy>,

  // Accounting. Monotonically increasing, only via `add_cost`.
  #[serde(default)]
  pub total_cost_usd: f64,
  #[serde(default)]
  pub tokens_used: u64,

  // Timestamps.
  #[serde(default = "Utc::now")]
  pub started_at: DateTime<Utc>,
  #[serde(default = "Utc::now")]
  pub updated_at: DateTime<Utc>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
  /// Create a fresh running state for the given workflow and tenant.
  pub fn new(workflow_id: Uuid, tenant_id: impl Into<String>) -> Self {
    let now = Utc::now();
    Self {
      workflow_id,
      execution_id: None,
      tenant_id: tenant_id.into(),
      current_node: None,
      status: WorkflowStatus::Running,
      data: Map::new(),
      context: Map::new(),
      agent_results: Map::new(),
      errors: Vec::new(),
      retry_count: 0,
      max_retries: default_max_retries(),
      recovery_attempts: 0,
      max_recovery_attempts: default_max_recovery_attempts(),
      last_checkpoint: None,
      health_status: HealthStatus::Healthy,
      failure_pattern: None,
      recovery_strategy: None,
      total_cost_usd: 0.0,
      tokens_used: 0,
      started_at: now,
      updated_at: now,
      completed_at: None,
    }
  }

  /// Append an error to the log, attributed to `node` or the current
  /// node, recording the retry count at the time of the error.
  pub fn add_error(&mut self, message: impl Into<String>, node: Option<&str>) {
    self.errors.push(ErrorEntry {
      message: message.into(),
      node: node.map(str::to_string).or_else(|| self.current_node.clone()),
      timestamp: Utc::now(),
      retry_count: self.retry_count,
    });
    self.touch();
  }

  /// Set the node currently being executed.
  pub fn set_current_node(&mut self, node: &str) {
    self.current_node = Some(node.to_string());
    self.touch();
  }

  /// Mark the workflow as completed. `completed_at` is only set on the
  /// first terminal transition.
  pub fn complete(&mut self) {
    self.status = WorkflowStatus::Completed;
    if self.completed_at.is_none() {
      self.completed_at = Some(Utc::now());
    }
    self.touch();
  }

  /// Mark the workflow as failed, recording the error.
  pub fn fail(&mut self, error: impl Into<String>) {
    self.add_error(error, None);
    self.status = WorkflowStatus::Failed;
    if self.completed_at.is_none() {
      self.completed_at = Some(Utc::now());
    }
    self.touch();
  }

  /// Pause a running execution.
  pub fn pause(&mut self) -> Result<(), StateError> {
    if self.status != WorkflowStatus::Running {
      return Err(StateError::InvalidTransition {
        from: self.status.to_string(),
        to: WorkflowStatus::Paused.to_string(),
      });
    }
    self.status = WorkflowStatus::Paused;
    self.touch();
    Ok(())
  }

  /// Resume a paused execution.
  pub fn resume(&mut self) -> Result<(), StateError> {
    if self.status != WorkflowStatus::Paused {
      return Err(StateError::InvalidTransition {
        from: self.status.to_string(),
        to: WorkflowStatus::Running.to_string(),
      });
    }
    self.status = WorkflowStatus::Running;
    self.touch();
    Ok(())
  }

  /// Whether the retry budget allows another attempt.
  pub fn should_retry(&self) -> bool {
    self.retry_count < self.max_retries
  }

  /// Increment the retry counter.
  pub fn increment_retry(&mut self) {
    self.retry_count += 1;
    self.touch();
  }

  /// Whether automatic recovery may be attempted: the recovery budget
  /// is not exhausted and health is not critical.
  pub fn can_recover(&self) -> bool {
    self.recovery_attempts < self.max_recovery_attempts
      && self.health_status != HealthStatus::Critical
  }

  /// Increment the recovery-attempt counter.
  pub fn increment_recovery(&mut self) {
    self.recovery_attempts += 1;
    self.touch();
  }

  /// Set the health status, optionally recording the failure pattern
  /// that led to it.
  pub fn set_health_status(&mut self, status: HealthStatus, pattern: Option<FailurePattern>) {
    self.health_status = status;
    if pattern.is_some() {
      self.failure_pattern = pattern;
    }
    self.touch();
  }

  /// Record the recovery strategy chosen for this execution.
  pub fn set_recovery_strategy(&mut self, strategy: RecoveryStrategy) {
    self.recovery_strategy = Some(strategy);
    self.touch();
  }

  /// Add cost and token usage. Counters only ever increase.
  pub fn add_cost(&mut self, cost_usd: f64, tokens: u64) {
    self.total_cost_usd += cost_usd.max(0.0);
    self.tokens_used += tokens;
    self.touch();
  }

  /// Snapshot the payload map under a label into the opaque checkpoint
  /// slot. The format is private to this type; consumers only test the
  /// checkpoint for presence.
  pub fn create_checkpoint(&mut self, label: &str) -> Result<(), StateError> {
    let snapshot = json!({
      "label": label,
      "current_node": self.current_node,
      "data": self.data,
      "created_at": Utc::now(),
    });
    self.last_checkpoint = Some(serde_json::to_string(&snapshot)?);
    self.touch();
    Ok(())
  }

  /// Region from the execution context, if set.
  pub fn region(&self) -> Option<&str> {
    self.context.get("region").and_then(Value::as_str)
  }

  /// Duration from start to completion, in milliseconds. `None` until
  /// the execution reaches a terminal state.
  pub fn get_duration_ms(&self) -> Option<i64> {
    self
      .completed_at
      .map(|done| (done - self.started_at).num_milliseconds())
  }

  /// Whether this execution must be surfaced for manual intervention:
  /// it failed and automatic recovery is no longer possible.
  pub fn needs_intervention(&self) -> bool {
    self.status == WorkflowStatus::Failed
      && (self.health_status == HealthStatus::Critical
        || self.recovery_attempts >= self.max_recovery_attempts)
  }

  /// Most recent error message, if any.
  pub fn last_error(&self) -> Option<&str> {
    self.errors.last().map(|e| e.message.as_str())
  }

  fn touch(&mut self) {
    self.updated_at = Utc::now();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn test_state() -> WorkflowState {
    WorkflowState::new(Uuid::new_v4(), "tenant-a")
  }

  #[test]
  fn new_state_is_running_and_healthy() {
    let state = test_state();
    assert_eq!(state.status, WorkflowStatus::Running);
    assert_eq!(state.health_status, HealthStatus::Healthy);
    assert!(state.errors.is_empty());
    assert!(state.completed_at.is_none());
  }

  #[test]
  fn add_error_records_node_and_retry_count() {
    let mut state = test_state();
    state.set_current_node("fetch");
    state.increment_retry();
    state.add_error("boom", None);

    let entry = &state.errors[0];
    assert_eq!(entry.message, "boom");
    assert_eq!(entry.node.as_deref(), Some("fetch"));
    assert_eq!(entry.retry_count, 1);
  }

  #[test]
  fn completed_at_is_set_exactly_once() {
    let mut state = test_state();
    state.complete();
    let first = state.completed_at;
    assert!(first.is_some());

    state.complete();
    assert_eq!(state.completed_at, first);
  }

  #[test]
  fn fail_sets_terminal_status_with_error() {
    let mut state = test_state();
    state.fail("connection refused");
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.errors.len(), 1);
    assert!(state.completed_at.is_some());
  }

  #[test]
  fn pause_resume_round_trip() {
    let mut state = test_state();
    state.pause().unwrap();
    assert_eq!(state.status, WorkflowStatus::Paused);
    state.resume().unwrap();
    assert_eq!(state.status, WorkflowStatus::Running);
  }

  #[test]
  fn pause_rejected_on_terminal_state() {
    let mut state = test_state();
    state.complete();
    assert!(state.pause().is_err());
  }

  #[test]
  fn resume_rejected_when_not_paused() {
    let mut state = test_state();
    assert!(state.resume().is_err());
  }

  #[test]
  fn retry_budget_is_bounded() {
    let mut state = test_state();
    for _ in 0..10 {
      if state.should_retry() {
        state.increment_retry();
      }
    }
    assert_eq!(state.retry_count, state.max_retries);
  }

  #[test]
  fn recovery_budget_is_bounded() {
    let mut state = test_state();
    for _ in 0..10 {
      if state.can_recover() {
        state.increment_recovery();
      }
    }
    assert_eq!(state.recovery_attempts, state.max_recovery_attempts);
  }

  #[test]
  fn critical_health_blocks_recovery() {
    let mut state = test_state();
    state.set_health_status(HealthStatus::Critical, None);
    assert!(!state.can_recover());
  }

  #[test]
  fn checkpoint_is_opaque_but_present() {
    let mut state = test_state();
    state.data.insert("step".into(), json!(1));
    state.create_checkpoint("before-risky-step").unwrap();

    let checkpoint = state.last_checkpoint.as_ref().unwrap();
    // Round-trips as plain JSON.
    let parsed: Value = serde_json::from_str(checkpoint).unwrap();
    assert_eq!(parsed["label"], "before-risky-step");
  }

  #[test]
  fn duration_is_non_negative_after_completion() {
    let mut state = test_state();
    assert_eq!(state.get_duration_ms(), None);
    state.complete();
    assert!(state.get_duration_ms().unwrap() >= 0);
  }

  #[test]
  fn cost_counters_are_monotone() {
    let mut state = test_state();
    state.add_cost(0.05, 120);
    state.add_cost(-1.0, 0); // negative cost is ignored
    assert!(state.total_cost_usd >= 0.05);
    assert_eq!(state.tokens_used, 120);
  }

  #[test]
  fn serializes_to_plain_json() {
    let mut state = test_state();
    state.data.insert("answer".into(), json!(42));
    let value = serde_json::to_value(&state).unwrap();
    assert_eq!(value["tenant_id"], "tenant-a");
    assert_eq!(value["status"], "running");
    assert_eq!(value["data"]["answer"], 42);

    let back: WorkflowState = serde_json::from_value(value).unwrap();
    assert_eq!(back.workflow_id, state.workflow_id);
    assert_eq!(back.max_retries, 3);
  }
}
