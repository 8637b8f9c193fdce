use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a workflow execution.
///
/// Transitions are monotone toward `Completed` or `Failed`, except
/// through the explicit pause/resume pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
  #[default]
  Running,
  Completed,
  Failed,
  Paused,
}

impl WorkflowStatus {
  /// Whether this status is terminal (no further execution).
  pub fn is_terminal(&self) -> bool {
    matches!(self, WorkflowStatus::Completed | WorkflowStatus::Failed)
  }
}

impl fmt::Display for WorkflowStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkflowStatus::Running => "running",
      WorkflowStatus::Completed => "completed",
      WorkflowStatus::Failed => "failed",
      WorkflowStatus::Paused => "paused",
    };
    f.write_str(s)
  }
}

/// Aggregate health judgment of a workflow's recent execution history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
  #[default]
  Healthy,
  Degraded,
  Recovering,
  Critical,
}

impl fmt::Display for HealthStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      HealthStatus::Healthy => "healthy",
      HealthStatus::Degraded => "degraded",
      HealthStatus::Recovering => "recovering",
      HealthStatus::Critical => "critical",
    };
    f.write_str(s)
  }
}
