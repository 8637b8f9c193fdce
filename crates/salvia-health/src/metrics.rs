use chrono::{DateTime, Utc};
use salvia_state::{FailurePattern, HealthStatus};
use serde::{Deserialize, Serialize};

/// Rolling health metrics for one workflow.
///
/// Rates are exponentially-weighted moving averages: execution
/// success/error rates weight 0.9 old / 0.1 new, recovery success and
/// average duration weight 0.8 / 0.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetrics {
  pub success_rate: f64,
  pub error_rate: f64,
  pub recovery_success_rate: f64,
  pub average_duration_ms: f64,
  pub consecutive_failures: u32,
  pub total_executions: u64,
  pub total_recoveries: u64,
  pub last_failure_time: Option<DateTime<Utc>>,
}

impl Default for HealthMetrics {
  fn default() -> Self {
    Self {
      success_rate: 1.0,
      error_rate: 0.0,
      recovery_success_rate: 1.0,
      average_duration_ms: 0.0,
      consecutive_failures: 0,
      total_executions: 0,
      total_recoveries: 0,
      last_failure_time: None,
    }
  }
}

/// Immutable record of a workflow failure, retained for a rolling
/// 24-hour window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureEvent {
  pub timestamp: DateTime<Utc>,
  pub workflow_id: String,
  pub execution_id: String,
  pub error_message: String,
  pub failure_pattern: FailurePattern,
  pub recovery_attempted: bool,
  pub recovery_successful: bool,
  pub duration_ms: Option<i64>,
}

/// Alert emitted when a workflow is assessed degraded or critical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthAlert {
  pub tenant_id: String,
  pub workflow_id: String,
  pub health_status: HealthStatus,
  pub error_rate: f64,
  pub consecutive_failures: u32,
  pub recovery_success_rate: f64,
  pub timestamp: DateTime<Utc>,
}

/// Aggregate health across all workflows tracked by one monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
  pub total_workflows: usize,
  pub healthy: usize,
  pub degraded: usize,
  pub critical: usize,
  pub recovering: usize,
  /// None when no workflow has been observed yet.
  pub overall_health: Option<HealthStatus>,
  pub total_failure_events: usize,
}
