//! The health monitor and its background assessment loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use salvia_state::{FailurePattern, HealthStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::metrics::{FailureEvent, HealthAlert, HealthMetrics, HealthSummary};

/// Failure events older than this are evicted by the monitor loop.
const EVENT_RETENTION: chrono::Duration = chrono::Duration::hours(24);

/// A recovery-attempted event younger than this marks the workflow as
/// recovering.
const RECOVERING_WINDOW: chrono::Duration = chrono::Duration::minutes(10);

/// Default tick interval for the background assessment loop.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct MonitorInner {
  metrics: HashMap<String, HealthMetrics>,
  events: Vec<FailureEvent>,
}

/// Monitors workflow health for one tenant.
///
/// Cheap to clone; all clones share the same metric and event
/// collections. `record_execution` and `record_recovery_attempt` may
/// be called concurrently from many execution tasks while the
/// background loop reads for assessment.
#[derive(Clone)]
pub struct HealthMonitor {
  tenant_id: String,
  inner: Arc<Mutex<MonitorInner>>,
  alert_tx: Option<mpsc::UnboundedSender<HealthAlert>>,
}

impl HealthMonitor {
  pub fn new(tenant_id: impl Into<String>) -> Self {
    Self {
      tenant_id: tenant_id.into(),
      inner: Arc::new(Mutex::new(MonitorInner::default())),
      alert_tx: None,
    }
  }

  /// Create a monitor whose alerts are also delivered on a channel,
  /// for consumers that want to act on them (dashboards, remediation).
  pub fn with_alerts(
    tenant_id: impl Into<String>,
  ) -> (Self, mpsc::UnboundedReceiver<HealthAlert>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut monitor = Self::new(tenant_id);
    monitor.alert_tx = Some(tx);
    (monitor, rx)
  }

  pub fn tenant_id(&self) -> &str {
    &self.tenant_id
  }

  /// Record the outcome of a workflow execution.
  pub fn record_execution(
    &self,
    workflow_id: &str,
    execution_id: &str,
    success: bool,
    duration_ms: Option<i64>,
    error_message: Option<&str>,
  ) {
    let mut inner = self.inner.lock().expect("health monitor lock poisoned");
    let metrics = inner.metrics.entry(workflow_id.to_string()).or_default();
    metrics.total_executions += 1;

    if success {
      metrics.consecutive_failures = 0;
      metrics.success_rate = 0.9 * metrics.success_rate + 0.1;
      metrics.error_rate = 0.9 * metrics.error_rate;
    } else {
      metrics.consecutive_failures += 1;
      metrics.last_failure_time = Some(Utc::now());
      metrics.success_rate = 0.9 * metrics.success_rate;
      metrics.error_rate = 0.9 * metrics.error_rate + 0.1;
    }

    if let Some(duration) = duration_ms {
      if metrics.average_duration_ms == 0.0 {
        metrics.average_duration_ms = duration as f64;
      } else {
        metrics.average_duration_ms = 0.8 * metrics.average_duration_ms + 0.2 * duration as f64;
      }
    }

    if !success {
      if let Some(error) = error_message {
        // The monitor classifies without execution error history.
        let pattern = FailurePattern::classify(error, 0);
        inner.events.push(FailureEvent {
          timestamp: Utc::now(),
          workflow_id: workflow_id.to_string(),
          execution_id: execution_id.to_string(),
          error_message: error.to_string(),
          failure_pattern: pattern,
          recovery_attempted: false,
          recovery_successful: false,
          duration_ms,
        });
      }
    }
  }

  /// Record a recovery attempt, back-filling the matching pending
  /// failure event.
  pub fn record_recovery_attempt(
    &self,
    workflow_id: &str,
    execution_id: &str,
    success: bool,
    strategy: &str,
  ) {
    let mut inner = self.inner.lock().expect("health monitor lock poisoned");
    let Some(metrics) = inner.metrics.get_mut(workflow_id) else {
      return;
    };

    metrics.total_recoveries += 1;
    let sample = if success { 1.0 } else { 0.0 };
    if metrics.total_recoveries == 1 {
      // First attempt seeds the rate instead of averaging against the
      // optimistic initial value.
      metrics.recovery_success_rate = sample;
    } else {
      metrics.recovery_success_rate = 0.8 * metrics.recovery_success_rate + 0.2 * sample;
    }

    for event in inner.events.iter_mut().rev() {
      if event.workflow_id == workflow_id
        && event.execution_id == execution_id
        && !event.recovery_attempted
      {
        event.recovery_attempted = true;
        event.recovery_successful = success;
        break;
      }
    }

    info!(
      tenant_id = %self.tenant_id,
      workflow_id = %workflow_id,
      strategy = %strategy,
      success,
      "recovery_attempt_recorded"
    );
  }

  /// Current health status and metrics for a workflow, or `None` if it
  /// has never been observed.
  pub fn get_workflow_health(&self, workflow_id: &str) -> Option<(HealthStatus, HealthMetrics)> {
    let inner = self.inner.lock().expect("health monitor lock poisoned");
    let metrics = inner.metrics.get(workflow_id)?;
    let status = assess(workflow_id, metrics, &inner.events);
    Some((status, metrics.clone()))
  }

  /// Failure pattern distribution over retained events, optionally
  /// filtered by workflow.
  pub fn get_failure_patterns(&self, workflow_id: Option<&str>) -> HashMap<FailurePattern, usize> {
    let inner = self.inner.lock().expect("health monitor lock poisoned");
    let mut counts: HashMap<FailurePattern, usize> =
      FailurePattern::all().into_iter().map(|p| (p, 0)).collect();
    for event in &inner.events {
      if workflow_id.is_some_and(|id| id != event.workflow_id) {
        continue;
      }
      *counts.entry(event.failure_pattern).or_default() += 1;
    }
    counts
  }

  /// Whether manual intervention is recommended: critical status, or
  /// repeated failures that recovery is no longer handling.
  pub fn should_trigger_intervention(&self, workflow_id: &str) -> bool {
    let Some((status, metrics)) = self.get_workflow_health(workflow_id) else {
      return false;
    };
    status == HealthStatus::Critical
      || (metrics.consecutive_failures >= 5 && metrics.recovery_success_rate <= 0.3)
  }

  /// Aggregate health over every tracked workflow.
  pub fn get_health_summary(&self) -> HealthSummary {
    let inner = self.inner.lock().expect("health monitor lock poisoned");
    let total_workflows = inner.metrics.len();
    if total_workflows == 0 {
      return HealthSummary {
        total_workflows: 0,
        healthy: 0,
        degraded: 0,
        critical: 0,
        recovering: 0,
        overall_health: None,
        total_failure_events: inner.events.len(),
      };
    }

    let mut healthy = 0;
    let mut degraded = 0;
    let mut critical = 0;
    let mut recovering = 0;
    for (workflow_id, metrics) in &inner.metrics {
      match assess(workflow_id, metrics, &inner.events) {
        HealthStatus::Healthy => healthy += 1,
        HealthStatus::Degraded => degraded += 1,
        HealthStatus::Critical => critical += 1,
        HealthStatus::Recovering => recovering += 1,
      }
    }

    let overall = if critical > 0 {
      HealthStatus::Critical
    } else if degraded * 10 > total_workflows * 3 {
      HealthStatus::Degraded
    } else if recovering > 0 {
      HealthStatus::Recovering
    } else {
      HealthStatus::Healthy
    };

    HealthSummary {
      total_workflows,
      healthy,
      degraded,
      critical,
      recovering,
      overall_health: Some(overall),
      total_failure_events: inner.events.len(),
    }
  }

  /// One assessment sweep: alert on degraded/critical workflows and
  /// evict failure events past the retention window.
  ///
  /// Called by the background loop on every tick; exposed for callers
  /// that want an on-demand check.
  pub fn perform_health_check(&self) {
    let alerts = {
      let mut inner = self.inner.lock().expect("health monitor lock poisoned");

      let cutoff = Utc::now() - EVENT_RETENTION;
      inner.events.retain(|event| event.timestamp > cutoff);

      let mut alerts = Vec::new();
      for (workflow_id, metrics) in &inner.metrics {
        let status = assess(workflow_id, metrics, &inner.events);
        if matches!(status, HealthStatus::Degraded | HealthStatus::Critical) {
          alerts.push(HealthAlert {
            tenant_id: self.tenant_id.clone(),
            workflow_id: workflow_id.clone(),
            health_status: status,
            error_rate: metrics.error_rate,
            consecutive_failures: metrics.consecutive_failures,
            recovery_success_rate: metrics.recovery_success_rate,
            timestamp: Utc::now(),
          });
        }
      }
      alerts
    };

    // Emit outside the lock.
    for alert in alerts {
      warn!(
        tenant_id = %alert.tenant_id,
        workflow_id = %alert.workflow_id,
        health_status = %alert.health_status,
        error_rate = alert.error_rate,
        consecutive_failures = alert.consecutive_failures,
        recovery_success_rate = alert.recovery_success_rate,
        "workflow_health_alert"
      );
      if let Some(tx) = &self.alert_tx {
        // Receiver may have been dropped.
        let _ = tx.send(alert);
      }
    }
  }

  /// Start the background loop at [`DEFAULT_CHECK_INTERVAL`].
  pub fn start_default(&self) -> MonitorTask {
    self.start(DEFAULT_CHECK_INTERVAL)
  }

  /// Start the background assessment loop, checking every `interval`.
  ///
  /// Returns a task handle; call [`MonitorTask::stop`] to cancel the
  /// loop and await its current iteration.
  pub fn start(&self, interval: Duration) -> MonitorTask {
    let monitor = self.clone();
    let cancel = CancellationToken::new();
    let loop_cancel = cancel.clone();

    info!(tenant_id = %self.tenant_id, interval_secs = interval.as_secs(), "health monitor started");

    let handle = tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = loop_cancel.cancelled() => {
            info!(tenant_id = %monitor.tenant_id, "health monitor stopped");
            break;
          }
          _ = tokio::time::sleep(interval) => {
            monitor.perform_health_check();
          }
        }
      }
    });

    MonitorTask { cancel, handle }
  }
}

/// Handle to a running monitor loop.
pub struct MonitorTask {
  cancel: CancellationToken,
  handle: JoinHandle<()>,
}

impl MonitorTask {
  /// Cancel the loop and wait for its current iteration to finish.
  pub async fn stop(self) {
    self.cancel.cancel();
    let _ = self.handle.await;
  }
}

/// Assess a workflow's health from its metrics and recent events.
fn assess(workflow_id: &str, metrics: &HealthMetrics, events: &[FailureEvent]) -> HealthStatus {
  if metrics.consecutive_failures >= 5
    || metrics.error_rate >= 0.8
    || metrics.recovery_success_rate <= 0.2
  {
    return HealthStatus::Critical;
  }

  if metrics.error_rate >= 0.2
    || metrics.recovery_success_rate <= 0.5
    || metrics.consecutive_failures >= 3
  {
    return HealthStatus::Degraded;
  }

  let recovering_cutoff = Utc::now() - RECOVERING_WINDOW;
  let recently_recovering = events.iter().any(|event| {
    event.workflow_id == workflow_id
      && event.timestamp > recovering_cutoff
      && event.recovery_attempted
  });
  if recently_recovering {
    return HealthStatus::Recovering;
  }

  HealthStatus::Healthy
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ema_math_matches_weights() {
    let monitor = HealthMonitor::new("tenant-a");
    monitor.record_execution("wf", "e1", true, Some(100), None);

    let (_, metrics) = monitor.get_workflow_health("wf").unwrap();
    // One success from a fresh metric keeps success_rate at 1.0.
    assert!((metrics.success_rate - 1.0).abs() < 1e-9);

    monitor.record_execution("wf", "e2", false, None, Some("boom"));
    let (_, metrics) = monitor.get_workflow_health("wf").unwrap();
    assert!((metrics.success_rate - 0.9).abs() < 1e-9);
    assert!((metrics.error_rate - 0.1).abs() < 1e-9);
  }

  #[test]
  fn duration_average_seeds_then_averages() {
    let monitor = HealthMonitor::new("tenant-a");
    monitor.record_execution("wf", "e1", true, Some(1000), None);
    monitor.record_execution("wf", "e2", true, Some(500), None);

    let (_, metrics) = monitor.get_workflow_health("wf").unwrap();
    assert!((metrics.average_duration_ms - (0.8 * 1000.0 + 0.2 * 500.0)).abs() < 1e-9);
  }

  #[test]
  fn three_consecutive_failures_degrade_health() {
    let monitor = HealthMonitor::new("tenant-a");
    for i in 0..3 {
      monitor.record_execution("wf", &format!("e{i}"), false, None, Some("connection timeout"));
    }

    let (status, metrics) = monitor.get_workflow_health("wf").unwrap();
    assert_eq!(metrics.consecutive_failures, 3);
    assert_eq!(status, HealthStatus::Degraded);
    assert!(!monitor.should_trigger_intervention("wf"));
  }

  #[test]
  fn five_consecutive_failures_are_critical_and_trigger_intervention() {
    let monitor = HealthMonitor::new("tenant-a");
    for i in 0..5 {
      monitor.record_execution("wf", &format!("e{i}"), false, None, Some("connection timeout"));
      monitor.record_recovery_attempt("wf", &format!("e{i}"), false, "retry");
    }

    let (status, metrics) = monitor.get_workflow_health("wf").unwrap();
    assert_eq!(metrics.consecutive_failures, 5);
    assert_eq!(status, HealthStatus::Critical);
    assert!(metrics.recovery_success_rate <= 0.3);
    assert!(monitor.should_trigger_intervention("wf"));
  }

  #[test]
  fn success_resets_consecutive_failures() {
    let monitor = HealthMonitor::new("tenant-a");
    monitor.record_execution("wf", "e1", false, None, Some("boom"));
    monitor.record_execution("wf", "e2", false, None, Some("boom"));
    monitor.record_execution("wf", "e3", true, Some(50), None);

    let (_, metrics) = monitor.get_workflow_health("wf").unwrap();
    assert_eq!(metrics.consecutive_failures, 0);
  }

  #[test]
  fn recovery_attempt_backfills_latest_pending_event() {
    let monitor = HealthMonitor::new("tenant-a");
    monitor.record_execution("wf", "e1", false, None, Some("disk full"));
    monitor.record_recovery_attempt("wf", "e1", true, "rollback");

    // The workflow should now assess as recovering: a recent event
    // with recovery attempted and nothing else wrong.
    let (status, _) = monitor.get_workflow_health("wf").unwrap();
    assert_eq!(status, HealthStatus::Recovering);

    let patterns = monitor.get_failure_patterns(Some("wf"));
    assert_eq!(patterns[&FailurePattern::Resource], 1);
  }

  #[test]
  fn recovery_rate_seeds_on_first_attempt() {
    let monitor = HealthMonitor::new("tenant-a");
    monitor.record_execution("wf", "e1", false, None, Some("boom"));
    monitor.record_recovery_attempt("wf", "e1", false, "retry");

    let (_, metrics) = monitor.get_workflow_health("wf").unwrap();
    assert!((metrics.recovery_success_rate - 0.0).abs() < 1e-9);

    monitor.record_execution("wf", "e2", false, None, Some("boom"));
    monitor.record_recovery_attempt("wf", "e2", true, "retry");
    let (_, metrics) = monitor.get_workflow_health("wf").unwrap();
    assert!((metrics.recovery_success_rate - 0.2).abs() < 1e-9);
  }

  #[test]
  fn recovery_attempt_for_unknown_workflow_is_ignored() {
    let monitor = HealthMonitor::new("tenant-a");
    monitor.record_recovery_attempt("ghost", "e1", true, "retry");
    assert!(monitor.get_workflow_health("ghost").is_none());
  }

  #[test]
  fn summary_counts_statuses() {
    let monitor = HealthMonitor::new("tenant-a");
    monitor.record_execution("ok", "e1", true, Some(10), None);
    for i in 0..5 {
      monitor.record_execution("bad", &format!("e{i}"), false, None, Some("boom"));
    }

    let summary = monitor.get_health_summary();
    assert_eq!(summary.total_workflows, 2);
    assert_eq!(summary.healthy, 1);
    assert_eq!(summary.critical, 1);
    assert_eq!(summary.overall_health, Some(HealthStatus::Critical));
  }

  #[test]
  fn empty_summary_has_no_overall_health() {
    let monitor = HealthMonitor::new("tenant-a");
    let summary = monitor.get_health_summary();
    assert_eq!(summary.total_workflows, 0);
    assert_eq!(summary.overall_health, None);
  }
}
