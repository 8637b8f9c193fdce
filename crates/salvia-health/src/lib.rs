//! Salvia Health
//!
//! Per-tenant health monitoring for workflow executions. Execution
//! tasks report outcomes into the monitor concurrently; a cancellable
//! background loop periodically assesses every tracked workflow,
//! emits alerts for degraded or critical ones, and evicts failure
//! events older than the retention window.
//!
//! The monitor is the only state shared across executions, so its
//! metric and event collections sit behind a mutex. Each tenant owns
//! its own monitor instance; nothing here is global.

mod metrics;
mod monitor;

pub use metrics::{FailureEvent, HealthAlert, HealthMetrics, HealthSummary};
pub use monitor::{DEFAULT_CHECK_INTERVAL, HealthMonitor, MonitorTask};
