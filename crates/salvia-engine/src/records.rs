//! Execution-record collaborator.
//!
//! Persistence lives outside this crate: the engine only calls a
//! recorder at run start, after each step, and at the terminal
//! transition. With the default [`NoopRecorder`] the engine runs in
//! no-persistence mode; recorder failures are logged and never fail a
//! run.

use async_trait::async_trait;
use salvia_state::WorkflowStatus;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Error from an execution-record collaborator.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RecordError {
  message: String,
}

impl RecordError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// Collaborator that persists execution records.
#[async_trait]
pub trait ExecutionRecorder: Send + Sync {
  /// Create a record for a new execution; returns the record id the
  /// engine passes to the other calls.
  async fn create(
    &self,
    workflow_id: Uuid,
    trigger: &str,
    input: &Map<String, Value>,
  ) -> Result<String, RecordError>;

  /// Update the record after an intermediate step.
  async fn update(
    &self,
    record_id: &str,
    status: WorkflowStatus,
    output: &Map<String, Value>,
    error: Option<&str>,
  ) -> Result<(), RecordError>;

  /// Mark the record completed.
  async fn complete(
    &self,
    record_id: &str,
    output: &Map<String, Value>,
    duration_ms: i64,
  ) -> Result<(), RecordError>;

  /// Mark the record failed.
  async fn fail(&self, record_id: &str, error_message: &str) -> Result<(), RecordError>;
}

/// Recorder that discards everything: the no-persistence mode.
#[derive(Debug, Clone, Default)]
pub struct NoopRecorder;

#[async_trait]
impl ExecutionRecorder for NoopRecorder {
  async fn create(
    &self,
    _workflow_id: Uuid,
    _trigger: &str,
    _input: &Map<String, Value>,
  ) -> Result<String, RecordError> {
    Ok(Uuid::new_v4().to_string())
  }

  async fn update(
    &self,
    _record_id: &str,
    _status: WorkflowStatus,
    _output: &Map<String, Value>,
    _error: Option<&str>,
  ) -> Result<(), RecordError> {
    Ok(())
  }

  async fn complete(
    &self,
    _record_id: &str,
    _output: &Map<String, Value>,
    _duration_ms: i64,
  ) -> Result<(), RecordError> {
    Ok(())
  }

  async fn fail(&self, _record_id: &str, _error_message: &str) -> Result<(), RecordError> {
    Ok(())
  }
}

/// Record lifecycle events, for channel-backed consumers.
#[derive(Debug, Clone)]
pub enum RecordEvent {
  Created {
    record_id: String,
    workflow_id: Uuid,
    trigger: String,
  },
  Updated {
    record_id: String,
    status: WorkflowStatus,
    error: Option<String>,
  },
  Completed {
    record_id: String,
    duration_ms: i64,
  },
  Failed {
    record_id: String,
    error_message: String,
  },
}

/// Recorder that forwards record events to an unbounded channel.
///
/// Use this when persistence happens asynchronously (a writer task
/// draining the channel into a database, for instance). Unbounded so a
/// slow consumer never blocks the engine; record volume is one event
/// per node step.
#[derive(Debug, Clone)]
pub struct ChannelRecorder {
  sender: mpsc::UnboundedSender<RecordEvent>,
}

impl ChannelRecorder {
  pub fn new(sender: mpsc::UnboundedSender<RecordEvent>) -> Self {
    Self { sender }
  }

  fn send(&self, event: RecordEvent) {
    // Receiver may have been dropped.
    let _ = self.sender.send(event);
  }
}

#[async_trait]
impl ExecutionRecorder for ChannelRecorder {
  async fn create(
    &self,
    workflow_id: Uuid,
    trigger: &str,
    _input: &Map<String, Value>,
  ) -> Result<String, RecordError> {
    let record_id = Uuid::new_v4().to_string();
    self.send(RecordEvent::Created {
      record_id: record_id.clone(),
      workflow_id,
      trigger: trigger.to_string(),
    });
    Ok(record_id)
  }

  async fn update(
    &self,
    record_id: &str,
    status: WorkflowStatus,
    _output: &Map<String, Value>,
    error: Option<&str>,
  ) -> Result<(), RecordError> {
    self.send(RecordEvent::Updated {
      record_id: record_id.to_string(),
      status,
      error: error.map(str::to_string),
    });
    Ok(())
  }

  async fn complete(
    &self,
    record_id: &str,
    _output: &Map<String, Value>,
    duration_ms: i64,
  ) -> Result<(), RecordError> {
    self.send(RecordEvent::Completed {
      record_id: record_id.to_string(),
      duration_ms,
    });
    Ok(())
  }

  async fn fail(&self, record_id: &str, error_message: &str) -> Result<(), RecordError> {
    self.send(RecordEvent::Failed {
      record_id: record_id.to_string(),
      error_message: error_message.to_string(),
    });
    Ok(())
  }
}
