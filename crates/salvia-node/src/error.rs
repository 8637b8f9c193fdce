use thiserror::Error;

/// Error reported by a node body.
///
/// Node errors never cross the node boundary: the execution wrapper
/// converts them into entries on the state's error log.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct NodeError {
  message: String,
}

impl NodeError {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

impl From<serde_json::Error> for NodeError {
  fn from(err: serde_json::Error) -> Self {
    Self::new(format!("serialization error: {err}"))
  }
}
