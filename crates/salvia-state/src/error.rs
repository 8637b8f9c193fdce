use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
  #[error("invalid status transition: {from} -> {to}")]
  InvalidTransition { from: String, to: String },

  #[error("failed to serialize checkpoint: {0}")]
  CheckpointSerialization(#[from] serde_json::Error),
}
