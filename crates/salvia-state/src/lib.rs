//! Salvia State
//!
//! This crate provides the execution state carried through a workflow
//! graph. The state is exclusively owned by one execution for the
//! duration of a run: nodes receive it, mutate it, and hand it back.
//!
//! Everything on the state is plain structured data (maps, lists,
//! scalars, timestamps-as-strings) so that checkpoints and execution
//! records can serialize it without custom encoders.

mod error;
mod pattern;
mod state;
mod status;

pub use error::StateError;
pub use pattern::{FailurePattern, RecoveryStrategy};
pub use state::{ErrorEntry, WorkflowState};
pub use status::{HealthStatus, WorkflowStatus};
