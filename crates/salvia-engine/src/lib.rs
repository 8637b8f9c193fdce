//! Salvia Engine
//!
//! The execution engine drives a compiled workflow graph to
//! completion over a [`WorkflowState`], one node at a time. Nodes
//! within one execution run strictly sequentially; many executions may
//! run concurrently, each exclusively owning its own state.
//!
//! The engine carries the self-healing layer: engine-level faults are
//! classified into failure patterns and handed to the recovery
//! coordinator, which applies one of four strategies (retry, rollback,
//! skip, fallback). Outcomes feed the tenant's health monitor, and an
//! optional execution-record collaborator receives lifecycle calls for
//! persistence.
//!
//! [`WorkflowState`]: salvia_state::WorkflowState

mod engine;
mod error;
mod records;
mod recovery;

pub use engine::{EngineConfig, WorkflowEngine};
pub use error::EngineError;
pub use records::{ChannelRecorder, ExecutionRecorder, NoopRecorder, RecordError, RecordEvent};
