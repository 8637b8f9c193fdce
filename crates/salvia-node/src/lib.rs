//! Salvia Node
//!
//! A node is a named unit of work with a typed contract: required
//! input keys, declared output keys, and an optional region
//! restriction. Nodes run over a mutable [`WorkflowState`] and report
//! failures into the state's error log instead of propagating them,
//! so a node can never abort the surrounding graph run by erroring -
//! only by reporting.
//!
//! [`WorkflowState`]: salvia_state::WorkflowState

mod builtin;
mod config;
mod error;
mod node;

pub use builtin::{AgentHandler, AgentNode, AgentOutcome, EndNode, FnNode, NodeBody, StartNode};
pub use config::NodeConfig;
pub use error::NodeError;
pub use node::{WorkflowNode, execute};
