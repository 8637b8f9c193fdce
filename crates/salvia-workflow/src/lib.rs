//! Salvia Workflow
//!
//! This crate provides the graph registry and the compiled graph it
//! produces. A compiled [`Graph`] is the locked form of a set of
//! registrations: nodes, unconditional edges, and conditional edges
//! snapshotted into an immutable structure with one designated entry
//! node, ready for the execution engine.
//!
//! Compilation is copy-on-compile: the registry's maps are rebuilt
//! into the snapshot, never shared mutably, so concurrent executions
//! on an old graph are unaffected by re-registration and re-compile.

mod error;
mod graph;
mod registry;

pub use error::GraphError;
pub use graph::{ConditionalEdge, EdgePredicate, Graph};
pub use registry::GraphRegistry;
