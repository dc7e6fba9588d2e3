//! Agent graphs: nodes connected by conditional, transforming edges
//!
//! This module provides:
//! - [`GraphBuilder`]: typed construction with build-time validation
//! - [`EdgeSpec`]: condition/transform chains with first-match routing
//! - [`Subgraph`]: a nested graph with its own tool scope, used as a node
//! - [`Strategy`]: the root graph an agent runs
//!
//! # Routing
//!
//! Execution starts at the start marker and follows, after every node, the
//! first outgoing edge (in declaration order) whose chain accepts the
//! node's output. Reaching the finish marker ends the graph with the value
//! that reached it. When no edge accepts an output the run fails with
//! [`EngineError::Routing`](crate::EngineError::Routing).

mod builder;
mod edge;
mod executor;
mod subgraph;
pub mod validation;

pub use builder::{GraphBuilder, NodeHandle};
pub use edge::EdgeSpec;
pub use subgraph::{Strategy, Subgraph};
pub use validation::GraphValidationError;

/// Name of every graph's start marker
pub const START_NODE: &str = "__start__";
/// Name of every graph's finish marker
pub const FINISH_NODE: &str = "__finish__";

pub(crate) const START: usize = 0;
pub(crate) const FINISH: usize = 1;

#[cfg(test)]
mod tests;
