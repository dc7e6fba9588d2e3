//! Tool registry and invocation
//!
//! A tool is an explicit (descriptor, handler) pair registered
//! programmatically. The registry validates arguments against the
//! descriptor before dispatching to the handler, and converts handler
//! failures (including panics) into [`EngineError::ToolExecution`].
//!
//! # Example
//!
//! ```ignore
//! use agent_engine::tools::{ParameterType, ToolDescriptor, ToolParameter, ToolRegistry, TypedTool};
//!
//! let mut registry = ToolRegistry::new();
//! registry.register(
//!     ToolDescriptor::new("add", "Add two integers")
//!         .required(ToolParameter::new("a", "left operand", ParameterType::Integer))
//!         .required(ToolParameter::new("b", "right operand", ParameterType::Integer)),
//!     TypedTool::new(|args: AddArgs| async move { Ok(args.a + args.b) }),
//! )?;
//! ```
//!
//! [`EngineError::ToolExecution`]: crate::EngineError::ToolExecution

pub mod descriptor;
pub mod handler;
pub mod registry;

pub use descriptor::{ParameterType, ToolDescriptor, ToolParameter};
pub use handler::{FnTool, ToolHandler, ToolOutput, TypedTool};
pub use registry::{ToolRegistry, ToolSelection};
