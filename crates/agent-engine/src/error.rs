//! Error types for the agent engine

use thiserror::Error;

use crate::graph::validation::GraphValidationError;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while building or running agent graphs
#[derive(Debug, Error)]
pub enum EngineError {
    /// Tool arguments did not match the tool's descriptor
    #[error("Invalid arguments for tool '{tool}': {message}")]
    Validation { tool: String, message: String },

    /// A typed tool handler could not decode its arguments
    ///
    /// The registry reports it as [`EngineError::Validation`] for the tool.
    #[error("Cannot decode tool arguments: {0}")]
    InvalidArguments(String),

    /// No outgoing edge accepted a node's output
    #[error("No outgoing edge of node '{node}' matched its output: {output}")]
    Routing {
        node: String,
        output: serde_json::Value,
    },

    /// Tool exists but is outside the current subgraph's tool scope
    #[error("Tool '{tool}' is not available in '{scope}'")]
    ToolNotAvailable { tool: String, scope: String },

    /// Tool is not registered at all
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool with the same name is already registered
    #[error("Tool '{0}' is already registered")]
    DuplicateTool(String),

    /// The tool handler itself failed
    #[error("Tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// A parallel branch failed; the whole parallel node fails with it
    #[error("Parallel branch '{branch}' (#{index}) failed: {source}")]
    Aggregate {
        branch: String,
        index: usize,
        source: Box<EngineError>,
    },

    /// Reentrant session access that would block forever
    #[error("Reentrant access to session '{0}' while it is held for writing")]
    Deadlock(String),

    /// Graph failed structural validation at build time
    #[error("Graph '{graph}' is invalid: {errors:?}")]
    GraphBuild {
        graph: String,
        errors: Vec<GraphValidationError>,
    },

    /// A value crossing a node or edge did not have the declared type
    #[error("Type mismatch at '{location}': {message}")]
    TypeMismatch { location: String, message: String },

    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Too many node invocations in one graph run
    #[error("Execution limit reached in '{graph}' ({limit} steps)")]
    ExecutionLimit { graph: String, limit: u32 },

    /// Execution was cancelled
    #[error("Execution cancelled")]
    Cancelled,

    /// Checkpoint creation or restoration failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Snapshot compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Node execution failed
    #[error("Node execution failed: {0}")]
    ExecutionFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create an LLM error with a message
    pub fn llm(msg: impl Into<String>) -> Self {
        Self::Llm(msg.into())
    }

    /// Create a type mismatch error
    pub fn type_mismatch(location: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::TypeMismatch {
            location: location.into(),
            message: err.to_string(),
        }
    }

    /// Whether this error is a configuration defect that retrying cannot fix
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::Routing { .. }
                | Self::ToolNotAvailable { .. }
                | Self::Deadlock(_)
                | Self::GraphBuild { .. }
        )
    }
}
