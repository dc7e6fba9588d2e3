//! Engine configuration
//!
//! Every field has a default, so a partial JSON document is a valid config.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::LlmModel;

/// Default values for [`EngineConfig`]
pub mod defaults {
    use crate::llm::LlmModel;

    /// Node invocations allowed per graph run before giving up
    pub const MAX_STEPS: u32 = 1000;

    /// Parallel branches allowed to run at the same time
    pub const MAX_PARALLEL_BRANCHES: usize = 16;

    pub fn default_model() -> LlmModel {
        LlmModel::new("unspecified", "default")
    }
}

/// Runtime knobs shared by every graph of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Per-graph node invocation limit; exceeding it is an `ExecutionLimit` error
    pub max_steps: u32,
    /// Upper bound on concurrently running parallel branches
    pub max_parallel_branches: usize,
    /// Checkpoint before every non-start node when a checkpointer is attached
    pub continuous_checkpoints: bool,
    /// Model used by fresh sessions
    pub default_model: LlmModel,
    /// Emit a `StreamChunk` event per streamed chunk
    pub emit_stream_chunks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: defaults::MAX_STEPS,
            max_parallel_branches: defaults::MAX_PARALLEL_BRANCHES,
            continuous_checkpoints: false,
            default_model: defaults::default_model(),
            emit_stream_chunks: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn with_max_parallel_branches(mut self, limit: usize) -> Self {
        self.max_parallel_branches = limit.max(1);
        self
    }

    pub fn with_continuous_checkpoints(mut self, enabled: bool) -> Self {
        self.continuous_checkpoints = enabled;
        self
    }

    pub fn with_default_model(mut self, model: LlmModel) -> Self {
        self.default_model = model;
        self
    }

    pub fn with_stream_chunks(mut self, enabled: bool) -> Self {
        self.emit_stream_chunks = enabled;
        self
    }
}
