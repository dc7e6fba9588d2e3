//! Execution checkpoints
//!
//! A checkpoint records where a run stands: the path to the active node
//! (through any nested subgraphs), the input that node is about to receive
//! and a full session snapshot. Storage backends live outside the engine
//! behind the [`Checkpointer`] trait. [`InMemoryCheckpointer`] keeps
//! zstd-compressed JSON snapshots in a bounded queue.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::session::SessionState;

/// Serializable execution position of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCheckpoint {
    pub checkpoint_id: String,
    pub execution_id: String,
    /// Name of the strategy that was running
    pub strategy: String,
    /// Node names from the strategy down to the active node
    pub node_path: Vec<String>,
    /// Input the active node had not yet consumed
    pub pending_input: Value,
    pub session: SessionState,
    pub created_at: DateTime<Utc>,
}

impl AgentCheckpoint {
    pub fn new(
        execution_id: impl Into<String>,
        strategy: impl Into<String>,
        node_path: Vec<String>,
        pending_input: Value,
        session: SessionState,
    ) -> Self {
        Self {
            checkpoint_id: uuid::Uuid::new_v4().to_string(),
            execution_id: execution_id.into(),
            strategy: strategy.into(),
            node_path,
            pending_input,
            session,
            created_at: Utc::now(),
        }
    }

    /// Name of the node the run resumes at
    pub fn active_node(&self) -> Option<&str> {
        self.node_path.last().map(String::as_str)
    }
}

/// Persistence seam for checkpoints
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Store a checkpoint, returning its id
    async fn create_checkpoint(&self, checkpoint: &AgentCheckpoint) -> Result<String>;

    /// Load a stored checkpoint by id
    async fn rollback_to_checkpoint(&self, checkpoint_id: &str) -> Result<AgentCheckpoint>;

    /// Most recent checkpoint of an execution, if any
    async fn latest_checkpoint(&self, execution_id: &str) -> Result<Option<AgentCheckpoint>>;
}

struct StoredCheckpoint {
    id: String,
    execution_id: String,
    compressed: Vec<u8>,
}

/// In-process checkpoint store with compressed snapshots
///
/// Holds at most `max_checkpoints`; the oldest is evicted first.
pub struct InMemoryCheckpointer {
    checkpoints: Mutex<VecDeque<StoredCheckpoint>>,
    max_checkpoints: usize,
}

impl InMemoryCheckpointer {
    pub fn new(max_checkpoints: usize) -> Self {
        Self {
            checkpoints: Mutex::new(VecDeque::new()),
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.checkpoints.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.lock().is_empty()
    }

    /// Total compressed size of all stored checkpoints
    pub fn compressed_size(&self) -> usize {
        self.checkpoints.lock().iter().map(|c| c.compressed.len()).sum()
    }

    fn compress(checkpoint: &AgentCheckpoint) -> Result<Vec<u8>> {
        let json = serde_json::to_vec(checkpoint)?;
        zstd::encode_all(&json[..], 3).map_err(|e| EngineError::Compression(e.to_string()))
    }

    fn decompress(compressed: &[u8]) -> Result<AgentCheckpoint> {
        let json = zstd::decode_all(compressed).map_err(|e| EngineError::Compression(e.to_string()))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

impl Default for InMemoryCheckpointer {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn create_checkpoint(&self, checkpoint: &AgentCheckpoint) -> Result<String> {
        let compressed = Self::compress(checkpoint)?;
        let mut checkpoints = self.checkpoints.lock();
        checkpoints.push_back(StoredCheckpoint {
            id: checkpoint.checkpoint_id.clone(),
            execution_id: checkpoint.execution_id.clone(),
            compressed,
        });
        while checkpoints.len() > self.max_checkpoints {
            checkpoints.pop_front();
        }
        Ok(checkpoint.checkpoint_id.clone())
    }

    async fn rollback_to_checkpoint(&self, checkpoint_id: &str) -> Result<AgentCheckpoint> {
        let checkpoints = self.checkpoints.lock();
        let stored = checkpoints
            .iter()
            .find(|c| c.id == checkpoint_id)
            .ok_or_else(|| EngineError::Checkpoint(format!("Unknown checkpoint '{}'", checkpoint_id)))?;
        Self::decompress(&stored.compressed)
    }

    async fn latest_checkpoint(&self, execution_id: &str) -> Result<Option<AgentCheckpoint>> {
        let checkpoints = self.checkpoints.lock();
        checkpoints
            .iter()
            .rev()
            .find(|c| c.execution_id == execution_id)
            .map(|c| Self::decompress(&c.compressed))
            .transpose()
    }
}
