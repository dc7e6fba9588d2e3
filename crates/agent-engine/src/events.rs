//! Lifecycle events emitted while an agent runs
//!
//! Events are delivered in emission order to every registered [`EventSink`].
//! A failing or panicking sink is logged and skipped; it never aborts the run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Trait for receiving agent events
///
/// This abstracts over the transport (channel, log, trace exporter, ...).
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: AgentEvent) -> Result<(), EventError>;
}

/// Error when delivering an event fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during agent execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AgentEvent {
    #[serde(rename_all = "camelCase")]
    StrategyStarted {
        strategy: String,
        execution_id: String,
    },

    #[serde(rename_all = "camelCase")]
    StrategyCompleted {
        strategy: String,
        execution_id: String,
        output: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    StrategyFailed {
        strategy: String,
        execution_id: String,
        error: String,
    },

    /// A node is about to run; `path` names the enclosing subgraphs
    #[serde(rename_all = "camelCase")]
    NodeStarted {
        node: String,
        path: Vec<String>,
        execution_id: String,
        input: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    NodeCompleted {
        node: String,
        path: Vec<String>,
        execution_id: String,
        output: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    NodeFailed {
        node: String,
        path: Vec<String>,
        execution_id: String,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    LlmCallStarted {
        execution_id: String,
        request_id: String,
        model: String,
        tools: Vec<String>,
    },

    #[serde(rename_all = "camelCase")]
    LlmCallCompleted {
        execution_id: String,
        request_id: String,
        /// Number of messages in the response
        responses: usize,
    },

    /// The provider or the stream failed after `LlmCallStarted`
    #[serde(rename_all = "camelCase")]
    LlmCallFailed {
        execution_id: String,
        request_id: String,
        error: String,
    },

    /// One chunk of a streamed completion
    #[serde(rename_all = "camelCase")]
    StreamChunk {
        execution_id: String,
        request_id: String,
        chunk: String,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallStarted {
        execution_id: String,
        call_id: String,
        tool: String,
        args: serde_json::Value,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallCompleted {
        execution_id: String,
        call_id: String,
        tool: String,
        result: String,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallFailed {
        execution_id: String,
        call_id: String,
        tool: String,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    ParallelBranchStarted {
        execution_id: String,
        node: String,
        branch: String,
        index: usize,
    },

    #[serde(rename_all = "camelCase")]
    ParallelBranchCompleted {
        execution_id: String,
        node: String,
        branch: String,
        index: usize,
    },

    #[serde(rename_all = "camelCase")]
    HistoryCompressed {
        execution_id: String,
        before: usize,
        after: usize,
    },

    #[serde(rename_all = "camelCase")]
    CheckpointCreated {
        execution_id: String,
        checkpoint_id: String,
        node_path: Vec<String>,
    },
}

impl AgentEvent {
    /// Short event name, matching the serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StrategyStarted { .. } => "strategyStarted",
            Self::StrategyCompleted { .. } => "strategyCompleted",
            Self::StrategyFailed { .. } => "strategyFailed",
            Self::NodeStarted { .. } => "nodeStarted",
            Self::NodeCompleted { .. } => "nodeCompleted",
            Self::NodeFailed { .. } => "nodeFailed",
            Self::LlmCallStarted { .. } => "llmCallStarted",
            Self::LlmCallCompleted { .. } => "llmCallCompleted",
            Self::LlmCallFailed { .. } => "llmCallFailed",
            Self::StreamChunk { .. } => "streamChunk",
            Self::ToolCallStarted { .. } => "toolCallStarted",
            Self::ToolCallCompleted { .. } => "toolCallCompleted",
            Self::ToolCallFailed { .. } => "toolCallFailed",
            Self::ParallelBranchStarted { .. } => "parallelBranchStarted",
            Self::ParallelBranchCompleted { .. } => "parallelBranchCompleted",
            Self::HistoryCompressed { .. } => "historyCompressed",
            Self::CheckpointCreated { .. } => "checkpointCreated",
        }
    }
}

/// A no-op event sink that discards all events
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: AgentEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: Mutex<Vec<AgentEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().clone()
    }

    /// Names of the nodes that started, in order
    pub fn started_nodes(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                AgentEvent::NodeStarted { node, .. } => Some(node.clone()),
                _ => None,
            })
            .collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: AgentEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Forwards events into an unbounded tokio channel
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelEventSink {
    /// Create the sink together with its receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: AgentEvent) -> Result<(), EventError> {
        self.tx.send(event).map_err(|_| EventError::channel_closed())
    }
}

/// Fans events out to every registered sink, in registration order
#[derive(Clone, Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver an event to every sink; failures and panics are logged and ignored
    pub fn emit(&self, event: AgentEvent) {
        for sink in &self.sinks {
            let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| sink.send(event.clone())));
            match delivered {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Dropping {} event for one observer: {}", event.kind(), e),
                Err(_) => log::error!("Observer panicked while handling {} event", event.kind()),
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
