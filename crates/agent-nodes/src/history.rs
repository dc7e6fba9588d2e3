//! History compression node

use agent_engine::{compress_history as compress, ExecutionContext, HistoryCompression, Message, NodeDef};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::catalog::{KindFn, NodeCategory, NodeKindMetadata};

/// Compress the session history, passing the input through unchanged
///
/// With `preserve_memory`, `memory_messages` (and any message flagged as
/// memory) survive the compression.
pub fn compress_history<T>(
    name: impl Into<String>,
    compression: HistoryCompression,
    preserve_memory: bool,
    memory_messages: Vec<Message>,
) -> NodeDef<T, T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    NodeDef::new(name, move |ctx: ExecutionContext, input: T| {
        let compression = compression.clone();
        let memory_messages = memory_messages.clone();
        async move {
            compress(&ctx, &compression, preserve_memory, &memory_messages).await?;
            Ok(input)
        }
    })
}

fn compress_history_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "compress-history",
        NodeCategory::History,
        "Compress History",
        "Replaces the message history with a condensed form",
        "T",
        "T",
    )
}

inventory::submit!(KindFn(compress_history_kind));
