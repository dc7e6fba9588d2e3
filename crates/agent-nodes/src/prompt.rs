//! Prompt manipulation and passthrough nodes

use agent_engine::{ExecutionContext, Message, NodeDef};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::catalog::{KindFn, NodeCategory, NodeKindMetadata};

/// Append the messages `build` derives from the input, passing the input through
pub fn append_prompt<T, F>(name: impl Into<String>, build: F) -> NodeDef<T, T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(&T) -> Vec<Message> + Send + Sync + 'static,
{
    NodeDef::new(name, move |ctx: ExecutionContext, input: T| {
        let messages = build(&input);
        async move {
            ctx.write_session(|s| s.prompt.messages.extend(messages))?;
            Ok(input)
        }
    })
}

/// Return the input unchanged
pub fn identity<T>(name: impl Into<String>) -> NodeDef<T, T> {
    NodeDef::identity(name)
}

fn append_prompt_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "append-prompt",
        NodeCategory::Prompt,
        "Append Prompt",
        "Appends messages derived from the input to the session",
        "T",
        "T",
    )
}

fn identity_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "identity",
        NodeCategory::Control,
        "Identity",
        "Passes its input through unchanged",
        "T",
        "T",
    )
}

inventory::submit!(KindFn(append_prompt_kind));
inventory::submit!(KindFn(identity_kind));
