//! Conversation messages
//!
//! A prompt is an insertion-ordered list of [`Message`]s. Messages are
//! immutable once appended to a session; only an explicit history
//! replacement can remove or reorder them.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata attached to every message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    /// When the message was created
    pub timestamp: DateTime<Utc>,
    /// ID of the LLM request that produced or consumed this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// Memory messages survive history compression when memory is preserved
    #[serde(default)]
    pub memory: bool,
}

impl MessageMeta {
    pub fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            request_id: None,
            memory: false,
        }
    }
}

impl Default for MessageMeta {
    fn default() -> Self {
        Self::now()
    }
}

/// A tool invocation requested by the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call ID, echoed back in the matching result
    pub id: String,
    /// Name of the tool to invoke
    pub tool: String,
    /// Arguments as JSON
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, tool: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            args,
        }
    }
}

/// The outcome of a tool call, as fed back to the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// ID of the call this result answers
    pub id: String,
    /// Name of the tool that ran
    pub tool: String,
    /// Text rendering of the result (or of the error)
    pub content: String,
    /// Structured result, when the tool produced one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Whether the tool failed
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Successful result answering `call`
    pub fn success(call: &ToolCall, content: impl Into<String>, payload: Option<serde_json::Value>) -> Self {
        Self {
            id: call.id.clone(),
            tool: call.tool.clone(),
            content: content.into(),
            payload,
            is_error: false,
        }
    }

    /// Failed result answering `call`; the error text is what the LLM sees
    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            id: call.id.clone(),
            tool: call.tool.clone(),
            content: error.into(),
            payload: None,
            is_error: true,
        }
    }
}

/// The role of a message, without its content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolCall,
    ToolResult,
}

/// A single conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
        #[serde(default)]
        meta: MessageMeta,
    },
    User {
        content: String,
        #[serde(default)]
        meta: MessageMeta,
    },
    Assistant {
        content: String,
        /// Structured output, when the response was parsed into one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<serde_json::Value>,
        #[serde(default)]
        meta: MessageMeta,
    },
    ToolCall {
        call: ToolCall,
        #[serde(default)]
        meta: MessageMeta,
    },
    ToolResult {
        result: ToolResult,
        #[serde(default)]
        meta: MessageMeta,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
            meta: MessageMeta::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            meta: MessageMeta::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            payload: None,
            meta: MessageMeta::now(),
        }
    }

    pub fn tool_call(call: ToolCall) -> Self {
        Self::ToolCall {
            call,
            meta: MessageMeta::now(),
        }
    }

    pub fn tool_result(result: ToolResult) -> Self {
        Self::ToolResult {
            result,
            meta: MessageMeta::now(),
        }
    }

    /// Attach a structured payload (assistant messages only; no-op otherwise)
    pub fn with_payload(mut self, value: serde_json::Value) -> Self {
        if let Self::Assistant { payload, .. } = &mut self {
            *payload = Some(value);
        }
        self
    }

    /// Tag the message with the request that produced it
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.meta_mut().request_id = Some(request_id.into());
        self
    }

    /// Mark the message as a memory message
    pub fn as_memory(mut self) -> Self {
        self.meta_mut().memory = true;
        self
    }

    pub fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::ToolCall { .. } => Role::ToolCall,
            Self::ToolResult { .. } => Role::ToolResult,
        }
    }

    /// Text content; tool calls render their arguments as JSON
    pub fn content(&self) -> Cow<'_, str> {
        match self {
            Self::System { content, .. }
            | Self::User { content, .. }
            | Self::Assistant { content, .. } => Cow::Borrowed(content),
            Self::ToolCall { call, .. } => Cow::Owned(call.args.to_string()),
            Self::ToolResult { result, .. } => Cow::Borrowed(&result.content),
        }
    }

    pub fn meta(&self) -> &MessageMeta {
        match self {
            Self::System { meta, .. }
            | Self::User { meta, .. }
            | Self::Assistant { meta, .. }
            | Self::ToolCall { meta, .. }
            | Self::ToolResult { meta, .. } => meta,
        }
    }

    fn meta_mut(&mut self) -> &mut MessageMeta {
        match self {
            Self::System { meta, .. }
            | Self::User { meta, .. }
            | Self::Assistant { meta, .. }
            | Self::ToolCall { meta, .. }
            | Self::ToolResult { meta, .. } => meta,
        }
    }

    pub fn is_memory(&self) -> bool {
        self.meta().memory
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall { .. })
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Self::Assistant { .. })
    }

    pub fn as_tool_call(&self) -> Option<&ToolCall> {
        match self {
            Self::ToolCall { call, .. } => Some(call),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResult> {
        match self {
            Self::ToolResult { result, .. } => Some(result),
            _ => None,
        }
    }
}
