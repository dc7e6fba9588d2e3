//! LLM request nodes
//!
//! Every node here appends its input to the session first, then asks the
//! LLM; the response is appended to the session as well.

use agent_engine::{ExecutionContext, Message, NodeDef, ToolResult};

use crate::catalog::{KindFn, NodeCategory, NodeKindMetadata};

/// Send a user message and request one response, offering the session's tools
pub fn llm_request(name: impl Into<String>) -> NodeDef<String, Message> {
    NodeDef::new(name, |ctx: ExecutionContext, text: String| async move {
        ctx.session().append(Message::user(text))?;
        ctx.request_llm().await
    })
}

/// Send a user message and request one response offering no tools
pub fn llm_request_without_tools(name: impl Into<String>) -> NodeDef<String, Message> {
    NodeDef::new(name, |ctx: ExecutionContext, text: String| async move {
        ctx.session().append(Message::user(text))?;
        ctx.request_llm_without_tools().await
    })
}

/// Send a user message and accept several response messages (e.g. parallel tool calls)
pub fn llm_request_multiple(name: impl Into<String>) -> NodeDef<String, Vec<Message>> {
    NodeDef::new(name, |ctx: ExecutionContext, text: String| async move {
        ctx.session().append(Message::user(text))?;
        ctx.request_llm_multiple().await
    })
}

/// Send a user message and stream the response text
pub fn llm_request_streaming(name: impl Into<String>) -> NodeDef<String, String> {
    NodeDef::new(name, |ctx: ExecutionContext, text: String| async move {
        ctx.session().append(Message::user(text))?;
        ctx.request_llm_streaming().await
    })
}

/// Feed a tool result back and request the next response
pub fn llm_send_tool_result(name: impl Into<String>) -> NodeDef<ToolResult, Message> {
    NodeDef::new(name, |ctx: ExecutionContext, result: ToolResult| async move {
        ctx.session().append(Message::tool_result(result))?;
        ctx.request_llm().await
    })
}

/// Feed several tool results back and request the next (multi-message) response
pub fn llm_send_tool_results(name: impl Into<String>) -> NodeDef<Vec<ToolResult>, Vec<Message>> {
    NodeDef::new(name, |ctx: ExecutionContext, results: Vec<ToolResult>| async move {
        ctx.write_session(|s| {
            s.prompt
                .messages
                .extend(results.into_iter().map(Message::tool_result))
        })?;
        ctx.request_llm_multiple().await
    })
}

fn llm_request_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "llm-request",
        NodeCategory::Llm,
        "LLM Request",
        "Appends a user message and requests one response with the active tools",
        "String",
        "Message",
    )
}

fn llm_request_without_tools_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "llm-request-without-tools",
        NodeCategory::Llm,
        "LLM Request (no tools)",
        "Appends a user message and requests one response without tools",
        "String",
        "Message",
    )
}

fn llm_request_multiple_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "llm-request-multiple",
        NodeCategory::Llm,
        "LLM Request (multiple)",
        "Appends a user message and requests a multi-message response",
        "String",
        "Vec<Message>",
    )
}

fn llm_request_streaming_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "llm-request-streaming",
        NodeCategory::Llm,
        "LLM Request (streaming)",
        "Appends a user message and streams the response text",
        "String",
        "String",
    )
}

fn llm_send_tool_result_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "llm-send-tool-result",
        NodeCategory::Llm,
        "Send Tool Result",
        "Appends a tool result and requests the next response",
        "ToolResult",
        "Message",
    )
}

fn llm_send_tool_results_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "llm-send-tool-results",
        NodeCategory::Llm,
        "Send Tool Results",
        "Appends several tool results and requests a multi-message response",
        "Vec<ToolResult>",
        "Vec<Message>",
    )
}

inventory::submit!(KindFn(llm_request_kind));
inventory::submit!(KindFn(llm_request_without_tools_kind));
inventory::submit!(KindFn(llm_request_multiple_kind));
inventory::submit!(KindFn(llm_request_streaming_kind));
inventory::submit!(KindFn(llm_send_tool_result_kind));
inventory::submit!(KindFn(llm_send_tool_results_kind));
