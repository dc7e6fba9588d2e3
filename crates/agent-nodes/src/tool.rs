//! Tool execution nodes
//!
//! Tool failures the LLM can act on (bad arguments, a handler error) become
//! error results fed back to the model. Structural failures (an unknown tool,
//! a tool outside the current scope) fail the node.

use agent_engine::{EngineError, ExecutionContext, NodeDef, Result, ToolCall, ToolResult};
use futures_util::future::join_all;

use crate::catalog::{KindFn, NodeCategory, NodeKindMetadata};

/// Run one tool call, turning recoverable failures into an error result
pub async fn run_tool_call(ctx: &ExecutionContext, call: &ToolCall) -> Result<ToolResult> {
    match ctx.invoke_tool(call).await {
        Ok(output) => Ok(ToolResult::success(call, output.to_text(), output.structured().cloned())),
        Err(e @ (EngineError::Validation { .. } | EngineError::ToolExecution { .. })) => {
            log::debug!("Tool call {} ({}) returned an error result: {}", call.id, call.tool, e);
            Ok(ToolResult::failure(call, e.to_string()))
        }
        Err(e) => Err(e),
    }
}

/// Execute the tool call the LLM asked for
pub fn execute_tool(name: impl Into<String>) -> NodeDef<ToolCall, ToolResult> {
    NodeDef::new(name, |ctx: ExecutionContext, call: ToolCall| async move {
        run_tool_call(&ctx, &call).await
    })
}

/// Execute several tool calls concurrently; results keep the call order
pub fn execute_tools(name: impl Into<String>) -> NodeDef<Vec<ToolCall>, Vec<ToolResult>> {
    NodeDef::new(name, |ctx: ExecutionContext, calls: Vec<ToolCall>| async move {
        let results = join_all(calls.iter().map(|call| run_tool_call(&ctx, call))).await;
        results.into_iter().collect::<Result<Vec<_>>>()
    })
}

fn execute_tool_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "execute-tool",
        NodeCategory::Tool,
        "Execute Tool",
        "Runs one tool call and returns its result",
        "ToolCall",
        "ToolResult",
    )
}

fn execute_tools_kind() -> NodeKindMetadata {
    NodeKindMetadata::new(
        "execute-tools",
        NodeCategory::Tool,
        "Execute Tools",
        "Runs several tool calls concurrently",
        "Vec<ToolCall>",
        "Vec<ToolResult>",
    )
}

inventory::submit!(KindFn(execute_tool_kind));
inventory::submit!(KindFn(execute_tools_kind));
