//! Ready-made strategies

use agent_engine::{GraphBuilder, Message, Result, Strategy};

use crate::llm::{llm_request, llm_request_multiple, llm_send_tool_result, llm_send_tool_results};
use crate::tool::{execute_tool, execute_tools};

/// Node names used by [`single_run_strategy`]
pub const REQUEST_LLM: &str = "request_llm";
pub const EXECUTE_TOOL: &str = "execute_tool";
pub const SEND_TOOL_RESULT: &str = "send_tool_result";

/// Ask the LLM, run the tool it calls and feed the result back until it answers
///
/// ```text
/// start -> request_llm
/// request_llm -> finish            (assistant message)
/// request_llm -> execute_tool      (tool call)
/// execute_tool -> send_tool_result
/// send_tool_result -> execute_tool (tool call)
/// send_tool_result -> finish       (assistant message)
/// ```
pub fn single_run_strategy(name: impl Into<String>) -> Result<Strategy<String, Message>> {
    let mut g = GraphBuilder::<String, Message>::new(name);
    let request = g.node(llm_request(REQUEST_LLM));
    let execute = g.node(execute_tool(EXECUTE_TOOL));
    let send = g.node(llm_send_tool_result(SEND_TOOL_RESULT));

    g.then(&g.start(), &request);
    g.edge(&request, &g.finish(), |e| e.on_assistant_message());
    g.edge(&request, &execute, |e| e.on_tool_call());
    g.then(&execute, &send);
    g.edge(&send, &execute, |e| e.on_tool_call());
    g.edge(&send, &g.finish(), |e| e.on_assistant_message());
    g.build_strategy()
}

/// Like [`single_run_strategy`], running every tool call of a response concurrently
pub fn parallel_tools_strategy(name: impl Into<String>) -> Result<Strategy<String, Vec<Message>>> {
    let mut g = GraphBuilder::<String, Vec<Message>>::new(name);
    let request = g.node(llm_request_multiple(REQUEST_LLM));
    let execute = g.node(execute_tools("execute_tools"));
    let send = g.node(llm_send_tool_results("send_tool_results"));

    g.then(&g.start(), &request);
    g.edge(&request, &execute, |e| e.on_multiple_tool_calls());
    g.edge(&request, &g.finish(), |e| e.on_assistant_messages());
    g.then(&execute, &send);
    g.edge(&send, &execute, |e| e.on_multiple_tool_calls());
    g.edge(&send, &g.finish(), |e| e.on_assistant_messages());
    g.build_strategy()
}
