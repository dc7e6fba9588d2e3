//! Agent Nodes
//!
//! Built-in nodes and strategies for the agent engine.
//! Each node is a typed building block that can be composed into strategies.
//!
//! # Categories
//!
//! - **LLM**: request a response, stream it, or feed tool results back
//! - **Tool**: run the tool calls the LLM asked for
//! - **History**: compress the session history
//! - **Prompt**: append messages, pass values through
//!
//! Every built-in kind is listed in [`catalog::builtin_kinds`].

pub mod catalog;
pub mod history;
pub mod llm;
pub mod prompt;
pub mod strategies;
pub mod tool;

// Re-export all nodes for convenience
pub use history::compress_history;
pub use llm::{
    llm_request, llm_request_multiple, llm_request_streaming, llm_request_without_tools, llm_send_tool_result,
    llm_send_tool_results,
};
pub use prompt::{append_prompt, identity};
pub use strategies::{parallel_tools_strategy, single_run_strategy};
pub use tool::{execute_tool, execute_tools, run_tool_call};
