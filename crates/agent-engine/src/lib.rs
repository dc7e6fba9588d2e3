//! Agent Engine - Graph-based execution of LLM-driven agent strategies
//!
//! An agent's behavior is a [`Strategy`]: a directed graph of typed nodes
//! (LLM requests, tool calls, prompt rewrites) joined by conditional,
//! transforming edges. It supports:
//!
//! - First-match edge routing with typed conditions and transforms
//! - Subgraphs that run as one node with their own tool subset
//! - Parallel nodes whose branch outputs are reduced by a merge strategy
//! - History compression (TLDR, last-N, chunked, fact retrieval, custom)
//! - Checkpoints that resume routing at the exact recorded node
//!
//! # Architecture
//!
//! - [`Session`]: message history, active tools and model behind a
//!   single-writer/many-reader lock
//! - [`ToolRegistry`]: explicit (descriptor, handler) registration with
//!   argument validation
//! - [`ExecutionContext`]: what a node sees of the run (session, tools, LLM,
//!   events, storage)
//! - [`EventSink`]: ordered lifecycle events for observers
//!
//! # Example
//!
//! ```ignore
//! use agent_engine::{Agent, GraphBuilder, Message};
//!
//! let mut g = GraphBuilder::<String, Message>::new("chat");
//! let ask = g.add("ask", |ctx, text: String| async move {
//!     ctx.session().append(Message::user(text))?;
//!     ctx.request_llm().await
//! });
//! g.then(&g.start(), &ask);
//! g.then(&ask, &g.finish());
//!
//! let agent = Agent::builder(g.build_strategy()?, llm).build()?;
//! let reply = agent.run("Hello".to_string()).await?;
//! ```

pub mod agent;
pub mod checkpoint;
pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod graph;
pub mod llm;
pub mod message;
pub mod node;
pub mod parallel;
pub mod session;
pub mod storage;
pub mod tools;

// Re-export key types
pub use agent::{Agent, AgentBuilder};
pub use checkpoint::{AgentCheckpoint, Checkpointer, InMemoryCheckpointer};
pub use compression::{compress_history, Concept, FactType, HistoryCompression, HistoryCompressionStrategy};
pub use config::EngineConfig;
pub use context::{ContextBuilder, ExecutionContext};
pub use error::{EngineError, Result};
pub use events::{AgentEvent, EventBus, EventSink, NullEventSink, VecEventSink};
pub use graph::{EdgeSpec, GraphBuilder, NodeHandle, Strategy, Subgraph, FINISH_NODE, START_NODE};
pub use llm::{LlmClient, LlmModel, ScriptedLlmClient};
pub use message::{Message, Role, ToolCall, ToolResult};
pub use node::{Node, NodeDef};
pub use parallel::{BranchResult, MergeOutcome, MergeStrategy};
pub use session::{Prompt, Session, SessionState};
pub use storage::{AgentStorage, StorageKey};
pub use tools::{ToolDescriptor, ToolOutput, ToolRegistry, ToolSelection};
