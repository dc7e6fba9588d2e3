//! Subgraphs and strategies
//!
//! A [`Subgraph`] runs as one opaque node inside its parent graph, with its
//! own tool scope. A [`Strategy`] is the root graph of an agent, bound to a
//! name and to its entry/exit types.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::executor::GraphCore;
use crate::checkpoint::AgentCheckpoint;
use crate::context::ExecutionContext;
use crate::error::Result;
use crate::events::AgentEvent;
use crate::node::{decode, encode, Node, NodeDef};

impl GraphCore {
    /// Run inside `scoped`, offering the scope's tools to the LLM meanwhile
    ///
    /// The session's previous tool list is put back afterwards, on success
    /// and on failure.
    async fn run_with_tools(
        &self,
        scoped: &ExecutionContext,
        input: Value,
        resume: Option<&[String]>,
    ) -> Result<Value> {
        let visible = scoped.visible_tools();
        let previous = scoped.write_session(|s| std::mem::replace(&mut s.tools, visible))?;

        let result = match resume {
            Some(path) => self.resume(scoped, path, input).await,
            None => self.run(scoped, input).await,
        };

        scoped.write_session(|s| s.tools = previous)?;
        result
    }
}

/// A subgraph seen from its parent: one node
struct SubgraphNode {
    core: Arc<GraphCore>,
}

#[async_trait]
impl Node for SubgraphNode {
    fn name(&self) -> &str {
        &self.core.name
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<Value> {
        let inner = ctx.enter_subgraph(&self.core.name, self.core.tools.clone());
        self.core.run_with_tools(&inner, input, None).await
    }

    async fn resume(&self, ctx: &ExecutionContext, path: &[String], input: Value) -> Result<Value> {
        let inner = ctx.enter_subgraph(&self.core.name, self.core.tools.clone());
        self.core.run_with_tools(&inner, input, Some(path)).await
    }

    fn referenced_tools(&self) -> Vec<String> {
        self.core.referenced_tools()
    }
}

/// A built nested graph with input `In` and output `Out`
pub struct Subgraph<In, Out> {
    core: Arc<GraphCore>,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out> Subgraph<In, Out> {
    pub(crate) fn new(core: GraphCore) -> Self {
        Self {
            core: Arc::new(core),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Names of every node, start and finish markers included
    pub fn node_names(&self) -> Vec<&str> {
        self.core.node_names()
    }

    /// Use the subgraph as a node, e.g. as a parallel branch
    pub fn into_node(self) -> NodeDef<In, Out> {
        NodeDef::from_node(SubgraphNode { core: self.core })
    }
}

impl<In, Out> Clone for Subgraph<In, Out> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<In, Out> std::fmt::Debug for Subgraph<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Subgraph").field(&self.core).finish()
    }
}

/// The root graph of an agent
pub struct Strategy<In, Out> {
    core: Arc<GraphCore>,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out> Strategy<In, Out>
where
    In: Serialize,
    Out: DeserializeOwned,
{
    pub(crate) fn new(core: GraphCore) -> Self {
        Self {
            core: Arc::new(core),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn node_names(&self) -> Vec<&str> {
        self.core.node_names()
    }

    /// Tool names restricted by this strategy or any nested subgraph
    pub fn referenced_tools(&self) -> Vec<String> {
        self.core.referenced_tools()
    }

    /// Run the strategy from its start node
    pub async fn run(&self, ctx: &ExecutionContext, input: In) -> Result<Out> {
        let input = encode(&self.core.name, &input)?;
        self.execute(ctx, input, None).await
    }

    /// Continue a run from a checkpoint
    ///
    /// The session is restored from the snapshot first, then routing restarts
    /// at the recorded node with the recorded pending input. The snapshot's
    /// tool list belongs to whichever scope was active; the session keeps its
    /// own and each scope re-applies its tools on the way down.
    pub async fn resume(&self, ctx: &ExecutionContext, checkpoint: &AgentCheckpoint) -> Result<Out> {
        log::info!(
            "Resuming strategy '{}' from checkpoint {} at {:?}",
            self.core.name,
            checkpoint.checkpoint_id,
            checkpoint.node_path
        );
        let mut state = checkpoint.session.clone();
        ctx.write_session(|s| {
            state.tools = std::mem::take(&mut s.tools);
            *s = state;
        })?;
        self.execute(ctx, checkpoint.pending_input.clone(), Some(checkpoint.node_path.as_slice()))
            .await
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value, resume: Option<&[String]>) -> Result<Out> {
        let scoped = ctx.with_tool_scope(&self.core.name, self.core.tools.clone());
        let execution_id = ctx.execution_id().to_string();
        ctx.emit(AgentEvent::StrategyStarted {
            strategy: self.core.name.clone(),
            execution_id: execution_id.clone(),
        });

        let result = self
            .core
            .run_with_tools(&scoped, input, resume)
            .await
            .and_then(|output| {
                let typed: Out = decode(&self.core.name, output.clone())?;
                Ok((typed, output))
            });

        match result {
            Ok((typed, output)) => {
                ctx.emit(AgentEvent::StrategyCompleted {
                    strategy: self.core.name.clone(),
                    execution_id,
                    output,
                });
                Ok(typed)
            }
            Err(e) => {
                log::warn!("Strategy '{}' failed: {}", self.core.name, e);
                ctx.emit(AgentEvent::StrategyFailed {
                    strategy: self.core.name.clone(),
                    execution_id,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }
}

impl<In, Out> Clone for Strategy<In, Out> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<In, Out> std::fmt::Debug for Strategy<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Strategy").field(&self.core).finish()
    }
}
