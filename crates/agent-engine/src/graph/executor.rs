//! Graph executor
//!
//! Runs one graph from its start marker until the finish marker is reached.
//! The active node index is the only execution state: after a node
//! produces an output, its outgoing edges are tried in declaration order and
//! the first one that fires picks the next node and its input.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::edge::Edge;
use super::{FINISH, START};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::events::AgentEvent;
use crate::node::Node;
use crate::tools::ToolSelection;

/// A validated, immutable graph
pub(crate) struct GraphCore {
    pub(crate) name: String,
    nodes: Vec<Arc<dyn Node>>,
    /// Outgoing edges per node, in declaration order
    outgoing: Vec<Vec<Edge>>,
    index: HashMap<String, usize>,
    pub(crate) tools: ToolSelection,
}

impl GraphCore {
    pub(crate) fn new(
        name: String,
        nodes: Vec<Arc<dyn Node>>,
        outgoing: Vec<Vec<Edge>>,
        tools: ToolSelection,
    ) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (node.name().to_string(), i))
            .collect();
        Self {
            name,
            nodes,
            outgoing,
            index,
            tools,
        }
    }

    pub(crate) fn node_names(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name()).collect()
    }

    /// Tool names this graph or any nested graph restricts itself to
    pub(crate) fn referenced_tools(&self) -> Vec<String> {
        let mut tools = match &self.tools {
            ToolSelection::Named(names) => names.clone(),
            _ => Vec::new(),
        };
        for node in &self.nodes {
            tools.extend(node.referenced_tools());
        }
        tools.sort();
        tools.dedup();
        tools
    }

    /// Run from start to finish
    pub(crate) async fn run(&self, ctx: &ExecutionContext, input: Value) -> Result<Value> {
        self.drive(ctx, START, input, None).await
    }

    /// Re-enter at the node named by `path[0]`, descending with the rest
    pub(crate) async fn resume(&self, ctx: &ExecutionContext, path: &[String], input: Value) -> Result<Value> {
        let (first, rest) = path
            .split_first()
            .ok_or_else(|| EngineError::Checkpoint(format!("Empty node path for '{}'", self.name)))?;
        let node = *self.index.get(first).ok_or_else(|| {
            EngineError::Checkpoint(format!("Graph '{}' has no node '{}'", self.name, first))
        })?;
        log::debug!("Resuming graph '{}' at node '{}'", self.name, first);
        self.drive(ctx, node, input, Some(rest)).await
    }

    async fn drive(
        &self,
        ctx: &ExecutionContext,
        mut current: usize,
        mut value: Value,
        mut resume_at: Option<&[String]>,
    ) -> Result<Value> {
        let limit = ctx.config().max_steps;
        let mut steps: u32 = 0;

        loop {
            let node = &self.nodes[current];

            if current == FINISH {
                self.emit_started(ctx, node.name(), &value);
                self.emit_completed(ctx, node.name(), &value);
                log::debug!("Graph '{}' finished after {} steps", self.name, steps);
                return Ok(value);
            }

            // Check execution limit
            if steps >= limit {
                log::warn!("Graph '{}' hit the execution limit of {} steps", self.name, limit);
                return Err(EngineError::ExecutionLimit {
                    graph: self.name.clone(),
                    limit,
                });
            }
            steps += 1;

            let resume_path = resume_at.take();
            if current != START && resume_path.is_none() && ctx.config().continuous_checkpoints {
                ctx.create_checkpoint(node.name(), &value).await?;
            }

            self.emit_started(ctx, node.name(), &value);
            let result = match resume_path {
                Some(rest) if !rest.is_empty() => node.resume(ctx, rest, value).await,
                _ => node.execute(ctx, value).await,
            };
            let output = match result {
                Ok(output) => output,
                Err(e) => {
                    log::debug!("Node '{}' in '{}' failed: {}", node.name(), self.name, e);
                    ctx.emit(AgentEvent::NodeFailed {
                        node: node.name().to_string(),
                        path: ctx.path().to_vec(),
                        execution_id: ctx.execution_id().to_string(),
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            };
            self.emit_completed(ctx, node.name(), &output);

            let (next, input) = self.route(current, output)?;
            current = next;
            value = input;
        }
    }

    /// Pick the first outgoing edge that fires for `output`
    fn route(&self, from: usize, output: Value) -> Result<(usize, Value)> {
        for edge in &self.outgoing[from] {
            if let Some(input) = edge.evaluate(&output)? {
                return Ok((edge.target, input));
            }
        }
        Err(EngineError::Routing {
            node: self.nodes[from].name().to_string(),
            output,
        })
    }

    fn emit_started(&self, ctx: &ExecutionContext, node: &str, input: &Value) {
        ctx.emit(AgentEvent::NodeStarted {
            node: node.to_string(),
            path: ctx.path().to_vec(),
            execution_id: ctx.execution_id().to_string(),
            input: input.clone(),
        });
    }

    fn emit_completed(&self, ctx: &ExecutionContext, node: &str, output: &Value) {
        ctx.emit(AgentEvent::NodeCompleted {
            node: node.to_string(),
            path: ctx.path().to_vec(),
            execution_id: ctx.execution_id().to_string(),
            output: output.clone(),
        });
    }
}

impl std::fmt::Debug for GraphCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphCore")
            .field("name", &self.name)
            .field("nodes", &self.node_names())
            .field("tools", &self.tools)
            .finish()
    }
}
