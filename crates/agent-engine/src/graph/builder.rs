//! Typed graph builder
//!
//! Nodes are added to an arena and referred to by [`NodeHandle`]s that
//! carry the node's input and output types, so an edge whose transformed
//! value does not match the target's input type fails to compile. Structure
//! is validated once, in [`GraphBuilder::build_subgraph`] /
//! [`GraphBuilder::build_strategy`], before anything runs.
//!
//! # Example
//!
//! ```ignore
//! let mut g = GraphBuilder::<String, Message>::new("chat");
//! let ask = g.add("ask", |ctx, text: String| async move {
//!     ctx.session().append(Message::user(text))?;
//!     ctx.request_llm().await
//! });
//! g.then(&g.start(), &ask);
//! g.edge(&ask, &g.finish(), |e| e.on_assistant_message());
//! let strategy = g.build_strategy()?;
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::edge::{Edge, EdgeSpec, EdgeStep};
use super::executor::GraphCore;
use super::subgraph::{Strategy, Subgraph};
use super::validation::{validate_structure, GraphValidationError};
use super::{FINISH, FINISH_NODE, START, START_NODE};
use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::node::{IdentityNode, Node, NodeDef};
use crate::parallel::{MergeStrategy, ParallelNode};
use crate::tools::ToolSelection;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Reference to a node inside one builder
pub struct NodeHandle<In, Out> {
    index: usize,
    graph: u64,
    name: String,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out> NodeHandle<In, Out> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<In, Out> Clone for NodeHandle<In, Out> {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            graph: self.graph,
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<In, Out> std::fmt::Debug for NodeHandle<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodeHandle").field(&self.name).finish()
    }
}

struct EdgeDecl {
    from: usize,
    to: usize,
    steps: Vec<EdgeStep>,
}

/// Builder for a graph with input `In` and output `Out`
pub struct GraphBuilder<In, Out> {
    name: String,
    id: u64,
    nodes: Vec<Arc<dyn Node>>,
    edges: Vec<EdgeDecl>,
    tools: ToolSelection,
    errors: Vec<GraphValidationError>,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out> GraphBuilder<In, Out> {
    /// Create a builder with only the start and finish markers
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed),
            nodes: vec![
                Arc::new(IdentityNode::new(START_NODE)),
                Arc::new(IdentityNode::new(FINISH_NODE)),
            ],
            edges: Vec::new(),
            tools: ToolSelection::All,
            errors: Vec::new(),
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Restrict the tools nodes of this graph may use
    pub fn with_tools(mut self, tools: ToolSelection) -> Self {
        self.tools = tools;
        self
    }

    pub fn set_tools(&mut self, tools: ToolSelection) {
        self.tools = tools;
    }

    /// The start marker: passes the graph input through
    pub fn start(&self) -> NodeHandle<In, In> {
        self.handle(START)
    }

    /// The finish marker: whatever reaches it is the graph's result
    pub fn finish(&self) -> NodeHandle<Out, Out> {
        self.handle(FINISH)
    }

    /// Add a node definition
    pub fn node<I, O>(&mut self, def: NodeDef<I, O>) -> NodeHandle<I, O> {
        self.push(def.into_node())
    }

    /// Define and add a node from an async closure
    pub fn add<I, O, F, Fut>(&mut self, name: impl Into<String>, f: F) -> NodeHandle<I, O>
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(ExecutionContext, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O>> + Send + 'static,
    {
        self.node(NodeDef::new(name, f))
    }

    /// Add a built subgraph as one node
    pub fn subgraph<I, O>(&mut self, subgraph: Subgraph<I, O>) -> NodeHandle<I, O> {
        self.node(subgraph.into_node())
    }

    /// Add a node running `branches` concurrently and merging their outputs
    pub fn parallel<I, B, O, M>(
        &mut self,
        name: impl Into<String>,
        branches: Vec<NodeDef<I, B>>,
        merge: M,
    ) -> NodeHandle<I, O>
    where
        B: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        M: MergeStrategy<B, O> + 'static,
    {
        let name = name.into();
        if branches.len() < 2 {
            self.errors.push(GraphValidationError::TooFewBranches {
                node: name.clone(),
                count: branches.len(),
            });
        }
        let branches = branches.into_iter().map(NodeDef::into_node).collect();
        self.push(Arc::new(ParallelNode::new(name, branches, Box::new(merge))))
    }

    /// Declare an edge whose chain is built by `spec`
    ///
    /// Edges from one node are tried in the order they are declared here.
    pub fn edge<A, B, D, C, F>(&mut self, from: &NodeHandle<A, B>, to: &NodeHandle<C, D>, spec: F)
    where
        F: FnOnce(EdgeSpec<B, B>) -> EdgeSpec<B, C>,
    {
        let location = format!("{} -> {}", from.name, to.name);
        let spec = spec(EdgeSpec::new(location));
        self.push_edge(from.index, from.graph, &from.name, to.index, to.graph, &to.name, spec.steps);
    }

    /// Unconditional edge passing the output through unchanged
    pub fn then<A, B, C>(&mut self, from: &NodeHandle<A, B>, to: &NodeHandle<B, C>) {
        self.push_edge(from.index, from.graph, &from.name, to.index, to.graph, &to.name, Vec::new());
    }

    /// Check structure and freeze the graph
    fn build_core(self) -> Result<GraphCore> {
        let names: Vec<String> = self.nodes.iter().map(|n| n.name().to_string()).collect();
        let pairs: Vec<(usize, usize)> = self.edges.iter().map(|e| (e.from, e.to)).collect();

        let mut errors = self.errors;
        errors.extend(validate_structure(&names, &pairs));
        if !errors.is_empty() {
            log::warn!("Graph '{}' failed validation with {} errors", self.name, errors.len());
            return Err(EngineError::GraphBuild {
                graph: self.name,
                errors,
            });
        }

        let mut outgoing: Vec<Vec<Edge>> = vec![Vec::new(); self.nodes.len()];
        for decl in self.edges {
            outgoing[decl.from].push(Edge {
                target: decl.to,
                steps: decl.steps,
            });
        }

        log::debug!(
            "Built graph '{}' with {} nodes and {} edges",
            self.name,
            names.len(),
            pairs.len()
        );
        Ok(GraphCore::new(self.name, self.nodes, outgoing, self.tools))
    }

    fn handle<I, O>(&self, index: usize) -> NodeHandle<I, O> {
        NodeHandle {
            index,
            graph: self.id,
            name: self.nodes[index].name().to_string(),
            _marker: PhantomData,
        }
    }

    fn push<I, O>(&mut self, node: Arc<dyn Node>) -> NodeHandle<I, O> {
        self.nodes.push(node);
        self.handle(self.nodes.len() - 1)
    }

    #[allow(clippy::too_many_arguments)]
    fn push_edge(
        &mut self,
        from: usize,
        from_graph: u64,
        from_name: &str,
        to: usize,
        to_graph: u64,
        to_name: &str,
        steps: Vec<EdgeStep>,
    ) {
        let mut foreign = false;
        for (graph, name) in [(from_graph, from_name), (to_graph, to_name)] {
            if graph != self.id {
                foreign = true;
                self.errors.push(GraphValidationError::ForeignNode {
                    node: name.to_string(),
                });
            }
        }
        if !foreign {
            self.edges.push(EdgeDecl { from, to, steps });
        }
    }
}

impl<In, Out> GraphBuilder<In, Out>
where
    In: Serialize,
    Out: DeserializeOwned,
{
    /// Build a graph usable as a node of another graph
    pub fn build_subgraph(self) -> Result<Subgraph<In, Out>> {
        Ok(Subgraph::new(self.build_core()?))
    }

    /// Build the root graph of an agent
    pub fn build_strategy(self) -> Result<Strategy<In, Out>> {
        Ok(Strategy::new(self.build_core()?))
    }
}

impl<In, Out> std::fmt::Debug for GraphBuilder<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.nodes.iter().map(|n| n.name()).collect();
        f.debug_struct("GraphBuilder")
            .field("name", &self.name)
            .field("nodes", &names)
            .field("edges", &self.edges.len())
            .finish()
    }
}
