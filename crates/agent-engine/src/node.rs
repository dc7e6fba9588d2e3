//! Node abstraction
//!
//! Graphs store nodes type-erased behind [`Node`], exchanging
//! `serde_json::Value`s. The typed side of the API is [`NodeDef<In, Out>`]:
//! a node body written against concrete Rust types, converted at the
//! boundary. A conversion failure is reported as
//! [`EngineError::TypeMismatch`] naming the node.
//!
//! A node owns no state beyond what its closure captures. Captured state is
//! private to that node instance; a single instance may run concurrently
//! when it is reused across parallel branches, so captured state must carry
//! its own synchronization (atomics, mutexes).

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};

/// A named unit of computation with one input and one output
#[async_trait]
pub trait Node: Send + Sync {
    /// Name, unique within the enclosing graph
    fn name(&self) -> &str;

    /// Produce exactly one output for one input
    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<Value>;

    /// Continue a checkpointed run somewhere inside this node
    ///
    /// `path` names the position below this node. Only composite nodes
    /// have an inside to resume into.
    async fn resume(&self, ctx: &ExecutionContext, path: &[String], input: Value) -> Result<Value> {
        let _ = (ctx, input);
        Err(EngineError::Checkpoint(format!(
            "Node '{}' cannot resume at {:?}",
            self.name(),
            path
        )))
    }

    /// Tool names this node or its children restrict themselves to
    fn referenced_tools(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Decode a node input into its declared type
pub fn decode<T: DeserializeOwned>(location: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| EngineError::type_mismatch(location, e))
}

/// Encode a node output
pub fn encode<T: Serialize>(location: &str, value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| EngineError::type_mismatch(location, e))
}

/// Node backed by an async closure over typed input and output
pub struct FnNode<In, Out, F> {
    name: String,
    f: F,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out, F, Fut> FnNode<In, Out, F>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    F: Fn(ExecutionContext, In) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Out>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<In, Out, F, Fut> Node for FnNode<In, Out, F>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    F: Fn(ExecutionContext, In) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Out>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<Value> {
        let input: In = decode(&self.name, input)?;
        let output = (self.f)(ctx.clone(), input).await?;
        encode(&self.name, &output)
    }
}

/// Passthrough used for the start and finish markers and `identity` nodes
pub struct IdentityNode {
    name: String,
}

impl IdentityNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Node for IdentityNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &ExecutionContext, input: Value) -> Result<Value> {
        Ok(input)
    }
}

/// A typed node definition, ready to be added to a graph
pub struct NodeDef<In, Out> {
    node: Arc<dyn Node>,
    _marker: PhantomData<fn(In) -> Out>,
}

impl<In, Out> NodeDef<In, Out>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    /// Define a node from an async closure
    ///
    /// The closure receives an owned context handle, so the returned future
    /// borrows nothing.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ExecutionContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out>> + Send + 'static,
    {
        Self::from_node(FnNode::new(name, f))
    }
}

impl<In, Out> NodeDef<In, Out> {
    /// Wrap a hand-written node whose values encode as `In` and `Out`
    pub fn from_node(node: impl Node + 'static) -> Self {
        Self::from_shared(Arc::new(node))
    }

    pub fn from_shared(node: Arc<dyn Node>) -> Self {
        Self {
            node,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn into_node(self) -> Arc<dyn Node> {
        self.node
    }
}

impl<T> NodeDef<T, T> {
    /// A node that returns its input unchanged
    pub fn identity(name: impl Into<String>) -> Self {
        Self::from_node(IdentityNode::new(name))
    }
}

impl<In, Out> Clone for NodeDef<In, Out> {
    fn clone(&self) -> Self {
        Self::from_shared(self.node.clone())
    }
}

impl<In, Out> std::fmt::Debug for NodeDef<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("NodeDef").field(&self.node.name()).finish()
    }
}
