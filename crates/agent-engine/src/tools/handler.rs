//! Tool handler trait and closure adapters

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};

/// What a tool returns: structured JSON or raw text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolOutput {
    Structured(Value),
    Raw(String),
}

impl ToolOutput {
    /// Text form fed back to the LLM
    pub fn to_text(&self) -> String {
        match self {
            Self::Structured(Value::String(s)) => s.clone(),
            Self::Structured(value) => value.to_string(),
            Self::Raw(text) => text.clone(),
        }
    }

    pub fn structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Raw(_) => None,
        }
    }
}

/// Executes one tool
///
/// Handlers receive arguments that already passed descriptor validation.
/// Any error they return is wrapped by the registry into
/// [`EngineError::ToolExecution`].
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(&self, args: Value) -> Result<ToolOutput>;
}

/// Handler backed by an async closure over raw JSON arguments
pub struct FnTool<F> {
    f: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for FnTool<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput>> + Send + 'static,
{
    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        (self.f)(args).await
    }
}

/// Handler backed by an async closure over typed arguments and result
///
/// Arguments are deserialized into `A`; the result `R` is serialized into
/// [`ToolOutput::Structured`].
pub struct TypedTool<A, R, F> {
    f: F,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R, F, Fut> TypedTool<A, R, F>
where
    A: DeserializeOwned + Send,
    R: Serialize + Send,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<A, R, F, Fut> ToolHandler for TypedTool<A, R, F>
where
    A: DeserializeOwned + Send,
    R: Serialize + Send,
    F: Fn(A) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    async fn execute(&self, args: Value) -> Result<ToolOutput> {
        let typed: A =
            serde_json::from_value(args).map_err(|e| EngineError::InvalidArguments(e.to_string()))?;
        let result = (self.f)(typed).await?;
        Ok(ToolOutput::Structured(serde_json::to_value(result)?))
    }
}
