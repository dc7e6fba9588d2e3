//! Parallel node execution and merge strategies
//!
//! A parallel node runs a fixed list of branch nodes concurrently on copies
//! of the same input. Each branch runs as its own task on a fork of the
//! session, so no branch writes to the parent session. When every branch
//! succeeds, the merge strategy receives all results in declaration order
//! and decides the node's output, optionally handing back the session of
//! the branch it picked for the parent to adopt. When a branch fails, the
//! remaining branches are aborted, the merge never runs and the node fails
//! with [`EngineError::Aggregate`].

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::events::AgentEvent;
use crate::node::{decode, encode, Node};
use crate::session::SessionState;

/// The output of one successful branch
#[derive(Debug, Clone)]
pub struct BranchResult<B> {
    /// Branch node name
    pub branch: String,
    /// Position in declaration order
    pub index: usize,
    pub output: B,
    /// Session state the branch ended with
    pub session: SessionState,
}

/// What a merge decides
#[derive(Debug, Clone)]
pub struct MergeOutcome<O> {
    pub output: O,
    /// Session state to install in the parent; `None` keeps the parent's
    pub adopt: Option<SessionState>,
}

impl<O> MergeOutcome<O> {
    /// Keep the parent session as it was before the fork
    pub fn keep_parent(output: O) -> Self {
        Self { output, adopt: None }
    }

    /// Replace the parent session with a branch's session
    pub fn adopt(output: O, session: SessionState) -> Self {
        Self {
            output,
            adopt: Some(session),
        }
    }
}

/// Reduces branch results into the parallel node's output
///
/// Called exactly once per parallel invocation, and only when every branch
/// succeeded. May do further work, including LLM calls through `ctx`.
#[async_trait]
pub trait MergeStrategy<B, O>: Send + Sync {
    async fn merge(&self, ctx: &ExecutionContext, results: Vec<BranchResult<B>>) -> Result<MergeOutcome<O>>;
}

/// Pick the output with the highest score; ties go to the first declared branch
pub fn select_by_max<B, K, F>(score: F) -> SelectByMax<F, K>
where
    F: Fn(&B) -> K + Send + Sync,
    K: PartialOrd,
{
    SelectByMax {
        score,
        _marker: PhantomData,
    }
}

pub struct SelectByMax<F, K> {
    score: F,
    _marker: PhantomData<fn() -> K>,
}

#[async_trait]
impl<B, K, F> MergeStrategy<B, B> for SelectByMax<F, K>
where
    B: Send + 'static,
    K: PartialOrd,
    F: Fn(&B) -> K + Send + Sync,
{
    async fn merge(&self, _ctx: &ExecutionContext, results: Vec<BranchResult<B>>) -> Result<MergeOutcome<B>> {
        let mut best: Option<(K, BranchResult<B>)> = None;
        for result in results {
            let score = (self.score)(&result.output);
            let better = match &best {
                Some((top, _)) => score > *top,
                None => true,
            };
            if better {
                best = Some((score, result));
            }
        }
        let (_, chosen) = best.ok_or_else(|| EngineError::failed("No branch results to select from"))?;
        Ok(MergeOutcome::adopt(chosen.output, chosen.session))
    }
}

/// Let an async function pick the index of the output to keep
///
/// The function sees every output in declaration order, which makes it a
/// natural place for an LLM to judge between branches.
pub fn select_by_index<B, F, Fut>(pick: F) -> SelectByIndex<F>
where
    F: Fn(ExecutionContext, Vec<B>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<usize>> + Send + 'static,
{
    SelectByIndex { pick }
}

pub struct SelectByIndex<F> {
    pick: F,
}

#[async_trait]
impl<B, F, Fut> MergeStrategy<B, B> for SelectByIndex<F>
where
    B: Clone + Send + 'static,
    F: Fn(ExecutionContext, Vec<B>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<usize>> + Send + 'static,
{
    async fn merge(&self, ctx: &ExecutionContext, results: Vec<BranchResult<B>>) -> Result<MergeOutcome<B>> {
        let outputs: Vec<B> = results.iter().map(|r| r.output.clone()).collect();
        let index = (self.pick)(ctx.clone(), outputs).await?;
        let count = results.len();
        let chosen = results.into_iter().nth(index).ok_or_else(|| {
            EngineError::failed(format!("Selected branch index {} out of {} branches", index, count))
        })?;
        Ok(MergeOutcome::adopt(chosen.output, chosen.session))
    }
}

/// Pick the first output, in declaration order, that satisfies `predicate`
pub fn select_by<B, F>(predicate: F) -> SelectBy<F>
where
    F: Fn(&B) -> bool + Send + Sync,
{
    SelectBy { predicate }
}

pub struct SelectBy<F> {
    predicate: F,
}

#[async_trait]
impl<B, F> MergeStrategy<B, B> for SelectBy<F>
where
    B: Send + 'static,
    F: Fn(&B) -> bool + Send + Sync,
{
    async fn merge(&self, _ctx: &ExecutionContext, results: Vec<BranchResult<B>>) -> Result<MergeOutcome<B>> {
        let chosen = results
            .into_iter()
            .find(|r| (self.predicate)(&r.output))
            .ok_or_else(|| EngineError::failed("No branch output matched the selection predicate"))?;
        Ok(MergeOutcome::adopt(chosen.output, chosen.session))
    }
}

/// Combine every output into one value, keeping the parent session
pub fn fold<B, O, F>(init: O, f: F) -> Fold<O, F>
where
    O: Clone + Send + Sync,
    F: Fn(O, B) -> O + Send + Sync,
{
    Fold { init, f }
}

pub struct Fold<O, F> {
    init: O,
    f: F,
}

#[async_trait]
impl<B, O, F> MergeStrategy<B, O> for Fold<O, F>
where
    B: Send + 'static,
    O: Clone + Send + Sync,
    F: Fn(O, B) -> O + Send + Sync,
{
    async fn merge(&self, _ctx: &ExecutionContext, results: Vec<BranchResult<B>>) -> Result<MergeOutcome<O>> {
        let output = results
            .into_iter()
            .fold(self.init.clone(), |acc, r| (self.f)(acc, r.output));
        Ok(MergeOutcome::keep_parent(output))
    }
}

/// Custom merge from an async closure over the full branch results
pub fn merge_with<B, O, F, Fut>(f: F) -> MergeFn<F>
where
    F: Fn(ExecutionContext, Vec<BranchResult<B>>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<MergeOutcome<O>>> + Send + 'static,
{
    MergeFn { f }
}

pub struct MergeFn<F> {
    f: F,
}

#[async_trait]
impl<B, O, F, Fut> MergeStrategy<B, O> for MergeFn<F>
where
    B: Send + 'static,
    O: Send + 'static,
    F: Fn(ExecutionContext, Vec<BranchResult<B>>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<MergeOutcome<O>>> + Send + 'static,
{
    async fn merge(&self, ctx: &ExecutionContext, results: Vec<BranchResult<B>>) -> Result<MergeOutcome<O>> {
        (self.f)(ctx.clone(), results).await
    }
}

/// The type-erased parallel node stored in a graph
pub(crate) struct ParallelNode<B, O> {
    name: String,
    branches: Vec<Arc<dyn Node>>,
    merge: Box<dyn MergeStrategy<B, O>>,
}

impl<B, O> ParallelNode<B, O> {
    pub(crate) fn new(name: String, branches: Vec<Arc<dyn Node>>, merge: Box<dyn MergeStrategy<B, O>>) -> Self {
        Self { name, branches, merge }
    }
}

type BranchOutcome = (usize, Result<(Value, SessionState)>);

#[async_trait]
impl<B, O> Node for ParallelNode<B, O>
where
    B: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &ExecutionContext, input: Value) -> Result<Value> {
        let permits = Arc::new(Semaphore::new(ctx.config().max_parallel_branches.max(1)));
        let mut set: JoinSet<BranchOutcome> = JoinSet::new();

        for (index, branch) in self.branches.iter().enumerate() {
            let branch_ctx = ctx.fork_for_branch(&self.name, branch.name())?;
            let node = branch.clone();
            let input = input.clone();
            let permits = permits.clone();
            let parent = self.name.clone();

            set.spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Err(EngineError::Cancelled)),
                };
                branch_ctx.emit(AgentEvent::ParallelBranchStarted {
                    execution_id: branch_ctx.execution_id().to_string(),
                    node: parent,
                    branch: node.name().to_string(),
                    index,
                });
                let outcome = std::panic::AssertUnwindSafe(node.execute(&branch_ctx, input))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        Err(EngineError::failed(format!("Branch '{}' panicked", node.name())))
                    })
                    .and_then(|output| Ok((output, branch_ctx.session().snapshot()?)));
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<(Value, SessionState)>> = vec![None; self.branches.len()];
        while let Some(joined) = set.join_next().await {
            let (index, outcome) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    set.abort_all();
                    return Err(EngineError::failed(format!("Parallel branch task failed: {}", e)));
                }
            };
            let branch = self.branches[index].name().to_string();
            match outcome {
                Ok(done) => {
                    ctx.emit(AgentEvent::ParallelBranchCompleted {
                        execution_id: ctx.execution_id().to_string(),
                        node: self.name.clone(),
                        branch,
                        index,
                    });
                    slots[index] = Some(done);
                }
                Err(source) => {
                    log::debug!("Parallel branch '{}' of '{}' failed: {}", branch, self.name, source);
                    set.abort_all();
                    return Err(EngineError::Aggregate {
                        branch,
                        index,
                        source: Box::new(source),
                    });
                }
            }
        }

        let mut results = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            let branch = self.branches[index].name().to_string();
            let (value, session) =
                slot.ok_or_else(|| EngineError::failed(format!("Branch '{}' produced no result", branch)))?;
            let location = format!("{}[{}]", self.name, branch);
            results.push(BranchResult {
                output: decode(&location, value)?,
                branch,
                index,
                session,
            });
        }

        let outcome = self.merge.merge(ctx, results).await?;
        if let Some(session) = outcome.adopt {
            ctx.session().restore(session)?;
        }
        encode(&self.name, &outcome.output)
    }

    fn referenced_tools(&self) -> Vec<String> {
        self.branches.iter().flat_map(|b| b.referenced_tools()).collect()
    }
}
