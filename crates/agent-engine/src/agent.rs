//! Agent runner
//!
//! An [`Agent`] binds a strategy to everything one run needs: the LLM
//! client, the tool registry, the system prompt and model, the engine
//! config, event sinks and an optional checkpointer. Every `run` starts a
//! fresh session and execution ID.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::checkpoint::{AgentCheckpoint, Checkpointer};
use crate::config::EngineConfig;
use crate::context::{ContextBuilder, ExecutionContext};
use crate::error::{EngineError, Result};
use crate::events::{EventBus, EventSink};
use crate::graph::Strategy;
use crate::llm::{LlmClient, LlmModel};
use crate::message::Message;
use crate::tools::ToolRegistry;

/// Builder for [`Agent`]
pub struct AgentBuilder<In, Out> {
    strategy: Strategy<In, Out>,
    llm: Arc<dyn LlmClient>,
    tools: ToolRegistry,
    system_prompt: Option<String>,
    model: Option<LlmModel>,
    config: EngineConfig,
    events: EventBus,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl<In, Out> AgentBuilder<In, Out>
where
    In: Serialize,
    Out: DeserializeOwned,
{
    pub fn new(strategy: Strategy<In, Out>, llm: Arc<dyn LlmClient>) -> Self {
        Self {
            strategy,
            llm,
            tools: ToolRegistry::new(),
            system_prompt: None,
            model: None,
            config: EngineConfig::default(),
            events: EventBus::new(),
            checkpointer: None,
        }
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    /// System message every run's session starts with
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Model used for requests; overrides the config's default model
    pub fn model(mut self, model: LlmModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events.add_sink(sink);
        self
    }

    pub fn checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Check that every tool the strategy names is registered
    pub fn build(self) -> Result<Agent<In, Out>> {
        for tool in self.strategy.referenced_tools() {
            if !self.tools.has_tool(&tool) {
                log::warn!(
                    "Strategy '{}' references unregistered tool '{}'",
                    self.strategy.name(),
                    tool
                );
                return Err(EngineError::ToolNotFound(tool));
            }
        }

        let mut config = self.config;
        if let Some(model) = self.model {
            config = config.with_default_model(model);
        }

        log::info!(
            "Built agent for strategy '{}' with {} tools",
            self.strategy.name(),
            self.tools.len()
        );
        Ok(Agent {
            strategy: self.strategy,
            llm: self.llm,
            tools: Arc::new(self.tools),
            system_prompt: self.system_prompt,
            config,
            events: self.events,
            checkpointer: self.checkpointer,
        })
    }
}

/// A ready-to-run agent
pub struct Agent<In, Out> {
    strategy: Strategy<In, Out>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolRegistry>,
    system_prompt: Option<String>,
    config: EngineConfig,
    events: EventBus,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

impl<In, Out> Agent<In, Out>
where
    In: Serialize,
    Out: DeserializeOwned,
{
    pub fn builder(strategy: Strategy<In, Out>, llm: Arc<dyn LlmClient>) -> AgentBuilder<In, Out> {
        AgentBuilder::new(strategy, llm)
    }

    pub fn strategy(&self) -> &Strategy<In, Out> {
        &self.strategy
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A root context with a fresh session and execution ID
    pub fn new_context(&self) -> ExecutionContext {
        self.context_builder().build()
    }

    /// Run the strategy in a fresh context
    pub async fn run(&self, input: In) -> Result<Out> {
        let ctx = self.new_context();
        self.run_in(&ctx, input).await
    }

    /// Run the strategy in a caller-provided context
    pub async fn run_in(&self, ctx: &ExecutionContext, input: In) -> Result<Out> {
        log::debug!(
            "Running strategy '{}' as {}",
            self.strategy.name(),
            ctx.execution_id()
        );
        self.strategy.run(ctx, input).await
    }

    /// Continue the run a checkpoint was taken from
    pub async fn resume(&self, checkpoint: &AgentCheckpoint) -> Result<Out> {
        if checkpoint.strategy != self.strategy.name() {
            return Err(EngineError::Checkpoint(format!(
                "Checkpoint {} belongs to strategy '{}', not '{}'",
                checkpoint.checkpoint_id,
                checkpoint.strategy,
                self.strategy.name()
            )));
        }
        let ctx = self
            .context_builder()
            .execution_id(checkpoint.execution_id.clone())
            .build();
        self.strategy.resume(&ctx, checkpoint).await
    }

    /// Continue an execution from its most recent checkpoint
    pub async fn resume_latest(&self, execution_id: &str) -> Result<Out> {
        let checkpointer = self
            .checkpointer
            .as_ref()
            .ok_or_else(|| EngineError::Checkpoint("No checkpointer attached".to_string()))?;
        let checkpoint = checkpointer
            .latest_checkpoint(execution_id)
            .await?
            .ok_or_else(|| EngineError::Checkpoint(format!("No checkpoint for execution '{}'", execution_id)))?;
        self.resume(&checkpoint).await
    }

    fn context_builder(&self) -> ContextBuilder {
        let mut builder = ExecutionContext::builder(self.llm.clone())
            .strategy(self.strategy.name())
            .tools(self.tools.clone())
            .events(self.events.clone())
            .config(self.config.clone());
        if let Some(checkpointer) = &self.checkpointer {
            builder = builder.checkpointer(checkpointer.clone());
        }
        if let Some(prompt) = &self.system_prompt {
            builder = builder.message(Message::system(prompt.clone()));
        }
        builder
    }
}

impl<In, Out> std::fmt::Debug for Agent<In, Out> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("strategy", &self.strategy)
            .field("tools", &self.tools.names())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
