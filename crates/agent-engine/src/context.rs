//! Execution context handed to every node
//!
//! The context is a cheap-to-clone bundle of shared handles: the live
//! session, the tool registry and the tool scope of the enclosing graph, the
//! LLM client, the event bus, run-scoped storage, the engine config and an
//! optional checkpointer. Entering a subgraph or a parallel branch derives a
//! new context; nothing is copied except handles.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;

use crate::checkpoint::{AgentCheckpoint, Checkpointer};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{AgentEvent, EventBus, EventSink};
use crate::llm::{LlmClient, LlmModel};
use crate::message::{Message, ToolCall};
use crate::session::{Prompt, Session, SessionState};
use crate::storage::AgentStorage;
use crate::tools::{ToolDescriptor, ToolOutput, ToolRegistry, ToolSelection};

/// Name of the scope used by the root strategy when no name is given
pub const ROOT_SCOPE: &str = "root";

/// The tool subset visible to one graph
#[derive(Debug, Clone, PartialEq)]
pub struct ToolScope {
    pub name: String,
    pub selection: ToolSelection,
}

/// Per-run handles shared by every derived context
struct RunShared {
    execution_id: String,
    strategy: String,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn LlmClient>,
    events: EventBus,
    storage: AgentStorage,
    config: EngineConfig,
    checkpointer: Option<Arc<dyn Checkpointer>>,
}

/// Everything a node can reach while it runs
#[derive(Clone)]
pub struct ExecutionContext {
    run: Arc<RunShared>,
    session: Arc<Session>,
    scope: Arc<ToolScope>,
    /// Names of the enclosing composite nodes, outermost first
    path: Vec<String>,
    /// Set inside parallel branches, whose sessions are forks
    in_branch: bool,
}

impl ExecutionContext {
    pub fn builder(llm: Arc<dyn LlmClient>) -> ContextBuilder {
        ContextBuilder::new(llm)
    }

    pub fn execution_id(&self) -> &str {
        &self.run.execution_id
    }

    pub fn strategy_name(&self) -> &str {
        &self.run.strategy
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.run.tools
    }

    pub fn scope(&self) -> &ToolScope {
        &self.scope
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.run.llm
    }

    pub fn storage(&self) -> &AgentStorage {
        &self.run.storage
    }

    pub fn config(&self) -> &EngineConfig {
        &self.run.config
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn in_parallel_branch(&self) -> bool {
        self.in_branch
    }

    /// Run `f` with a read-only view of the session
    pub fn read_session<R>(&self, f: impl FnOnce(&SessionState) -> R) -> Result<R> {
        self.session.read_session(f)
    }

    /// Run `f` with exclusive access to the session
    pub fn write_session<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Result<R> {
        self.session.write_session(f)
    }

    pub fn emit(&self, event: AgentEvent) {
        self.run.events.emit(event);
    }

    /// Descriptors of the tools this scope may use
    pub fn visible_tools(&self) -> Vec<ToolDescriptor> {
        self.run.tools.select(&self.scope.selection)
    }

    /// Invoke a tool on behalf of the LLM
    ///
    /// Fails with `ToolNotFound` for an unregistered tool and with
    /// `ToolNotAvailable` for a tool outside the current scope.
    pub async fn invoke_tool(&self, call: &ToolCall) -> Result<ToolOutput> {
        if !self.run.tools.has_tool(&call.tool) {
            return Err(EngineError::ToolNotFound(call.tool.clone()));
        }
        if !self.scope.selection.allows(&call.tool) {
            return Err(EngineError::ToolNotAvailable {
                tool: call.tool.clone(),
                scope: self.scope.name.clone(),
            });
        }

        self.emit(AgentEvent::ToolCallStarted {
            execution_id: self.execution_id().to_string(),
            call_id: call.id.clone(),
            tool: call.tool.clone(),
            args: call.args.clone(),
        });

        let outcome = self.run.tools.invoke(&call.tool, call.args.clone()).await;
        match &outcome {
            Ok(output) => self.emit(AgentEvent::ToolCallCompleted {
                execution_id: self.execution_id().to_string(),
                call_id: call.id.clone(),
                tool: call.tool.clone(),
                result: output.to_text(),
            }),
            Err(e) => {
                log::debug!("Tool '{}' failed: {}", call.tool, e);
                self.emit(AgentEvent::ToolCallFailed {
                    execution_id: self.execution_id().to_string(),
                    call_id: call.id.clone(),
                    tool: call.tool.clone(),
                    error: e.to_string(),
                });
            }
        }
        outcome
    }

    /// Request one response with the session's active tools; the response is appended
    pub async fn request_llm(&self) -> Result<Message> {
        let tools = self.read_session(|s| s.tools.clone())?;
        self.request_with(tools).await
    }

    /// Request one response offering no tools; the response is appended
    pub async fn request_llm_without_tools(&self) -> Result<Message> {
        self.request_with(Vec::new()).await
    }

    /// Request a multi-message response; every message is appended
    pub async fn request_llm_multiple(&self) -> Result<Vec<Message>> {
        let (prompt, model, tools) = self.request_inputs()?;
        let request_id = self.llm_started(&model, &tools);
        let responses = self
            .run
            .llm
            .request_completion_multiple(&prompt, &model, &tools)
            .await;
        let responses: Vec<Message> = self
            .llm_outcome(&request_id, responses)?
            .into_iter()
            .map(|m| m.with_request_id(request_id.clone()))
            .collect();
        let appended = responses.clone();
        self.write_session(|s| s.prompt.messages.extend(appended))?;
        self.llm_completed(&request_id, responses.len());
        Ok(responses)
    }

    /// Stream a response, returning the accumulated text
    ///
    /// Chunks are emitted as `StreamChunk` events when enabled. The full text
    /// is appended as one assistant message once the stream ends.
    pub async fn request_llm_streaming(&self) -> Result<String> {
        let (prompt, model, tools) = self.request_inputs()?;
        let request_id = self.llm_started(&model, &tools);
        let text = self.collect_stream(&request_id, &prompt, &model, &tools).await;
        let text = self.llm_outcome(&request_id, text)?;

        self.session
            .append(Message::assistant(text.clone()).with_request_id(request_id.clone()))?;
        self.llm_completed(&request_id, 1);
        Ok(text)
    }

    /// Request a response for an ad-hoc prompt, leaving the session untouched
    pub async fn request_llm_detached(&self, prompt: &Prompt) -> Result<Message> {
        let model = self.read_session(|s| s.model.clone())?;
        let request_id = self.llm_started(&model, &[]);
        let response = self.run.llm.request_completion(prompt, &model, &[]).await;
        let response = self
            .llm_outcome(&request_id, response)?
            .with_request_id(request_id.clone());
        self.llm_completed(&request_id, 1);
        Ok(response)
    }

    async fn request_with(&self, tools: Vec<ToolDescriptor>) -> Result<Message> {
        let (prompt, model) = self.read_session(|s| (s.prompt.clone(), s.model.clone()))?;
        let request_id = self.llm_started(&model, &tools);
        let response = self.run.llm.request_completion(&prompt, &model, &tools).await;
        let response = self
            .llm_outcome(&request_id, response)?
            .with_request_id(request_id.clone());
        self.session.append(response.clone())?;
        self.llm_completed(&request_id, 1);
        Ok(response)
    }

    async fn collect_stream(
        &self,
        request_id: &str,
        prompt: &Prompt,
        model: &LlmModel,
        tools: &[ToolDescriptor],
    ) -> Result<String> {
        let mut stream = self.run.llm.stream_completion(prompt, model, tools).await?;
        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if self.config().emit_stream_chunks {
                self.emit(AgentEvent::StreamChunk {
                    execution_id: self.execution_id().to_string(),
                    request_id: request_id.to_string(),
                    chunk: chunk.clone(),
                });
            }
            text.push_str(&chunk);
        }
        Ok(text)
    }

    fn request_inputs(&self) -> Result<(Prompt, LlmModel, Vec<ToolDescriptor>)> {
        self.read_session(|s| (s.prompt.clone(), s.model.clone(), s.tools.clone()))
    }

    fn llm_started(&self, model: &LlmModel, tools: &[ToolDescriptor]) -> String {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.emit(AgentEvent::LlmCallStarted {
            execution_id: self.execution_id().to_string(),
            request_id: request_id.clone(),
            model: model.to_string(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });
        request_id
    }

    /// Close a started call with `LlmCallFailed` when the provider failed
    fn llm_outcome<T>(&self, request_id: &str, outcome: Result<T>) -> Result<T> {
        if let Err(e) = &outcome {
            log::debug!("LLM request {} failed: {}", request_id, e);
            self.emit(AgentEvent::LlmCallFailed {
                execution_id: self.execution_id().to_string(),
                request_id: request_id.to_string(),
                error: e.to_string(),
            });
        }
        outcome
    }

    fn llm_completed(&self, request_id: &str, responses: usize) {
        self.emit(AgentEvent::LlmCallCompleted {
            execution_id: self.execution_id().to_string(),
            request_id: request_id.to_string(),
            responses,
        });
    }

    /// Derive the context of a nested graph with its own tool scope
    pub fn enter_subgraph(&self, name: &str, selection: ToolSelection) -> ExecutionContext {
        let mut path = self.path.clone();
        path.push(name.to_string());
        ExecutionContext {
            run: self.run.clone(),
            session: self.session.clone(),
            scope: Arc::new(ToolScope {
                name: name.to_string(),
                selection,
            }),
            path,
            in_branch: self.in_branch,
        }
    }

    /// Same position, different tool scope
    pub fn with_tool_scope(&self, name: &str, selection: ToolSelection) -> ExecutionContext {
        ExecutionContext {
            scope: Arc::new(ToolScope {
                name: name.to_string(),
                selection,
            }),
            ..self.clone()
        }
    }

    /// Derive the context of a parallel branch running on a forked session
    pub fn fork_for_branch(&self, node: &str, branch: &str) -> Result<ExecutionContext> {
        let session = self
            .session
            .fork(format!("{}/{}/{}", self.session.id(), node, branch))?;
        let mut path = self.path.clone();
        path.push(node.to_string());
        Ok(ExecutionContext {
            run: self.run.clone(),
            session: Arc::new(session),
            scope: self.scope.clone(),
            path,
            in_branch: true,
        })
    }

    /// Store a checkpoint positioned at `node` with its pending input
    ///
    /// Returns `None` when no checkpointer is attached or inside a parallel
    /// branch, whose forked state cannot be resumed on its own.
    pub async fn create_checkpoint(&self, node: &str, pending_input: &Value) -> Result<Option<String>> {
        let Some(checkpointer) = &self.run.checkpointer else {
            return Ok(None);
        };
        if self.in_branch {
            return Ok(None);
        }

        let mut node_path = self.path.clone();
        node_path.push(node.to_string());
        let checkpoint = AgentCheckpoint::new(
            self.execution_id(),
            self.strategy_name(),
            node_path.clone(),
            pending_input.clone(),
            self.session.snapshot()?,
        );
        let checkpoint_id = checkpointer.create_checkpoint(&checkpoint).await?;
        log::debug!("Checkpoint {} created at {:?}", checkpoint_id, node_path);
        self.emit(AgentEvent::CheckpointCreated {
            execution_id: self.execution_id().to_string(),
            checkpoint_id: checkpoint_id.clone(),
            node_path,
        });
        Ok(Some(checkpoint_id))
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("execution_id", &self.run.execution_id)
            .field("strategy", &self.run.strategy)
            .field("scope", &self.scope.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Assembles a root [`ExecutionContext`]
pub struct ContextBuilder {
    llm: Arc<dyn LlmClient>,
    execution_id: Option<String>,
    strategy: String,
    tools: Arc<ToolRegistry>,
    events: EventBus,
    config: EngineConfig,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    session: Option<Session>,
    messages: Vec<Message>,
}

impl ContextBuilder {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            execution_id: None,
            strategy: ROOT_SCOPE.to_string(),
            tools: Arc::new(ToolRegistry::new()),
            events: EventBus::new(),
            config: EngineConfig::default(),
            checkpointer: None,
            session: None,
            messages: Vec::new(),
        }
    }

    pub fn execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy = name.into();
        self
    }

    pub fn tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events.add_sink(sink);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn checkpointer(mut self, checkpointer: Arc<dyn Checkpointer>) -> Self {
        self.checkpointer = Some(checkpointer);
        self
    }

    /// Use an existing session instead of a fresh one
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Seed a fresh session with a message
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn build(self) -> ExecutionContext {
        let execution_id = self
            .execution_id
            .unwrap_or_else(|| format!("agent-exec-{}", uuid::Uuid::new_v4()));
        let session = self.session.unwrap_or_else(|| {
            let prompt = Prompt::new(format!("prompt-{}", execution_id)).with_messages(self.messages);
            Session::new(
                format!("session-{}", execution_id),
                SessionState::new(prompt, self.config.default_model.clone()),
            )
        });

        ExecutionContext {
            run: Arc::new(RunShared {
                execution_id,
                strategy: self.strategy,
                tools: self.tools,
                llm: self.llm,
                events: self.events,
                storage: AgentStorage::new(),
                config: self.config,
                checkpointer: self.checkpointer,
            }),
            session: Arc::new(session),
            scope: Arc::new(ToolScope {
                name: ROOT_SCOPE.to_string(),
                selection: ToolSelection::All,
            }),
            path: Vec::new(),
            in_branch: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::InMemoryCheckpointer;
    use crate::events::VecEventSink;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{FnTool, ToolOutput};
    use serde_json::json;

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        for name in ["search", "calc"] {
            registry
                .register(
                    ToolDescriptor::new(name, "test tool"),
                    FnTool::new(move |_| async move { Ok(ToolOutput::Raw(format!("{} ok", name))) }),
                )
                .unwrap();
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_request_llm_appends_response() {
        let llm = Arc::new(ScriptedLlmClient::new().reply(Message::assistant("hi there")));
        let sink = Arc::new(VecEventSink::new());
        let ctx = ExecutionContext::builder(llm.clone())
            .sink(sink.clone())
            .message(Message::user("hello"))
            .build();

        let response = ctx.request_llm().await.unwrap();
        assert_eq!(response.content(), "hi there");
        assert!(response.meta().request_id.is_some());
        assert_eq!(ctx.session().message_count().unwrap(), 2);

        let kinds: Vec<&str> = sink.events().iter().map(AgentEvent::kind).collect();
        assert_eq!(kinds, vec!["llmCallStarted", "llmCallCompleted"]);
    }

    #[tokio::test]
    async fn test_failed_request_closes_the_call() {
        let llm = Arc::new(ScriptedLlmClient::new().fail("503").fail("503").fail("503"));
        let sink = Arc::new(VecEventSink::new());
        let ctx = ExecutionContext::builder(llm)
            .sink(sink.clone())
            .message(Message::user("hello"))
            .build();

        assert!(matches!(ctx.request_llm().await, Err(EngineError::Llm(_))));
        assert!(ctx.request_llm_multiple().await.is_err());
        assert!(ctx.request_llm_detached(&Prompt::new("adhoc")).await.is_err());

        let kinds: Vec<&str> = sink.events().iter().map(AgentEvent::kind).collect();
        assert_eq!(kinds, ["llmCallStarted", "llmCallFailed"].repeat(3));
        match (&sink.events()[0], &sink.events()[1]) {
            (
                AgentEvent::LlmCallStarted { request_id: started, .. },
                AgentEvent::LlmCallFailed { request_id: failed, error, .. },
            ) => {
                assert_eq!(started, failed);
                assert!(error.contains("503"));
            }
            other => panic!("Unexpected events {:?}", other),
        }
        assert_eq!(ctx.session().message_count().unwrap(), 1);
    }

    struct BrokenStream;

    #[async_trait::async_trait]
    impl LlmClient for BrokenStream {
        async fn request_completion(&self, _: &Prompt, _: &LlmModel, _: &[ToolDescriptor]) -> Result<Message> {
            Ok(Message::assistant("unused"))
        }

        async fn stream_completion(
            &self,
            _: &Prompt,
            _: &LlmModel,
            _: &[ToolDescriptor],
        ) -> Result<crate::llm::TextStream> {
            let chunks = vec![Ok("partial ".to_string()), Err(EngineError::llm("connection reset"))];
            Ok(futures_util::stream::iter(chunks).boxed())
        }
    }

    #[tokio::test]
    async fn test_stream_error_closes_the_call() {
        let sink = Arc::new(VecEventSink::new());
        let ctx = ExecutionContext::builder(Arc::new(BrokenStream))
            .sink(sink.clone())
            .build();

        assert!(ctx.request_llm_streaming().await.is_err());

        let kinds: Vec<&str> = sink.events().iter().map(AgentEvent::kind).collect();
        assert_eq!(kinds, vec!["llmCallStarted", "streamChunk", "llmCallFailed"]);
        assert_eq!(ctx.session().message_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_streaming_accumulates_and_emits_chunks() {
        let llm = Arc::new(ScriptedLlmClient::new().reply(Message::assistant("one two")));
        let sink = Arc::new(VecEventSink::new());
        let ctx = ExecutionContext::builder(llm).sink(sink.clone()).build();

        let text = ctx.request_llm_streaming().await.unwrap();
        assert_eq!(text, "one two");
        let chunks = sink
            .events()
            .iter()
            .filter(|e| matches!(e, AgentEvent::StreamChunk { .. }))
            .count();
        assert_eq!(chunks, 2);
        let last = ctx.session().snapshot().unwrap().prompt.messages.pop().unwrap();
        assert_eq!(last.content(), "one two");
    }

    #[tokio::test]
    async fn test_tool_scope_enforced() {
        let ctx = ExecutionContext::builder(Arc::new(ScriptedLlmClient::new()))
            .tools(registry())
            .build();
        let scoped = ctx.enter_subgraph("math", ToolSelection::named(["calc"]));

        let call = ToolCall::new("c1", "calc", Value::Null);
        assert_eq!(scoped.invoke_tool(&call).await.unwrap().to_text(), "calc ok");

        let outside = ToolCall::new("c2", "search", Value::Null);
        match scoped.invoke_tool(&outside).await.unwrap_err() {
            EngineError::ToolNotAvailable { tool, scope } => {
                assert_eq!(tool, "search");
                assert_eq!(scope, "math");
            }
            other => panic!("Expected ToolNotAvailable, got {:?}", other),
        }

        let unknown = ToolCall::new("c3", "nope", json!({}));
        assert!(matches!(
            scoped.invoke_tool(&unknown).await,
            Err(EngineError::ToolNotFound(_))
        ));
        assert_eq!(scoped.path(), ["math".to_string()]);
        assert_eq!(scoped.visible_tools().len(), 1);
    }

    #[tokio::test]
    async fn test_branch_session_is_forked() {
        let ctx = ExecutionContext::builder(Arc::new(ScriptedLlmClient::new()))
            .message(Message::user("base"))
            .build();
        let branch = ctx.fork_for_branch("fanout", "a").unwrap();
        branch.session().append(Message::user("branch")).unwrap();

        assert_eq!(ctx.session().message_count().unwrap(), 1);
        assert_eq!(branch.session().message_count().unwrap(), 2);
        assert!(branch.in_parallel_branch());
    }

    #[tokio::test]
    async fn test_checkpoint_records_position() {
        let store = Arc::new(InMemoryCheckpointer::default());
        let ctx = ExecutionContext::builder(Arc::new(ScriptedLlmClient::new()))
            .execution_id("exec-1")
            .checkpointer(store.clone())
            .build();
        let inner = ctx.enter_subgraph("research", ToolSelection::All);

        let id = inner.create_checkpoint("search", &json!("query")).await.unwrap().unwrap();
        let checkpoint = store.rollback_to_checkpoint(&id).await.unwrap();
        assert_eq!(checkpoint.node_path, vec!["research", "search"]);
        assert_eq!(checkpoint.pending_input, json!("query"));
        assert_eq!(checkpoint.execution_id, "exec-1");

        let branch = ctx.fork_for_branch("p", "b").unwrap();
        assert!(branch.create_checkpoint("x", &Value::Null).await.unwrap().is_none());
    }
}
