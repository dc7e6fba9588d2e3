//! LLM calling seam
//!
//! The engine never speaks a provider wire protocol. Hosts plug a provider in
//! by implementing [`LlmClient`]; LLM-request nodes reach it through the
//! execution context.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::message::Message;
use crate::session::Prompt;
use crate::tools::ToolDescriptor;

/// Provider and model identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LlmModel {
    pub provider: String,
    pub id: String,
}

impl LlmModel {
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for LlmModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.id)
    }
}

/// Lazily produced text chunks of a streamed completion
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A provider of chat completions
///
/// Provider failures must come back as errors (typically [`EngineError::Llm`]);
/// the requesting node fails with them.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Request one response message for the prompt
    async fn request_completion(
        &self,
        prompt: &Prompt,
        model: &LlmModel,
        tools: &[ToolDescriptor],
    ) -> Result<Message>;

    /// Request every message of one response, e.g. several tool calls at once
    async fn request_completion_multiple(
        &self,
        prompt: &Prompt,
        model: &LlmModel,
        tools: &[ToolDescriptor],
    ) -> Result<Vec<Message>> {
        Ok(vec![self.request_completion(prompt, model, tools).await?])
    }

    /// Stream the text of a response
    ///
    /// The default requests a full completion and yields it as one chunk.
    async fn stream_completion(
        &self,
        prompt: &Prompt,
        model: &LlmModel,
        tools: &[ToolDescriptor],
    ) -> Result<TextStream> {
        let message = self.request_completion(prompt, model, tools).await?;
        let text = message.content().into_owned();
        Ok(stream::once(async move { Ok(text) }).boxed())
    }
}

/// One scripted reply
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Single(Message),
    Multiple(Vec<Message>),
    Failure(String),
}

/// A request the scripted client received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub prompt: Prompt,
    pub model: LlmModel,
    /// Names of the tools offered with the request
    pub tools: Vec<String>,
}

type Responder = Arc<dyn Fn(&Prompt) -> Result<Message> + Send + Sync>;

/// Deterministic client for tests and examples
///
/// Replies are served from a queue in order. When the queue is empty the
/// optional responder is asked; without one the request fails.
#[derive(Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<ScriptedReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
    responder: Option<Responder>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply
    pub fn reply(self, message: Message) -> Self {
        self.push(ScriptedReply::Single(message));
        self
    }

    /// Queue a reply made of several messages
    pub fn reply_many(self, messages: Vec<Message>) -> Self {
        self.push(ScriptedReply::Multiple(messages));
        self
    }

    /// Queue a provider failure
    pub fn fail(self, message: impl Into<String>) -> Self {
        self.push(ScriptedReply::Failure(message.into()));
        self
    }

    /// Answer requests with `f` once the queue runs dry
    pub fn with_responder(
        mut self,
        f: impl Fn(&Prompt) -> Result<Message> + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Arc::new(f));
        self
    }

    pub fn push(&self, reply: ScriptedReply) {
        self.replies.lock().push_back(reply);
    }

    /// Every request received so far, oldest first
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn next(&self, prompt: &Prompt, model: &LlmModel, tools: &[ToolDescriptor]) -> Result<Vec<Message>> {
        self.requests.lock().push(RecordedRequest {
            prompt: prompt.clone(),
            model: model.clone(),
            tools: tools.iter().map(|t| t.name.clone()).collect(),
        });

        let queued = self.replies.lock().pop_front();
        match queued {
            Some(ScriptedReply::Single(message)) => Ok(vec![message]),
            Some(ScriptedReply::Multiple(messages)) => Ok(messages),
            Some(ScriptedReply::Failure(message)) => Err(EngineError::llm(message)),
            None => match &self.responder {
                Some(responder) => Ok(vec![responder(prompt)?]),
                None => Err(EngineError::llm("scripted client has no reply left")),
            },
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn request_completion(
        &self,
        prompt: &Prompt,
        model: &LlmModel,
        tools: &[ToolDescriptor],
    ) -> Result<Message> {
        self.next(prompt, model, tools)?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::llm("scripted reply was empty"))
    }

    async fn request_completion_multiple(
        &self,
        prompt: &Prompt,
        model: &LlmModel,
        tools: &[ToolDescriptor],
    ) -> Result<Vec<Message>> {
        self.next(prompt, model, tools)
    }

    /// Streams the reply word by word
    async fn stream_completion(
        &self,
        prompt: &Prompt,
        model: &LlmModel,
        tools: &[ToolDescriptor],
    ) -> Result<TextStream> {
        let text = self
            .request_completion(prompt, model, tools)
            .await?
            .content()
            .into_owned();
        let chunks: Vec<Result<String>> = text.split_inclusive(' ').map(|c| Ok(c.to_string())).collect();
        Ok(stream::iter(chunks).boxed())
    }
}

impl std::fmt::Debug for ScriptedLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedLlmClient")
            .field("queued", &self.replies.lock().len())
            .field("requests", &self.request_count())
            .finish()
    }
}
