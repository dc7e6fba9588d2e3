//! History compression
//!
//! Replaces the session's accumulated messages with a condensed form. The
//! built-in strategies ask the LLM for a TLDR of (part of) the conversation
//! or for facts about named concepts; custom strategies implement
//! [`HistoryCompressionStrategy`] and rewrite the history themselves.
//!
//! System messages are always kept. With `preserve_memory`, every message
//! in `memory_messages` and every message flagged as memory is excluded from
//! the summarization input and present in the history afterwards, whatever
//! the strategy did.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::events::AgentEvent;
use crate::message::{Message, Role};
use crate::session::Prompt;

const SUMMARY_PROMPT_ID: &str = "compress-history";
const NO_FACTS: &str = "NONE";

const TLDR_INSTRUCTION: &str = "Summarize the conversation above as a concise TLDR. \
Keep every decision, result and open task needed to continue the work. \
Answer with the summary only.";

/// How many facts a concept may yield
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    Single,
    Multiple,
}

/// A named subject to extract facts about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub keyword: String,
    pub description: String,
    pub fact_type: FactType,
}

impl Concept {
    pub fn new(keyword: impl Into<String>, description: impl Into<String>, fact_type: FactType) -> Self {
        Self {
            keyword: keyword.into(),
            description: description.into(),
            fact_type,
        }
    }
}

/// User-defined compression
///
/// Implementations rewrite the history through the context's session
/// (typically with [`Session::replace_history`](crate::session::Session::replace_history)).
/// Memory preservation is enforced after `compress` returns.
#[async_trait]
pub trait HistoryCompressionStrategy: Send + Sync {
    async fn compress(&self, ctx: &ExecutionContext, preserve_memory: bool, memory_messages: &[Message]) -> Result<()>;
}

/// Compression strategies
#[derive(Clone)]
pub enum HistoryCompression {
    /// One TLDR of the whole conversation
    WholeHistory,
    /// One TLDR of the last `n` messages; earlier messages are dropped unread
    FromLastNMessages(usize),
    /// One TLDR per chunk of `n` messages
    Chunked(usize),
    /// Replace the conversation with facts about each concept
    RetrieveFactsFromHistory(Vec<Concept>),
    Custom(Arc<dyn HistoryCompressionStrategy>),
}

impl std::fmt::Debug for HistoryCompression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WholeHistory => write!(f, "WholeHistory"),
            Self::FromLastNMessages(n) => f.debug_tuple("FromLastNMessages").field(n).finish(),
            Self::Chunked(n) => f.debug_tuple("Chunked").field(n).finish(),
            Self::RetrieveFactsFromHistory(concepts) => {
                f.debug_tuple("RetrieveFactsFromHistory").field(concepts).finish()
            }
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Compress the session history of `ctx`
pub async fn compress_history(
    ctx: &ExecutionContext,
    compression: &HistoryCompression,
    preserve_memory: bool,
    memory_messages: &[Message],
) -> Result<()> {
    let before = ctx.session().message_count()?;

    match compression {
        HistoryCompression::Custom(strategy) => {
            let mut preserved = if preserve_memory {
                ctx.read_session(|s| {
                    s.messages()
                        .iter()
                        .filter(|m| m.is_memory())
                        .cloned()
                        .collect::<Vec<_>>()
                })?
            } else {
                Vec::new()
            };
            strategy.compress(ctx, preserve_memory, memory_messages).await?;
            if preserve_memory {
                preserved.extend(memory_messages.iter().cloned());
                ctx.write_session(|s| {
                    for memory in preserved {
                        if !s.prompt.messages.contains(&memory) {
                            s.prompt.messages.push(memory);
                        }
                    }
                })?;
            }
        }
        builtin => {
            let (system, conversation) = ctx.read_session(|s| split_history(s.messages(), preserve_memory, memory_messages))?;
            let condensed = match builtin {
                HistoryCompression::WholeHistory => summarize_chunks(ctx, &system, &[conversation]).await?,
                HistoryCompression::FromLastNMessages(n) => {
                    let start = conversation.len().saturating_sub(*n);
                    summarize_chunks(ctx, &system, &[conversation[start..].to_vec()]).await?
                }
                HistoryCompression::Chunked(n) => {
                    let chunks: Vec<Vec<Message>> = conversation.chunks((*n).max(1)).map(<[Message]>::to_vec).collect();
                    summarize_chunks(ctx, &system, &chunks).await?
                }
                HistoryCompression::RetrieveFactsFromHistory(concepts) => {
                    retrieve_facts(ctx, &system, &conversation, concepts).await?
                }
                HistoryCompression::Custom(_) => Vec::new(),
            };

            let mut history = system;
            history.extend(condensed);
            ctx.session().replace_history(history, preserve_memory, memory_messages)?;
        }
    }

    let after = ctx.session().message_count()?;
    log::debug!("Compressed history with {:?}: {} -> {} messages", compression, before, after);
    ctx.emit(AgentEvent::HistoryCompressed {
        execution_id: ctx.execution_id().to_string(),
        before,
        after,
    });
    Ok(())
}

/// Ask the LLM for a TLDR of `messages`
///
/// The session is left untouched; the summary comes back as an assistant
/// message. Useful for custom strategies.
pub async fn summarize_messages(ctx: &ExecutionContext, messages: &[Message]) -> Result<Message> {
    let mut input = messages.to_vec();
    input.push(Message::user(TLDR_INSTRUCTION));
    let prompt = Prompt::new(SUMMARY_PROMPT_ID).with_messages(input);
    let response = ctx.request_llm_detached(&prompt).await?;
    Ok(Message::assistant(response.content().into_owned()))
}

/// System messages, and the rest minus preserved memory
fn split_history(
    messages: &[Message],
    preserve_memory: bool,
    memory_messages: &[Message],
) -> (Vec<Message>, Vec<Message>) {
    let mut system = Vec::new();
    let mut conversation = Vec::new();
    for message in messages {
        if message.role() == Role::System {
            system.push(message.clone());
        } else if preserve_memory && (message.is_memory() || memory_messages.contains(message)) {
            continue;
        } else {
            conversation.push(message.clone());
        }
    }
    (system, conversation)
}

async fn summarize_chunks(ctx: &ExecutionContext, system: &[Message], chunks: &[Vec<Message>]) -> Result<Vec<Message>> {
    let mut summaries = Vec::new();
    for chunk in chunks.iter().filter(|c| !c.is_empty()) {
        let mut input = system.to_vec();
        input.extend(chunk.iter().cloned());
        summaries.push(summarize_messages(ctx, &input).await?);
    }
    Ok(summaries)
}

async fn retrieve_facts(
    ctx: &ExecutionContext,
    system: &[Message],
    conversation: &[Message],
    concepts: &[Concept],
) -> Result<Vec<Message>> {
    if conversation.is_empty() {
        return Ok(Vec::new());
    }

    let mut facts = Vec::new();
    for concept in concepts {
        let mut input = system.to_vec();
        input.extend(conversation.iter().cloned());
        input.push(Message::user(fact_instruction(concept)));
        let prompt = Prompt::new(SUMMARY_PROMPT_ID).with_messages(input);
        let response = ctx.request_llm_detached(&prompt).await?;

        let mut found = parse_facts(&response.content());
        if concept.fact_type == FactType::Single {
            found.truncate(1);
        }
        if found.is_empty() {
            log::debug!("No facts found for concept '{}'", concept.keyword);
            continue;
        }
        let listed: Vec<String> = found.iter().map(|f| format!("- {}", f)).collect();
        facts.push(Message::assistant(format!(
            "Facts about {}:\n{}",
            concept.keyword,
            listed.join("\n")
        )));
    }
    Ok(facts)
}

fn fact_instruction(concept: &Concept) -> String {
    let shape = match concept.fact_type {
        FactType::Single => "Answer with the single most relevant fact on one line.",
        FactType::Multiple => "List every relevant fact, one per line.",
    };
    format!(
        "Extract facts about '{}' ({}) from the conversation above. {} Answer {} if there are none.",
        concept.keyword, concept.description, shape, NO_FACTS
    )
}

/// One fact per non-empty line; list markers are stripped
fn parse_facts(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim().trim_start_matches(['-', '*']).trim())
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case(NO_FACTS))
        .map(str::to_string)
        .collect()
}
