//! Conversation session with single-writer/many-reader access
//!
//! A [`Session`] owns the prompt (ordered message history), the active tool
//! set and the active model. All access goes through scoped callbacks:
//!
//! - [`Session::read_session`] runs a callback with a shared view; reads may overlap.
//! - [`Session::write_session`] runs a callback with exclusive access.
//!
//! Callbacks are synchronous, so a lock is never held across an `.await`.
//! The guard is released on every exit path, including a panic inside the
//! callback. Reentrant access that would block forever (writing while the
//! same thread already holds the session, or reading while it holds the write
//! lock) fails fast with [`EngineError::Deadlock`].

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::llm::LlmModel;
use crate::message::Message;
use crate::tools::ToolDescriptor;

/// Ordered message history sent to the LLM
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub messages: Vec<Message>,
}

impl Prompt {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }
}

/// Everything a session guards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub prompt: Prompt,
    /// Tools offered to the LLM on the next request
    pub tools: Vec<ToolDescriptor>,
    pub model: LlmModel,
}

impl SessionState {
    pub fn new(prompt: Prompt, model: LlmModel) -> Self {
        Self {
            prompt,
            tools: Vec::new(),
            model,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.prompt.messages
    }
}

static NEXT_SESSION_KEY: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

thread_local! {
    /// Sessions currently held by this thread, innermost last
    static HELD: RefCell<Vec<(u64, Access)>> = RefCell::new(Vec::new());
}

/// Marks a session as held by the current thread until dropped
struct HeldMarker;

impl HeldMarker {
    fn acquire(key: u64, access: Access) -> Self {
        HELD.with(|held| held.borrow_mut().push((key, access)));
        HeldMarker
    }
}

impl Drop for HeldMarker {
    fn drop(&mut self) {
        HELD.with(|held| {
            held.borrow_mut().pop();
        });
    }
}

fn held_access(key: u64) -> Option<Access> {
    HELD.with(|held| {
        let held = held.borrow();
        if held.iter().any(|(k, a)| *k == key && *a == Access::Write) {
            Some(Access::Write)
        } else if held.iter().any(|(k, _)| *k == key) {
            Some(Access::Read)
        } else {
            None
        }
    })
}

/// The live conversation state of one execution context
pub struct Session {
    id: String,
    key: u64,
    state: RwLock<SessionState>,
}

impl Session {
    pub fn new(id: impl Into<String>, state: SessionState) -> Self {
        Self {
            id: id.into(),
            key: NEXT_SESSION_KEY.fetch_add(1, Ordering::Relaxed),
            state: RwLock::new(state),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run `f` with a read-only view of the session
    pub fn read_session<R>(&self, f: impl FnOnce(&SessionState) -> R) -> Result<R> {
        let guard = match held_access(self.key) {
            Some(Access::Write) => return Err(EngineError::Deadlock(self.id.clone())),
            // A plain read could queue behind a waiting writer and never wake.
            Some(Access::Read) => self.state.read_recursive(),
            None => self.state.read(),
        };
        let _marker = HeldMarker::acquire(self.key, Access::Read);
        Ok(f(&guard))
    }

    /// Run `f` with exclusive mutable access to the session
    pub fn write_session<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> Result<R> {
        if held_access(self.key).is_some() {
            return Err(EngineError::Deadlock(self.id.clone()));
        }
        let mut guard = self.state.write();
        let _marker = HeldMarker::acquire(self.key, Access::Write);
        Ok(f(&mut guard))
    }

    /// Append a message to the end of the history
    pub fn append(&self, message: Message) -> Result<()> {
        self.write_session(|state| state.prompt.messages.push(message))
    }

    /// Atomically replace the message history
    ///
    /// With `preserve_memory`, every message in `memory_messages` and every
    /// message flagged as memory in the old history is re-appended after the
    /// swap unless the new history already contains it.
    pub fn replace_history(
        &self,
        new_messages: Vec<Message>,
        preserve_memory: bool,
        memory_messages: &[Message],
    ) -> Result<()> {
        self.write_session(|state| {
            let old = std::mem::replace(&mut state.prompt.messages, new_messages);
            if !preserve_memory {
                return;
            }
            let flagged = old.into_iter().filter(Message::is_memory);
            for memory in memory_messages.iter().cloned().chain(flagged) {
                if !state.prompt.messages.contains(&memory) {
                    state.prompt.messages.push(memory);
                }
            }
        })
    }

    /// Clone the current state
    pub fn snapshot(&self) -> Result<SessionState> {
        self.read_session(SessionState::clone)
    }

    /// Overwrite the whole state, e.g. when restoring a checkpoint
    pub fn restore(&self, state: SessionState) -> Result<()> {
        self.write_session(|current| *current = state)
    }

    /// Create an independent session starting from the current state
    pub fn fork(&self, id: impl Into<String>) -> Result<Session> {
        Ok(Session::new(id, self.snapshot()?))
    }

    pub fn message_count(&self) -> Result<usize> {
        self.read_session(|state| state.prompt.messages.len())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn session() -> Session {
        Session::new(
            "s1",
            SessionState::new(Prompt::new("p"), LlmModel::new("mock", "mock-1")),
        )
    }

    #[test]
    fn test_append_preserves_order() {
        let session = session();
        session.append(Message::user("a")).unwrap();
        session.append(Message::assistant("b")).unwrap();

        let contents: Vec<String> = session
            .read_session(|s| s.messages().iter().map(|m| m.content().into_owned()).collect())
            .unwrap();
        assert_eq!(contents, vec!["a", "b"]);
    }

    #[test]
    fn test_reentrant_write_is_deadlock() {
        let session = session();
        let inner = session.write_session(|_| session.write_session(|_| ())).unwrap();
        assert!(matches!(inner, Err(EngineError::Deadlock(_))));

        // The lock was released after the outer callback returned.
        assert!(session.append(Message::user("after")).is_ok());
    }

    #[test]
    fn test_read_inside_write_is_deadlock() {
        let session = session();
        let inner = session.write_session(|_| session.read_session(|_| ())).unwrap();
        assert!(matches!(inner, Err(EngineError::Deadlock(_))));
    }

    #[test]
    fn test_nested_reads_are_allowed() {
        let session = session();
        session.append(Message::user("x")).unwrap();
        let count = session
            .read_session(|outer| session.read_session(|inner| outer.messages().len() + inner.messages().len()))
            .unwrap()
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_write_inside_read_is_deadlock() {
        let session = session();
        let inner = session.read_session(|_| session.append(Message::user("x"))).unwrap();
        assert!(matches!(inner, Err(EngineError::Deadlock(_))));
    }

    #[test]
    fn test_lock_released_after_panic() {
        let session = Arc::new(session());
        let cloned = session.clone();
        let outcome = std::thread::spawn(move || {
            let _ = cloned.write_session(|state| {
                if state.tools.is_empty() {
                    panic!("boom");
                }
            });
        })
        .join();
        assert!(outcome.is_err());
        assert!(session.append(Message::user("still usable")).is_ok());
    }

    #[test]
    fn test_replace_history_preserves_memory() {
        let session = session();
        let fact = Message::user("user likes tea").as_memory();
        let extra = Message::user("pinned by caller");
        session.append(Message::system("sys")).unwrap();
        session.append(fact.clone()).unwrap();
        session.append(Message::assistant("chatter")).unwrap();

        session
            .replace_history(vec![Message::assistant("tldr")], true, &[extra.clone()])
            .unwrap();

        let messages = session.snapshot().unwrap().prompt.messages;
        assert!(messages.contains(&fact));
        assert!(messages.contains(&extra));
        assert_eq!(messages[0].content(), "tldr");
        assert_eq!(messages.len(), 3);
    }

    #[test]
    fn test_replace_history_without_preserve_drops_memory() {
        let session = session();
        session.append(Message::user("m").as_memory()).unwrap();
        session.replace_history(vec![], false, &[]).unwrap();
        assert_eq!(session.message_count().unwrap(), 0);
    }

    #[test]
    fn test_fork_is_independent() {
        let session = session();
        session.append(Message::user("base")).unwrap();
        let fork = session.fork("fork").unwrap();
        fork.append(Message::user("branch only")).unwrap();

        assert_eq!(session.message_count().unwrap(), 1);
        assert_eq!(fork.message_count().unwrap(), 2);
    }
}
