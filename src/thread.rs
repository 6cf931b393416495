//! Per-backend conversation threads
//!
//! Each backend keeps its own ordered message log. In-flight turns are
//! represented by a single pending assistant placeholder at the tail of the
//! thread, which is replaced in place once the backend answers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Author of a thread message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person at the keyboard
    User,
    /// The backend's reply
    Assistant,
}

impl Role {
    /// Wire/storage name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a stored role name
    pub fn parse_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One message in a backend's thread
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author
    pub role: Role,
    /// Text content
    pub content: String,
    /// Placeholder for a reply that has not arrived yet
    #[serde(default)]
    pub is_pending: bool,
}

impl Message {
    /// Creates a user message
    ///
    /// # Examples
    ///
    /// ```
    /// use coro::thread::{Message, Role};
    ///
    /// let msg = Message::user("Hello");
    /// assert_eq!(msg.role, Role::User);
    /// assert!(!msg.is_pending);
    /// ```
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            is_pending: false,
        }
    }

    /// Creates a final assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            is_pending: false,
        }
    }

    /// Creates the pending assistant placeholder
    pub fn pending() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            is_pending: true,
        }
    }
}

/// Per-backend message logs
#[derive(Debug, Clone, Default)]
pub struct ThreadStore {
    threads: HashMap<String, Vec<Message>>,
}

impl ThreadStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message to a backend's thread
    ///
    /// Appending a pending placeholder while one is already at the tail is
    /// ignored, so a thread never holds two.
    pub fn append(&mut self, backend_id: &str, message: Message) {
        let thread = self.threads.entry(backend_id.to_string()).or_default();
        if message.is_pending && thread.last().map(|m| m.is_pending).unwrap_or(false) {
            tracing::debug!(backend.id = backend_id, "Pending placeholder already present");
            return;
        }
        thread.push(message);
    }

    /// Append the user's message followed by a pending assistant placeholder
    pub fn begin_exchange(&mut self, backend_id: &str, user_content: &str) {
        self.append(backend_id, Message::user(user_content));
        self.append(backend_id, Message::pending());
    }

    /// Replace the trailing pending placeholder with final content
    ///
    /// Returns `false` and leaves the thread untouched when the tail is not a
    /// pending message.
    pub fn replace_trailing_pending(&mut self, backend_id: &str, content: &str) -> bool {
        match self
            .threads
            .get_mut(backend_id)
            .and_then(|thread| thread.last_mut())
        {
            Some(last) if last.is_pending => {
                last.content = content.to_string();
                last.is_pending = false;
                true
            }
            _ => false,
        }
    }

    /// Rewrite the trailing assistant reply in place
    ///
    /// Used when a retry produces a new answer for an exchange that already
    /// resolved. No-op unless the tail is an assistant message.
    pub fn replace_trailing_assistant(&mut self, backend_id: &str, content: &str) -> bool {
        match self
            .threads
            .get_mut(backend_id)
            .and_then(|thread| thread.last_mut())
        {
            Some(last) if last.role == Role::Assistant => {
                last.content = content.to_string();
                last.is_pending = false;
                true
            }
            _ => false,
        }
    }

    /// Drop an unanswered exchange from the tail of a thread
    ///
    /// Removes a trailing pending placeholder together with the user message
    /// that opened it. Returns whether anything was removed.
    pub fn abandon_pending(&mut self, backend_id: &str) -> bool {
        let Some(thread) = self.threads.get_mut(backend_id) else {
            return false;
        };
        if !thread.last().map(|m| m.is_pending).unwrap_or(false) {
            return false;
        }
        thread.pop();
        if thread.last().map(|m| m.role == Role::User).unwrap_or(false) {
            thread.pop();
        }
        true
    }

    /// Ordered messages for a backend (empty when unknown)
    pub fn thread_for(&self, backend_id: &str) -> &[Message] {
        self.threads
            .get(backend_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Messages to send as history for a new exchange: everything resolved
    pub fn history_for(&self, backend_id: &str) -> Vec<Message> {
        self.thread_for(backend_id)
            .iter()
            .filter(|m| !m.is_pending)
            .cloned()
            .collect()
    }

    /// Split a thread around its most recent user message
    ///
    /// Returns the messages before it and its content, which is what a retry
    /// of the latest exchange needs to resend.
    pub fn last_exchange(&self, backend_id: &str) -> Option<(Vec<Message>, String)> {
        let thread = self.thread_for(backend_id);
        let pos = thread.iter().rposition(|m| m.role == Role::User)?;
        let history = thread[..pos]
            .iter()
            .filter(|m| !m.is_pending)
            .cloned()
            .collect();
        Some((history, thread[pos].content.clone()))
    }

    /// Number of pending messages in a backend's thread
    pub fn pending_count(&self, backend_id: &str) -> usize {
        self.thread_for(backend_id)
            .iter()
            .filter(|m| m.is_pending)
            .count()
    }

    /// Replace a whole thread (used when loading a saved conversation)
    pub fn set_thread(&mut self, backend_id: &str, messages: Vec<Message>) {
        self.threads.insert(backend_id.to_string(), messages);
    }

    /// Backend ids that have a thread
    pub fn backend_ids(&self) -> Vec<String> {
        self.threads.keys().cloned().collect()
    }

    /// Drop every thread
    pub fn clear(&mut self) {
        self.threads.clear();
    }

    /// Whether no thread has any message
    pub fn is_empty(&self) -> bool {
        self.threads.values().all(Vec::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_exchange_appends_user_and_pending() {
        let mut store = ThreadStore::new();
        store.begin_exchange("gemini", "Hi");

        let thread = store.thread_for("gemini");
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[0], Message::user("Hi"));
        assert!(thread[1].is_pending);
        assert_eq!(store.pending_count("gemini"), 1);
    }

    #[test]
    fn test_replace_trailing_pending() {
        let mut store = ThreadStore::new();
        store.begin_exchange("gemini", "Hi");

        assert!(store.replace_trailing_pending("gemini", "Hello!"));
        let thread = store.thread_for("gemini");
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[1], Message::assistant("Hello!"));
        assert_eq!(store.pending_count("gemini"), 0);
    }

    #[test]
    fn test_replace_trailing_pending_is_noop_without_placeholder() {
        let mut store = ThreadStore::new();
        store.begin_exchange("gemini", "Hi");
        store.replace_trailing_pending("gemini", "Hello!");

        assert!(!store.replace_trailing_pending("gemini", "Again"));
        assert!(!store.replace_trailing_pending("unknown", "Again"));
        let thread = store.thread_for("gemini");
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[1].content, "Hello!");
    }

    #[test]
    fn test_second_pending_is_never_appended() {
        let mut store = ThreadStore::new();
        store.begin_exchange("gemini", "Hi");
        store.append("gemini", Message::pending());
        assert_eq!(store.pending_count("gemini"), 1);
        assert_eq!(store.thread_for("gemini").len(), 2);
    }

    #[test]
    fn test_replace_trailing_assistant() {
        let mut store = ThreadStore::new();
        store.begin_exchange("gemini", "Hi");
        store.replace_trailing_pending("gemini", "error text");

        assert!(store.replace_trailing_assistant("gemini", "real answer"));
        assert_eq!(store.thread_for("gemini")[1].content, "real answer");

        store.append("gemini", Message::user("next"));
        assert!(!store.replace_trailing_assistant("gemini", "nope"));
    }

    #[test]
    fn test_history_excludes_pending() {
        let mut store = ThreadStore::new();
        store.begin_exchange("gemini", "Q1");
        store.replace_trailing_pending("gemini", "A1");
        store.begin_exchange("gemini", "Q2");

        let history = store.history_for("gemini");
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|m| !m.is_pending));
    }

    #[test]
    fn test_last_exchange() {
        let mut store = ThreadStore::new();
        store.begin_exchange("gemini", "Q1");
        store.replace_trailing_pending("gemini", "A1");
        store.begin_exchange("gemini", "Q2");
        store.replace_trailing_pending("gemini", "failed");

        let (history, prompt) = store.last_exchange("gemini").unwrap();
        assert_eq!(prompt, "Q2");
        assert_eq!(history, vec![Message::user("Q1"), Message::assistant("A1")]);
        assert!(store.last_exchange("missing").is_none());
    }

    #[test]
    fn test_abandon_pending_drops_unanswered_exchange() {
        let mut store = ThreadStore::new();
        store.begin_exchange("gemini", "Q1");
        store.replace_trailing_pending("gemini", "A1");
        store.begin_exchange("gemini", "Q2");

        assert!(store.abandon_pending("gemini"));
        assert_eq!(
            store.thread_for("gemini"),
            &[Message::user("Q1"), Message::assistant("A1")]
        );
        assert!(!store.abandon_pending("gemini"));
        assert!(!store.abandon_pending("missing"));
    }

    #[test]
    fn test_threads_are_independent() {
        let mut store = ThreadStore::new();
        store.begin_exchange("a", "Hi");
        store.begin_exchange("b", "Hi");
        store.replace_trailing_pending("a", "from a");

        assert_eq!(store.pending_count("a"), 0);
        assert_eq!(store.pending_count("b"), 1);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse_str("USER"), Some(Role::User));
        assert_eq!(Role::parse_str("assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse_str("system"), None);
    }
}
