use crate::catalog::display_order;
use crate::thread::{Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque handle to a persisted conversation record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationHandle(String);

impl ConversationHandle {
    /// Wrap a record id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Record id
    pub fn id(&self) -> &str {
        &self.0
    }

    /// First eight characters, as shown in listings
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ConversationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted backend answer (the error kind is not stored)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedResponse {
    /// Backend that answered
    pub backend_id: String,
    /// Answer or user-facing error text
    pub text: String,
    /// Completion tokens
    pub token_count: Option<u32>,
    /// Job latency
    pub latency_ms: u64,
    /// User-facing error text when the job failed
    pub error_message: Option<String>,
}

/// One persisted thread message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Owning backend
    pub backend_id: String,
    /// Author
    pub role: Role,
    /// Text
    pub content: String,
    /// Position across every backend's messages; `None` in legacy records
    pub order_index: Option<i64>,
}

/// Persisted form of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedConversation {
    /// Record id (empty until saved)
    #[serde(default)]
    pub id: String,
    /// Initial prompt
    pub prompt: String,
    /// When the turn was submitted
    pub timestamp: DateTime<Utc>,
    /// Largest job latency
    pub total_latency_ms: u64,
    /// Latest response per backend
    pub responses: Vec<SavedResponse>,
    /// Every backend's thread, interleaved
    pub history: Vec<HistoryEntry>,
}

impl SavedConversation {
    /// Flatten per-backend threads into history entries with order indexes
    ///
    /// Messages are interleaved exchange by exchange: position 0 of every
    /// backend (in display order), then position 1, and so on. Pending
    /// placeholders are skipped.
    pub fn interleave(threads: &[(String, Vec<Message>)]) -> Vec<HistoryEntry> {
        let mut ordered: Vec<&(String, Vec<Message>)> = threads.iter().collect();
        ordered.sort_by(|a, b| display_order(&a.0, &b.0));

        let longest = ordered.iter().map(|(_, m)| m.len()).max().unwrap_or(0);
        let mut entries = Vec::new();
        for position in 0..longest {
            for (backend_id, messages) in &ordered {
                if let Some(message) = messages.get(position).filter(|m| !m.is_pending) {
                    entries.push(HistoryEntry {
                        backend_id: backend_id.clone(),
                        role: message.role,
                        content: message.content.clone(),
                        order_index: Some(entries.len() as i64),
                    });
                }
            }
        }
        entries
    }

    /// Rebuild per-backend threads from the history entries
    ///
    /// When every entry carries an order index, messages are ordered by it.
    /// Otherwise (legacy records) entries are grouped by backend id in
    /// alphabetical order, keeping their stored order within a backend.
    pub fn threads(&self) -> Vec<(String, Vec<Message>)> {
        let mut entries: Vec<&HistoryEntry> = self.history.iter().collect();
        if entries.iter().all(|e| e.order_index.is_some()) {
            entries.sort_by_key(|e| e.order_index);
        } else {
            tracing::debug!("Legacy history without order index, grouping by backend");
            entries.sort_by(|a, b| a.backend_id.cmp(&b.backend_id));
        }

        let mut threads: Vec<(String, Vec<Message>)> = Vec::new();
        for entry in entries {
            let message = Message {
                role: entry.role,
                content: entry.content.clone(),
                is_pending: false,
            };
            match threads.iter_mut().find(|(id, _)| *id == entry.backend_id) {
                Some((_, messages)) => messages.push(message),
                None => threads.push((entry.backend_id.clone(), vec![message])),
            }
        }
        threads.sort_by(|a, b| display_order(&a.0, &b.0));
        threads
    }
}

/// Metadata for a stored conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSession {
    /// Record id
    pub id: String,
    /// Initial prompt
    pub prompt: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the record was last updated
    pub updated_at: DateTime<Utc>,
    /// Number of backends that answered
    pub backend_count: usize,
    /// Number of stored thread messages
    pub message_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threads() -> Vec<(String, Vec<Message>)> {
        vec![
            (
                "llama-8b".to_string(),
                vec![
                    Message::user("Q1"),
                    Message::assistant("fast A1"),
                    Message::user("Q2"),
                    Message::assistant("fast A2"),
                ],
            ),
            (
                "gemini".to_string(),
                vec![Message::user("Q1"), Message::assistant("gem A1"), Message::pending()],
            ),
        ]
    }

    #[test]
    fn test_interleave_assigns_monotonic_indexes() {
        let entries = SavedConversation::interleave(&threads());
        assert_eq!(entries.len(), 6);
        for (idx, entry) in entries.iter().enumerate() {
            assert_eq!(entry.order_index, Some(idx as i64));
        }
        assert_eq!(entries[0].backend_id, "gemini");
        assert_eq!(entries[1].backend_id, "llama-8b");
    }

    #[test]
    fn test_threads_roundtrip_independent_of_entry_order() {
        let mut history = SavedConversation::interleave(&threads());
        history.reverse();
        let saved = SavedConversation {
            id: "x".to_string(),
            prompt: "Q1".to_string(),
            timestamp: Utc::now(),
            total_latency_ms: 0,
            responses: vec![],
            history,
        };

        let rebuilt = saved.threads();
        assert_eq!(rebuilt[0].0, "gemini");
        assert_eq!(
            rebuilt[0].1,
            vec![Message::user("Q1"), Message::assistant("gem A1")]
        );
        assert_eq!(rebuilt[1].0, "llama-8b");
        assert_eq!(rebuilt[1].1.len(), 4);
        assert_eq!(rebuilt[1].1[3].content, "fast A2");
    }

    #[test]
    fn test_threads_legacy_fallback_groups_alphabetically() {
        let entry = |backend: &str, role: Role, content: &str| HistoryEntry {
            backend_id: backend.to_string(),
            role,
            content: content.to_string(),
            order_index: None,
        };
        let saved = SavedConversation {
            id: "x".to_string(),
            prompt: "Q".to_string(),
            timestamp: Utc::now(),
            total_latency_ms: 0,
            responses: vec![],
            history: vec![
                entry("zeta", Role::User, "Q"),
                entry("alpha", Role::User, "Q"),
                entry("zeta", Role::Assistant, "z"),
                entry("alpha", Role::Assistant, "a"),
            ],
        };

        let rebuilt = saved.threads();
        assert_eq!(rebuilt[0].0, "alpha");
        assert_eq!(rebuilt[0].1[1].content, "a");
        assert_eq!(rebuilt[1].1, vec![Message::user("Q"), Message::assistant("z")]);
    }

    #[test]
    fn test_handle_short() {
        let handle = ConversationHandle::new("0123456789abcdef");
        assert_eq!(handle.short(), "01234567");
        assert_eq!(ConversationHandle::new("abc").short(), "abc");
    }
}
