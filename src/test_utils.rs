//! Test utilities for Coro
//!
//! Scripted backend and search clients plus an in-memory persistence
//! gateway, so turn orchestration can be exercised without a network.

use crate::catalog::BackendCatalog;
use crate::config::Config;
use crate::context::SearchSnippet;
use crate::error::{CoroError, Result};
use crate::providers::{BackendClient, BackendReply, BackendRequest, ClientFault, SearchClient};
use crate::storage::{ConversationHandle, PersistenceGateway, SavedConversation, StoredSession};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Catalog built from the default backend list
pub fn default_catalog() -> BackendCatalog {
    BackendCatalog::from_config(&Config::default().backends).expect("default catalog")
}

#[derive(Clone)]
struct Script {
    latency: Duration,
    outcome: std::result::Result<BackendReply, ClientFault>,
}

/// Backend client whose answers are scripted per backend
///
/// Unscripted backends answer `"<backend>: <prompt>"` immediately. A
/// `{prompt}` marker in scripted text is replaced with the request prompt.
#[derive(Default)]
pub struct FakeBackendClient {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<BackendRequest>>,
}

impl FakeBackendClient {
    /// Creates a client with no scripts
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful answer
    pub fn reply(self, backend_id: &str, text: &str, latency_ms: u64) -> Self {
        self.set_reply(backend_id, text, latency_ms);
        self
    }

    /// Script a failure
    pub fn fail(self, backend_id: &str, fault: ClientFault, latency_ms: u64) -> Self {
        self.set_fault(backend_id, fault, latency_ms);
        self
    }

    /// Replace a backend's script with a successful answer
    pub fn set_reply(&self, backend_id: &str, text: &str, latency_ms: u64) {
        self.scripts.lock().expect("scripts lock").insert(
            backend_id.to_string(),
            Script {
                latency: Duration::from_millis(latency_ms),
                outcome: Ok(BackendReply::new(text, Some(text.len() as u32 / 4))),
            },
        );
    }

    /// Replace a backend's script with a failure
    pub fn set_fault(&self, backend_id: &str, fault: ClientFault, latency_ms: u64) {
        self.scripts.lock().expect("scripts lock").insert(
            backend_id.to_string(),
            Script {
                latency: Duration::from_millis(latency_ms),
                outcome: Err(fault),
            },
        );
    }

    /// Every request received so far
    pub fn requests(&self) -> Vec<BackendRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    /// Requests received for one backend
    pub fn requests_for(&self, backend_id: &str) -> Vec<BackendRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.backend_id == backend_id)
            .collect()
    }

    /// Number of calls made for one backend
    pub fn calls_for(&self, backend_id: &str) -> usize {
        self.requests_for(backend_id).len()
    }
}

#[async_trait]
impl BackendClient for FakeBackendClient {
    async fn send(&self, request: &BackendRequest) -> std::result::Result<BackendReply, ClientFault> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());

        let script = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get(&request.backend_id)
            .cloned();

        match script {
            Some(script) => {
                if !script.latency.is_zero() {
                    tokio::time::sleep(script.latency).await;
                }
                script.outcome.map(|reply| BackendReply {
                    text: reply.text.replace("{prompt}", &request.prompt),
                    ..reply
                })
            }
            None => Ok(BackendReply::new(
                format!("{}: {}", request.backend_id, request.prompt),
                None,
            )),
        }
    }
}

/// 401 with an `invalid_api_key` body code
pub fn invalid_key_fault() -> ClientFault {
    ClientFault::Status {
        status: 401,
        code: Some("invalid_api_key".to_string()),
        message: "Incorrect API key provided".to_string(),
        retry_after: None,
    }
}

/// Search client returning fixed snippets
pub struct FakeSearchClient {
    snippets: Vec<SearchSnippet>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeSearchClient {
    /// Always returns `snippets`
    pub fn new(snippets: Vec<SearchSnippet>) -> Self {
        Self {
            snippets,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always fails
    pub fn failing() -> Self {
        Self {
            snippets: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of searches run
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchClient for FakeSearchClient {
    async fn search(&self, _query: &str) -> Result<Vec<SearchSnippet>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CoroError::Search("search backend unavailable".to_string()).into());
        }
        Ok(self.snippets.clone())
    }
}

/// In-memory persistence gateway
#[derive(Default)]
pub struct MemoryPersistence {
    records: Mutex<HashMap<String, SavedConversation>>,
    saves: AtomicUsize,
    updates: AtomicUsize,
}

impl MemoryPersistence {
    /// Creates an empty gateway
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Number of `update` calls
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Snapshot of a record
    pub fn get(&self, id: &str) -> Option<SavedConversation> {
        self.records.lock().expect("records lock").get(id).cloned()
    }

    /// Insert a record directly, returning its handle
    pub fn insert(&self, mut conversation: SavedConversation) -> ConversationHandle {
        let id = uuid::Uuid::new_v4().to_string();
        conversation.id = id.clone();
        self.records
            .lock()
            .expect("records lock")
            .insert(id.clone(), conversation);
        ConversationHandle::new(id)
    }
}

impl PersistenceGateway for MemoryPersistence {
    fn save(&self, conversation: &SavedConversation) -> Result<ConversationHandle> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(conversation.clone()))
    }

    fn update(&self, handle: &ConversationHandle, conversation: &SavedConversation) -> Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let mut records = self.records.lock().expect("records lock");
        match records.get_mut(handle.id()) {
            Some(record) => {
                *record = SavedConversation {
                    id: handle.id().to_string(),
                    ..conversation.clone()
                };
                Ok(())
            }
            None => Err(CoroError::Storage(format!("Conversation {} does not exist", handle)).into()),
        }
    }

    fn load(&self, id: &str) -> Result<Option<SavedConversation>> {
        let records = self.records.lock().expect("records lock");
        Ok(records
            .iter()
            .find(|(key, _)| key.starts_with(id))
            .map(|(_, record)| record.clone()))
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.records
            .lock()
            .expect("records lock")
            .retain(|key, _| !key.starts_with(id));
        Ok(())
    }

    fn list(&self) -> Result<Vec<StoredSession>> {
        let records = self.records.lock().expect("records lock");
        Ok(records
            .values()
            .map(|r| StoredSession {
                id: r.id.clone(),
                prompt: r.prompt.clone(),
                created_at: r.timestamp,
                updated_at: r.timestamp,
                backend_count: r.responses.len(),
                message_count: r.history.len(),
            })
            .collect())
    }
}

/// Persistence gateway whose writes always fail
#[derive(Default)]
pub struct FailingPersistence;

impl PersistenceGateway for FailingPersistence {
    fn save(&self, _conversation: &SavedConversation) -> Result<ConversationHandle> {
        Err(CoroError::Storage("disk full".to_string()).into())
    }

    fn update(&self, _handle: &ConversationHandle, _conversation: &SavedConversation) -> Result<()> {
        Err(CoroError::Storage("disk full".to_string()).into())
    }

    fn load(&self, _id: &str) -> Result<Option<SavedConversation>> {
        Ok(None)
    }

    fn delete(&self, _id: &str) -> Result<()> {
        Ok(())
    }

    fn list(&self) -> Result<Vec<StoredSession>> {
        Ok(Vec::new())
    }
}
