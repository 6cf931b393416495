//! Turn data model
//!
//! A [`Turn`] is one user submission and everything that came back for it.
//! It is only ever mutated by the coordinator.

use crate::catalog::display_order;
use crate::context::TurnContext;
use crate::normalizer::{ErrorKind, NormalizedError};
use crate::providers::{BackendReply, GenerationParameters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Text of a response that has not arrived yet
pub const AWAITING: &str = "awaiting";

/// Lifecycle of a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum TurnState {
    /// Nothing submitted
    #[default]
    Idle,
    /// Jobs outstanding
    Loading,
    /// Every dispatched job has resolved (individual backends may have failed)
    Success,
    /// Rejected before dispatch
    Error(String),
}

/// One backend's answer within a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Backend that produced it
    pub backend_id: String,
    /// Answer text, the user-facing error text, or [`AWAITING`]
    pub text: String,
    /// Completion tokens, when known
    pub token_count: Option<u32>,
    /// Wall-clock latency of the job
    pub latency_ms: u64,
    /// Failure category, when the job failed
    pub error_kind: Option<ErrorKind>,
    /// User-facing failure message, when the job failed
    pub error_message: Option<String>,
}

impl Response {
    /// Placeholder seeded before dispatch
    pub fn placeholder(backend_id: &str) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            text: AWAITING.to_string(),
            token_count: None,
            latency_ms: 0,
            error_kind: None,
            error_message: None,
        }
    }

    /// Successful answer
    pub fn success(backend_id: &str, reply: BackendReply, latency_ms: u64) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            text: reply.text,
            token_count: reply.token_count,
            latency_ms,
            error_kind: None,
            error_message: None,
        }
    }

    /// Failed job
    pub fn failure(backend_id: &str, error: &NormalizedError, latency_ms: u64) -> Self {
        Self {
            backend_id: backend_id.to_string(),
            text: error.message.clone(),
            token_count: None,
            latency_ms,
            error_kind: Some(error.kind),
            error_message: Some(error.message.clone()),
        }
    }

    /// Whether this is still the pre-dispatch placeholder
    pub fn is_placeholder(&self) -> bool {
        self.error_kind.is_none() && self.latency_ms == 0 && self.text == AWAITING
    }

    /// Whether the job failed
    pub fn is_error(&self) -> bool {
        self.error_kind.is_some()
    }

    /// Text to place in the backend's thread for this response
    pub fn thread_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or(&self.text)
    }
}

/// One user submission and its lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Prompt as submitted (trimmed)
    pub prompt: String,
    /// Latest user message shown for the turn (changes on broadcast follow-ups)
    pub displayed_prompt: String,
    /// Selected backends, in display order
    pub selected_backend_ids: Vec<String>,
    /// Context shared by every job of the initial dispatch
    pub context: TurnContext,
    /// Sampling parameters every job of this turn is sent with
    #[serde(default)]
    pub parameters: GenerationParameters,
    /// Latest response per backend
    pub responses: HashMap<String, Response>,
    /// Largest job latency seen in this turn
    pub total_latency_ms: u64,
    /// Lifecycle state
    pub state: TurnState,
    /// Generation that owns this turn
    pub generation: u64,
    /// When the prompt was submitted
    pub submitted_at: DateTime<Utc>,
}

impl Turn {
    /// Creates a loading turn with one placeholder per backend
    pub fn new(
        prompt: &str,
        selected_backend_ids: Vec<String>,
        context: TurnContext,
        generation: u64,
    ) -> Self {
        let responses = selected_backend_ids
            .iter()
            .map(|id| (id.clone(), Response::placeholder(id)))
            .collect();

        Self {
            prompt: prompt.to_string(),
            displayed_prompt: prompt.to_string(),
            selected_backend_ids,
            context,
            parameters: GenerationParameters::default(),
            responses,
            total_latency_ms: 0,
            state: TurnState::Loading,
            generation,
            submitted_at: Utc::now(),
        }
    }

    /// A turn rejected by validation
    pub fn rejected(prompt: &str, reason: &str, generation: u64) -> Self {
        Self {
            prompt: prompt.to_string(),
            displayed_prompt: prompt.to_string(),
            selected_backend_ids: Vec::new(),
            context: TurnContext::default(),
            parameters: GenerationParameters::default(),
            responses: HashMap::new(),
            total_latency_ms: 0,
            state: TurnState::Error(reason.to_string()),
            generation,
            submitted_at: Utc::now(),
        }
    }

    /// Insert or replace the response for its backend
    pub fn upsert(&mut self, response: Response) {
        self.total_latency_ms = self.total_latency_ms.max(response.latency_ms);
        self.responses.insert(response.backend_id.clone(), response);
    }

    /// Responses in display order
    pub fn responses_in_order(&self) -> Vec<&Response> {
        let mut responses: Vec<&Response> = self.responses.values().collect();
        responses.sort_by(|a, b| display_order(&a.backend_id, &b.backend_id));
        responses
    }

    /// Whether any backend currently carries an error
    pub fn has_errors(&self) -> bool {
        self.responses.values().any(Response::is_error)
    }

    /// Backends whose latest response failed with `kind`, in display order
    pub fn backends_with_error(&self, kind: ErrorKind) -> Vec<String> {
        self.responses_in_order()
            .into_iter()
            .filter(|r| r.error_kind == Some(kind))
            .map(|r| r.backend_id.clone())
            .collect()
    }

    /// Whether every response is still a placeholder
    pub fn is_placeholder_only(&self) -> bool {
        self.responses.values().all(Response::is_placeholder)
    }

    /// Whether `backend_id` was selected for this turn
    pub fn includes(&self, backend_id: &str) -> bool {
        self.selected_backend_ids.iter().any(|id| id == backend_id)
    }
}

/// Contextual action offered by the error banner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BannerAction {
    /// Open credential settings
    OpenSettings,
}

impl BannerAction {
    /// Button label
    pub fn label(self) -> &'static str {
        match self {
            Self::OpenSettings => "Open Settings",
        }
    }
}

/// The single turn-level error banner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalError {
    /// Backend whose failure raised the banner
    pub backend_id: String,
    /// Failure category
    pub kind: ErrorKind,
    /// Banner text
    pub message: String,
    /// Offered action (Auth failures only)
    pub action: Option<BannerAction>,
}

impl GlobalError {
    /// Build a banner from a failed response
    pub fn from_response(response: &Response) -> Option<Self> {
        let kind = response.error_kind?;
        Some(Self {
            backend_id: response.backend_id.clone(),
            kind,
            message: response
                .error_message
                .clone()
                .unwrap_or_else(|| response.text.clone()),
            action: (kind == ErrorKind::Auth).then_some(BannerAction::OpenSettings),
        })
    }
}
