//! Base backend-client trait and common types for Coro
//!
//! This module defines the [`BackendClient`] trait every provider family
//! implements (cloud HTTP APIs and the local inference server), the
//! [`SearchClient`] trait for the web search proxy, and the raw
//! [`ClientFault`] failure type that the error normalizer classifies.

use crate::context::SearchSnippet;
use crate::error::Result;
use crate::thread::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sampling parameters forwarded to every backend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    /// Sampling temperature
    pub temperature: f32,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
    /// Nucleus sampling cutoff
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 512,
            top_p: None,
        }
    }
}

/// Everything one backend needs to answer one exchange
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Target backend
    pub backend_id: String,
    /// The new user message
    pub prompt: String,
    /// Earlier resolved messages of this backend's thread
    pub history: Vec<Message>,
    /// Shared system prompt for the turn
    pub system_prompt: Option<String>,
    /// Sampling parameters
    pub parameters: GenerationParameters,
}

/// Successful backend answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    /// Generated text
    pub text: String,
    /// Completion tokens (may be an estimate)
    pub token_count: Option<u32>,
}

impl BackendReply {
    /// Creates a reply
    ///
    /// # Examples
    ///
    /// ```
    /// use coro::providers::BackendReply;
    ///
    /// let reply = BackendReply::new("Hello!", Some(2));
    /// assert_eq!(reply.text, "Hello!");
    /// ```
    pub fn new(text: impl Into<String>, token_count: Option<u32>) -> Self {
        Self {
            text: text.into(),
            token_count,
        }
    }
}

/// Raw failure from a backend call, before normalization
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientFault {
    /// Could not reach the backend
    #[error("Connection failed: {message}")]
    Connection {
        /// Transport error text
        message: String,
    },

    /// Request-level timeout elapsed
    #[error("Request timed out after {after_seconds}s")]
    Timeout {
        /// Configured limit
        after_seconds: u64,
    },

    /// Non-2xx response
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Machine-readable code from the error body
        code: Option<String>,
        /// Human-readable message from the error body (or raw body)
        message: String,
        /// Value of a `Retry-After` header, in seconds
        retry_after: Option<u64>,
    },

    /// 2xx response whose body could not be decoded
    #[error("Malformed response: {message}")]
    Decode {
        /// Decoder error text
        message: String,
    },

    /// Client is not usable as configured (e.g. missing API key)
    #[error("{message}")]
    InvalidConfiguration {
        /// Description of the problem
        message: String,
    },
}

impl ClientFault {
    /// Human-readable message carried by the fault
    pub fn message(&self) -> &str {
        match self {
            Self::Connection { message }
            | Self::Status { message, .. }
            | Self::Decode { message }
            | Self::InvalidConfiguration { message } => message,
            Self::Timeout { .. } => "timeout",
        }
    }

    /// Convert a transport error from `reqwest`
    pub fn from_transport(error: &reqwest::Error, timeout_seconds: u64) -> Self {
        if error.is_timeout() {
            Self::Timeout {
                after_seconds: timeout_seconds,
            }
        } else if error.is_decode() {
            Self::Decode {
                message: error.to_string(),
            }
        } else {
            Self::Connection {
                message: error.to_string(),
            }
        }
    }
}

/// Standard `{ "error": { ... } }` body used by OpenAI-compatible APIs
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Build a `Status` fault from a non-2xx response body
///
/// Understands `{"error": {"code", "type", "status", "message"}}` bodies. The
/// code is taken from `code` (string only), then `status`, then `type`.
///
/// # Examples
///
/// ```
/// use coro::providers::{status_fault, ClientFault};
///
/// let body = r#"{"error":{"message":"bad key","code":"invalid_api_key"}}"#;
/// match status_fault(401, body, None) {
///     ClientFault::Status { code, message, .. } => {
///         assert_eq!(code.as_deref(), Some("invalid_api_key"));
///         assert_eq!(message, "bad key");
///     }
///     _ => unreachable!(),
/// }
/// ```
pub fn status_fault(status: u16, body: &str, retry_after: Option<u64>) -> ClientFault {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let err = envelope.error;
            let code = err
                .code
                .and_then(|c| c.as_str().map(str::to_string))
                .or(err.status)
                .or(err.error_type)
                .filter(|c| !c.trim().is_empty());
            ClientFault::Status {
                status,
                code,
                message: err.message.unwrap_or_else(|| body.to_string()),
                retry_after,
            }
        }
        Err(_) => ClientFault::Status {
            status,
            code: None,
            message: body.to_string(),
            retry_after,
        },
    }
}

/// Parse a `Retry-After` header given in seconds
pub fn retry_after_seconds(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Rough token estimate used when a backend reports no usage (4 chars per token)
pub fn estimate_tokens(text: &str) -> u32 {
    (text.chars().count() / 4) as u32
}

/// Backend client trait
///
/// One implementation per provider family. Each call serves exactly one
/// backend; requests are never batched across backends.
///
/// # Examples
///
/// ```no_run
/// use coro::providers::{BackendClient, BackendReply, BackendRequest, ClientFault};
/// use async_trait::async_trait;
///
/// struct Echo;
///
/// #[async_trait]
/// impl BackendClient for Echo {
///     async fn send(&self, request: &BackendRequest) -> Result<BackendReply, ClientFault> {
///         Ok(BackendReply::new(request.prompt.clone(), None))
///     }
/// }
/// ```
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Send one exchange to one backend
    ///
    /// # Errors
    ///
    /// Returns the raw [`ClientFault`]; callers normalize it.
    async fn send(&self, request: &BackendRequest) -> std::result::Result<BackendReply, ClientFault>;
}

/// Web search collaborator
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Run one search
    ///
    /// # Errors
    ///
    /// Returns error on any transport or provider failure; callers degrade to
    /// "no snippets".
    async fn search(&self, query: &str) -> Result<Vec<SearchSnippet>>;
}
