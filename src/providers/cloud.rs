//! Cloud backend client
//!
//! Talks to OpenAI-compatible chat completion APIs (Groq, DeepSeek and
//! Google's compatibility endpoint). Each configured cloud backend gets a
//! route naming its endpoint, model and credential key; one `send` call maps
//! to exactly one HTTP request for one backend.

use crate::config::BackendConfig;
use crate::credentials::CredentialStore;
use crate::error::{CoroError, Result};
use crate::providers::base::{
    estimate_tokens, retry_after_seconds, status_fault, BackendClient, BackendReply,
    BackendRequest, ClientFault,
};
use crate::thread::Message;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Appended to answers that stopped at the token limit
pub const TRUNCATION_NOTE: &str = "\n\n[Note: Response truncated due to token limit]";

/// Where and how to reach one cloud backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudRoute {
    /// Provider family, used in error messages
    pub provider: String,
    /// Base URL; `/chat/completions` is appended
    pub endpoint: String,
    /// Provider-side model name
    pub model: String,
    /// Credential key holding the API key
    pub credential: String,
}

impl CloudRoute {
    /// Build a route from a backend config, if it is a cloud backend
    pub fn from_config(config: &BackendConfig) -> Option<Self> {
        if config.on_device {
            return None;
        }
        let endpoint = config.endpoint.clone()?;
        Some(Self {
            provider: config.provider.clone(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            credential: config
                .credential
                .clone()
                .unwrap_or_else(|| config.provider.to_lowercase()),
        })
    }
}

/// Client for OpenAI-compatible cloud APIs
///
/// # Examples
///
/// ```no_run
/// use coro::config::Config;
/// use coro::credentials::MemoryCredentialStore;
/// use coro::providers::CloudClient;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let config = Config::default();
/// let store = Arc::new(MemoryCredentialStore::with(&[("groq", "gsk_test")]));
/// let client = CloudClient::new(&config.backends, store, Duration::from_secs(30)).unwrap();
/// assert!(client.route("llama-70b").is_some());
/// ```
pub struct CloudClient {
    client: Client,
    routes: HashMap<String, CloudRoute>,
    credentials: Arc<dyn CredentialStore>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    completion_tokens: Option<u32>,
}

impl CloudClient {
    /// Create a cloud client for every non-on-device backend in `backends`
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(
        backends: &[BackendConfig],
        credentials: Arc<dyn CredentialStore>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("coro/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoroError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        let routes: HashMap<String, CloudRoute> = backends
            .iter()
            .filter_map(|b| CloudRoute::from_config(b).map(|r| (b.id.clone(), r)))
            .collect();

        tracing::info!("Initialized cloud client with {} routes", routes.len());

        Ok(Self {
            client,
            routes,
            credentials,
            timeout,
        })
    }

    /// Route for a backend id
    pub fn route(&self, backend_id: &str) -> Option<&CloudRoute> {
        self.routes.get(backend_id)
    }

    fn convert_messages(request: &BackendRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(system.clone()),
            });
        }
        messages.extend(request.history.iter().filter(|m| !m.is_pending).map(
            |m: &Message| ChatMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
            },
        ));
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(request.prompt.clone()),
        });
        messages
    }

    async fn post(
        &self,
        route: &CloudRoute,
        api_key: &str,
        request: &BackendRequest,
    ) -> std::result::Result<BackendReply, ClientFault> {
        let url = format!("{}/chat/completions", route.endpoint);
        let body = ChatRequest {
            model: &route.model,
            messages: Self::convert_messages(request),
            temperature: request.parameters.temperature,
            max_tokens: request.parameters.max_tokens,
            top_p: request.parameters.top_p,
            stream: false,
        };

        tracing::debug!(backend.id = %request.backend_id, "POST {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientFault::from_transport(&e, self.timeout.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_seconds(response.headers());
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                backend.id = %request.backend_id,
                "{} returned error {}: {}",
                route.provider,
                status,
                error_text
            );
            return Err(status_fault(status.as_u16(), &error_text, retry_after));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| ClientFault::Decode {
            message: format!("Failed to parse {} response: {}", route.provider, e),
        })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ClientFault::Decode {
                message: format!("{} returned no choices", route.provider),
            })?;

        let mut text = choice.message.content.unwrap_or_default();
        match choice.finish_reason.as_deref() {
            Some("length") => text.push_str(TRUNCATION_NOTE),
            Some("content_filter") if text.trim().is_empty() => {
                return Err(ClientFault::Status {
                    status: 200,
                    code: Some("content_filtered".to_string()),
                    message: "Response was blocked by the provider's safety filters".to_string(),
                    retry_after: None,
                });
            }
            _ => {}
        }

        let token_count = parsed
            .usage
            .and_then(|u| u.completion_tokens)
            .or_else(|| Some(estimate_tokens(&text)));

        Ok(BackendReply { text, token_count })
    }
}

#[async_trait]
impl BackendClient for CloudClient {
    async fn send(&self, request: &BackendRequest) -> std::result::Result<BackendReply, ClientFault> {
        let route = self
            .routes
            .get(&request.backend_id)
            .ok_or_else(|| ClientFault::InvalidConfiguration {
                message: format!("No cloud route for backend {}", request.backend_id),
            })?;

        let api_key = match self.credentials.get(&route.credential) {
            Ok(Some(key)) => key,
            Ok(None) => {
                return Err(ClientFault::InvalidConfiguration {
                    message: format!("{} API key not configured", route.provider),
                })
            }
            Err(e) => {
                tracing::warn!("Credential lookup failed for {}: {}", route.credential, e);
                return Err(ClientFault::InvalidConfiguration {
                    message: format!("{} API key not configured", route.provider),
                });
            }
        };

        match tokio::time::timeout(self.timeout, self.post(route, &api_key, request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientFault::Timeout {
                after_seconds: self.timeout.as_secs(),
            }),
        }
    }
}
