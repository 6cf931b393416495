//! On-device backend client
//!
//! Connects to a local Ollama-compatible inference server. Each on-device
//! backend maps to a model name on that server; requests are sent to
//! `/api/chat` without streaming.

use crate::config::{BackendConfig, LocalConfig};
use crate::error::{CoroError, Result};
use crate::providers::base::{
    estimate_tokens, status_fault, BackendClient, BackendReply, BackendRequest, ClientFault,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Local inference server client
///
/// # Examples
///
/// ```
/// use coro::config::{Config, LocalConfig};
/// use coro::providers::LocalClient;
/// use std::time::Duration;
///
/// let config = Config::default();
/// let client = LocalClient::new(LocalConfig::default(), &config.backends, Duration::from_secs(30)).unwrap();
/// assert_eq!(client.host(), "http://localhost:11434");
/// assert_eq!(client.model_for("on-device"), "llama3.2:latest");
/// ```
pub struct LocalClient {
    client: Client,
    config: LocalConfig,
    models: HashMap<String, String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct LocalRequest<'a> {
    model: &'a str,
    messages: Vec<LocalMessage>,
    stream: bool,
    options: LocalOptions,
}

#[derive(Debug, Serialize)]
struct LocalOptions {
    temperature: f32,
    num_predict: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LocalMessage {
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct LocalResponse {
    message: LocalMessage,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    done_reason: Option<String>,
}

impl LocalClient {
    /// Create a client for the on-device backends in `backends`
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(config: LocalConfig, backends: &[BackendConfig], timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("coro/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoroError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        let models = backends
            .iter()
            .filter(|b| b.on_device)
            .map(|b| (b.id.clone(), b.model.clone()))
            .collect();

        tracing::info!(
            "Initialized local inference client: host={}, model={}",
            config.host,
            config.model
        );

        Ok(Self {
            client,
            config,
            models,
            timeout,
        })
    }

    /// Configured server host
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Model used for a backend id, falling back to the default local model
    pub fn model_for(&self, backend_id: &str) -> &str {
        self.models
            .get(backend_id)
            .map(String::as_str)
            .unwrap_or(&self.config.model)
    }

    fn convert_messages(request: &BackendRequest) -> Vec<LocalMessage> {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        if let Some(system) = &request.system_prompt {
            messages.push(LocalMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        for m in request.history.iter().filter(|m| !m.is_pending) {
            messages.push(LocalMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            });
        }
        messages.push(LocalMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });
        messages
    }

    async fn generate(
        &self,
        request: &BackendRequest,
    ) -> std::result::Result<BackendReply, ClientFault> {
        let url = format!("{}/api/chat", self.config.host.trim_end_matches('/'));
        let body = LocalRequest {
            model: self.model_for(&request.backend_id),
            messages: Self::convert_messages(request),
            stream: false,
            options: LocalOptions {
                temperature: request.parameters.temperature,
                num_predict: request.parameters.max_tokens,
                top_p: request.parameters.top_p,
            },
        };

        tracing::debug!(backend.id = %request.backend_id, "Sending request to local server: {}", url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Failed to reach local inference server: {}", e);
                ClientFault::from_transport(&e, self.timeout.as_secs())
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("Local server returned error {}: {}", status, error_text);
            return Err(status_fault(status.as_u16(), &error_text, None));
        }

        let parsed: LocalResponse = response.json().await.map_err(|e| {
            tracing::error!("Failed to parse local server response: {}", e);
            ClientFault::Decode {
                message: format!("Failed to parse local server response: {}", e),
            }
        })?;

        let mut text = parsed.message.content;
        if parsed.done_reason.as_deref() == Some("length") {
            text.push_str(super::cloud::TRUNCATION_NOTE);
        }
        let token_count = parsed.eval_count.or_else(|| Some(estimate_tokens(&text)));

        Ok(BackendReply { text, token_count })
    }
}

#[async_trait]
impl BackendClient for LocalClient {
    async fn send(&self, request: &BackendRequest) -> std::result::Result<BackendReply, ClientFault> {
        match tokio::time::timeout(self.timeout, self.generate(request)).await {
            Ok(result) => result,
            Err(_) => Err(ClientFault::Timeout {
                after_seconds: self.timeout.as_secs(),
            }),
        }
    }
}
