//! Configuration management for Coro
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::catalog::CostTier;
use crate::error::{CoroError, Result};
use crate::providers::GenerationParameters;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for Coro
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Selectable backends
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
    /// Turn behavior
    #[serde(default)]
    pub turn: TurnConfig,
    /// Web search settings
    #[serde(default)]
    pub search: SearchConfig,
    /// Local inference server settings
    #[serde(default)]
    pub local: LocalConfig,
    /// Conversation storage settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// One selectable backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Stable identifier
    pub id: String,
    /// Human-readable name
    pub display_name: String,
    /// Provider family name
    pub provider: String,
    /// Pricing tier
    #[serde(default)]
    pub cost_tier: CostTier,
    /// Served by the local inference server
    #[serde(default)]
    pub on_device: bool,
    /// Provider-side model name
    pub model: String,
    /// Base URL of an OpenAI-compatible API (cloud backends only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Credential key used to look up the API key (cloud backends only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl BackendConfig {
    fn cloud(
        id: &str,
        display_name: &str,
        provider: &str,
        cost_tier: CostTier,
        model: &str,
        endpoint: &str,
        credential: &str,
    ) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            provider: provider.to_string(),
            cost_tier,
            on_device: false,
            model: model.to_string(),
            endpoint: Some(endpoint.to_string()),
            credential: Some(credential.to_string()),
        }
    }
}

const GOOGLE_OPENAI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1";
const DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com/v1";

fn default_backends() -> Vec<BackendConfig> {
    vec![
        BackendConfig::cloud(
            "gemini",
            "Gemini 2.5 Flash",
            "Google",
            CostTier::Free,
            "gemini-2.5-flash",
            GOOGLE_OPENAI_ENDPOINT,
            "gemini",
        ),
        BackendConfig::cloud(
            "llama-70b",
            "Llama 3.3 70B",
            "Groq",
            CostTier::Free,
            "llama-3.3-70b-versatile",
            GROQ_ENDPOINT,
            "groq",
        ),
        BackendConfig::cloud(
            "llama-8b",
            "Llama 3.1 8B",
            "Groq",
            CostTier::Fast,
            "llama-3.1-8b-instant",
            GROQ_ENDPOINT,
            "groq",
        ),
        BackendConfig::cloud(
            "mixtral",
            "Llama 4 Maverick 17B (MoE)",
            "Groq",
            CostTier::Free,
            "meta-llama/llama-4-maverick-17b-128e-instruct",
            GROQ_ENDPOINT,
            "groq",
        ),
        BackendConfig::cloud(
            "deepseek",
            "DeepSeek V2.5",
            "DeepSeek",
            CostTier::Paid,
            "deepseek-chat",
            DEEPSEEK_ENDPOINT,
            "deepseek",
        ),
        BackendConfig {
            id: "on-device".to_string(),
            display_name: "On-device".to_string(),
            provider: "Local".to_string(),
            cost_tier: CostTier::Free,
            on_device: true,
            model: default_local_model(),
            endpoint: None,
            credential: None,
        },
    ]
}

/// What to do with a job result whose turn has been superseded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StaleResultPolicy {
    /// Drop results tagged with an older generation
    #[default]
    Discard,
    /// Merge them into the current turn anyway (legacy behavior)
    Apply,
}

/// Turn behavior configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Max generated tokens per backend
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Optional nucleus sampling cutoff
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Guidance text shared by every backend
    #[serde(default)]
    pub guidance: Option<String>,
    /// Per-call timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// How long a completion badge stays visible
    #[serde(default = "default_badge_window_ms")]
    pub badge_window_ms: u64,
    /// Handling of results from superseded turns
    #[serde(default)]
    pub stale_results: StaleResultPolicy,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    512
}

fn default_request_timeout() -> u64 {
    30
}

fn default_badge_window_ms() -> u64 {
    4000
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: None,
            guidance: None,
            request_timeout_seconds: default_request_timeout(),
            badge_window_ms: default_badge_window_ms(),
            stale_results: StaleResultPolicy::default(),
        }
    }
}

impl TurnConfig {
    /// Sampling parameters for dispatch
    pub fn parameters(&self) -> GenerationParameters {
        GenerationParameters {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
        }
    }

    /// Per-call timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Badge lifetime as a duration
    pub fn badge_window(&self) -> Duration {
        Duration::from_millis(self.badge_window_ms)
    }
}

/// Web search configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search on every turn
    #[serde(default)]
    pub enabled: bool,
    /// Search when the prompt looks like it needs fresh information
    #[serde(default = "default_true")]
    pub auto_detect: bool,
    /// Search API endpoint
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,
    /// Results requested per search
    #[serde(default = "default_search_max_results")]
    pub max_results: usize,
    /// Search call timeout
    #[serde(default = "default_search_timeout")]
    pub timeout_seconds: u64,
}

fn default_true() -> bool {
    true
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}

fn default_search_max_results() -> usize {
    3
}

fn default_search_timeout() -> u64 {
    10
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_detect: true,
            endpoint: default_search_endpoint(),
            max_results: default_search_max_results(),
            timeout_seconds: default_search_timeout(),
        }
    }
}

/// Local inference server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Server host URL
    #[serde(default = "default_local_host")]
    pub host: String,
    /// Fallback model for on-device backends
    #[serde(default = "default_local_model")]
    pub model: String,
}

fn default_local_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_local_model() -> String {
    "llama3.2:latest".to_string()
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            host: default_local_host(),
            model: default_local_model(),
        }
    }
}

/// Conversation storage configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database path; platform data dir when unset
    #[serde(default)]
    pub db_path: Option<String>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CoroError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| CoroError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(value) = std::env::var("CORO_TEMPERATURE") {
            match value.parse() {
                Ok(v) => self.turn.temperature = v,
                Err(_) => tracing::warn!("Invalid CORO_TEMPERATURE: {}", value),
            }
        }

        if let Ok(value) = std::env::var("CORO_MAX_TOKENS") {
            match value.parse() {
                Ok(v) => self.turn.max_tokens = v,
                Err(_) => tracing::warn!("Invalid CORO_MAX_TOKENS: {}", value),
            }
        }

        if let Ok(value) = std::env::var("CORO_TIMEOUT_SECONDS") {
            match value.parse() {
                Ok(v) => self.turn.request_timeout_seconds = v,
                Err(_) => tracing::warn!("Invalid CORO_TIMEOUT_SECONDS: {}", value),
            }
        }

        if let Ok(value) = std::env::var("CORO_GUIDANCE") {
            self.turn.guidance = Some(value);
        }

        if let Ok(value) = std::env::var("CORO_STALE_RESULTS") {
            match value.to_lowercase().as_str() {
                "discard" => self.turn.stale_results = StaleResultPolicy::Discard,
                "apply" => self.turn.stale_results = StaleResultPolicy::Apply,
                _ => tracing::warn!("Invalid CORO_STALE_RESULTS: {}", value),
            }
        }

        if let Ok(value) = std::env::var("CORO_SEARCH_ENABLED") {
            match value.parse() {
                Ok(v) => self.search.enabled = v,
                Err(_) => tracing::warn!("Invalid CORO_SEARCH_ENABLED: {}", value),
            }
        }

        if let Ok(host) = std::env::var("CORO_LOCAL_HOST") {
            self.local.host = host;
        }

        if let Ok(model) = std::env::var("CORO_LOCAL_MODEL") {
            self.local.model = model;
        }

        if let Ok(path) = std::env::var("CORO_HISTORY_DB") {
            self.storage.db_path = Some(path);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(path) = &cli.storage_path {
            self.storage.db_path = Some(path.clone());
        }

        match &cli.command {
            crate::cli::Commands::Ask {
                temperature,
                max_tokens,
                search,
                guidance,
                ..
            } => {
                if let Some(t) = temperature {
                    self.turn.temperature = *t;
                }
                if let Some(m) = max_tokens {
                    self.turn.max_tokens = *m;
                }
                self.apply_round_overrides(*search, guidance.as_deref());
            }
            crate::cli::Commands::Chat {
                search, guidance, ..
            } => self.apply_round_overrides(*search, guidance.as_deref()),
            _ => {}
        }
    }

    fn apply_round_overrides(&mut self, search: bool, guidance: Option<&str>) {
        if search {
            self.search.enabled = true;
        }
        if let Some(g) = guidance {
            self.turn.guidance = Some(g.to_string());
        }
    }

    /// Look up a backend by id
    pub fn backend(&self, id: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.id == id)
    }

    /// Validate the configuration
    ///
    /// Ensures all configuration values are within acceptable ranges
    /// and that required fields are properly set.
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(CoroError::Config("At least one backend must be configured".to_string()).into());
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.trim().is_empty() {
                return Err(CoroError::Config("Backend id cannot be empty".to_string()).into());
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(
                    CoroError::Config(format!("Duplicate backend id: {}", backend.id)).into(),
                );
            }
            if backend.model.trim().is_empty() {
                return Err(CoroError::Config(format!(
                    "Backend {} has no model configured",
                    backend.id
                ))
                .into());
            }
            if !backend.on_device && backend.endpoint.as_deref().unwrap_or("").is_empty() {
                return Err(CoroError::Config(format!(
                    "Cloud backend {} needs an endpoint",
                    backend.id
                ))
                .into());
            }
        }

        if !(0.0..=2.0).contains(&self.turn.temperature) {
            return Err(CoroError::Config(
                "turn.temperature must be between 0.0 and 2.0".to_string(),
            )
            .into());
        }

        if self.turn.max_tokens == 0 || self.turn.max_tokens > 32000 {
            return Err(
                CoroError::Config("turn.max_tokens must be between 1 and 32000".to_string()).into(),
            );
        }

        if let Some(top_p) = self.turn.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(
                    CoroError::Config("turn.top_p must be between 0.0 and 1.0".to_string()).into(),
                );
            }
        }

        if self.turn.request_timeout_seconds == 0 {
            return Err(CoroError::Config(
                "turn.request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.search.timeout_seconds == 0 {
            return Err(CoroError::Config(
                "search.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.search.max_results == 0 {
            return Err(
                CoroError::Config("search.max_results must be greater than 0".to_string()).into(),
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backends: default_backends(),
            turn: TurnConfig::default(),
            search: SearchConfig::default(),
            local: LocalConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}
