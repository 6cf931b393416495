//! Coro - multi-backend prompt fan-out library
//!
//! This library provides the turn orchestration core behind the `coro` CLI:
//! one prompt is sent to several AI backends concurrently, answers are merged
//! into a single turn as they arrive, and each backend keeps its own
//! conversation thread for follow-ups.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `catalog`: Backend descriptors and the stable display order
//! - `context`: Guidance and web-search context shared by one round
//! - `normalizer`: Maps raw backend faults onto a closed error taxonomy
//! - `thread`: Per-backend conversation threads
//! - `turn`: Turn coordinator, retry policy, tab selection and badges
//! - `providers`: Cloud, on-device and search clients
//! - `storage`: SQLite conversation persistence
//! - `credentials`: API key storage
//! - `suggest`: Query classification and backend suggestions
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use coro::commands::build_coordinator;
//! use coro::catalog::BackendCatalog;
//! use coro::credentials::KeyringCredentialStore;
//! use coro::Config;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     config.validate()?;
//!
//!     let catalog = Arc::new(BackendCatalog::from_config(&config.backends)?);
//!     let credentials = Arc::new(KeyringCredentialStore::new());
//!     let mut coordinator = build_coordinator(&config, catalog, credentials, false)?;
//!     coordinator
//!         .submit("What is Rust?", &["gemini".to_string(), "llama-8b".to_string()], None)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod normalizer;
pub mod providers;
pub mod storage;
pub mod suggest;
pub mod thread;
pub mod turn;

// Re-export commonly used types
pub use catalog::{BackendCatalog, BackendDescriptor};
pub use config::Config;
pub use error::{CoroError, Result};
pub use normalizer::{ErrorKind, NormalizedError};
pub use thread::{Message, Role, ThreadStore};
pub use turn::{Turn, TurnCoordinator, TurnEvent, TurnState};

#[cfg(test)]
pub mod test_utils;
