//! Provider module for Coro
//!
//! This module contains the backend client abstraction and the concrete
//! clients for cloud APIs, the local inference server and web search.

pub mod base;
pub mod cloud;
pub mod local;
pub mod search;

pub use base::{
    estimate_tokens, retry_after_seconds, status_fault, BackendClient, BackendReply,
    BackendRequest, ClientFault, GenerationParameters, SearchClient,
};
pub use cloud::{CloudClient, CloudRoute, TRUNCATION_NOTE};
pub use local::LocalClient;
pub use search::TavilySearchClient;

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::Result;
use std::sync::Arc;

/// The two client families a turn dispatches to
///
/// On-device backends go to `on_device`, everything else to `cloud`.
#[derive(Clone)]
pub struct ClientSet {
    /// Cloud API client
    pub cloud: Arc<dyn BackendClient>,
    /// Local inference client
    pub on_device: Arc<dyn BackendClient>,
}

impl ClientSet {
    /// Creates a client set from two clients
    pub fn new(cloud: Arc<dyn BackendClient>, on_device: Arc<dyn BackendClient>) -> Self {
        Self { cloud, on_device }
    }

    /// Use one client for every backend
    pub fn uniform(client: Arc<dyn BackendClient>) -> Self {
        Self {
            cloud: client.clone(),
            on_device: client,
        }
    }

    /// Pick the client for a backend
    pub fn route(&self, is_on_device: bool) -> Arc<dyn BackendClient> {
        if is_on_device {
            self.on_device.clone()
        } else {
            self.cloud.clone()
        }
    }
}

/// Create the cloud and local clients from configuration
///
/// # Errors
///
/// Returns error if an HTTP client cannot be initialized
pub fn create_clients(config: &Config, credentials: Arc<dyn CredentialStore>) -> Result<ClientSet> {
    let timeout = config.turn.request_timeout();
    let cloud = CloudClient::new(&config.backends, credentials, timeout)?;
    let local = LocalClient::new(config.local.clone(), &config.backends, timeout)?;
    Ok(ClientSet::new(Arc::new(cloud), Arc::new(local)))
}

/// Create the search client when search can ever run
///
/// Returns `None` when search is neither enabled nor auto-detected.
///
/// # Errors
///
/// Returns error if the HTTP client cannot be initialized
pub fn create_search_client(
    config: &Config,
    credentials: Arc<dyn CredentialStore>,
) -> Result<Option<Arc<dyn SearchClient>>> {
    if !config.search.enabled && !config.search.auto_detect {
        return Ok(None);
    }
    let client = TavilySearchClient::new(&config.search, credentials)?;
    Ok(Some(Arc::new(client)))
}
