use async_trait::async_trait;
use coro::catalog::BackendCatalog;
use coro::config::{BackendConfig, Config};
use coro::providers::{BackendClient, BackendReply, BackendRequest, ClientFault};
use coro::storage::SqliteStorage;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn create_temp_storage() -> (SqliteStorage, TempDir) {
    let tmp = TempDir::new().expect("failed to create tempdir");
    let db_path = tmp.path().join("history.db");
    let storage =
        SqliteStorage::new_with_path(db_path).expect("failed to create sqlite storage with path");
    (storage, tmp)
}

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("coro.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

#[allow(dead_code)]
pub fn default_catalog() -> BackendCatalog {
    BackendCatalog::from_config(&Config::default().backends).expect("default catalog")
}

/// Cloud backend config pointing at a mock server
#[allow(dead_code)]
pub fn cloud_backend(id: &str, endpoint: &str, credential: &str) -> BackendConfig {
    BackendConfig {
        id: id.to_string(),
        display_name: id.to_string(),
        provider: "Groq".to_string(),
        cost_tier: Default::default(),
        on_device: false,
        model: format!("{}-model", id),
        endpoint: Some(endpoint.to_string()),
        credential: Some(credential.to_string()),
    }
}

/// Backend client that answers from a fixed table
///
/// Backends missing from the table answer `"<backend>: <prompt>"`.
#[allow(dead_code)]
#[derive(Default)]
pub struct TableClient {
    faults: Mutex<HashMap<String, ClientFault>>,
}

#[allow(dead_code)]
impl TableClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(self, backend_id: &str, fault: ClientFault) -> Self {
        self.faults
            .lock()
            .unwrap()
            .insert(backend_id.to_string(), fault);
        self
    }

    pub fn heal(&self, backend_id: &str) {
        self.faults.lock().unwrap().remove(backend_id);
    }
}

#[async_trait]
impl BackendClient for TableClient {
    async fn send(&self, request: &BackendRequest) -> Result<BackendReply, ClientFault> {
        let fault = self.faults.lock().unwrap().get(&request.backend_id).cloned();
        match fault {
            Some(fault) => Err(fault),
            None => Ok(BackendReply::new(
                format!("{}: {}", request.backend_id, request.prompt),
                Some(3),
            )),
        }
    }
}
