//! Provider credential storage
//!
//! API keys live in the operating system's native credential store under the
//! `coro` service, one entry per credential key (`groq`, `gemini`,
//! `deepseek`, `tavily`, ...). Reads fall back to `<KEY>_API_KEY` environment
//! variables so headless setups work without a keyring daemon.

use crate::error::{CoroError, Result};
use std::collections::HashMap;
use std::sync::RwLock;

/// Keyring service name
pub const KEYRING_SERVICE: &str = "coro";

/// Opaque key-value store for API keys
pub trait CredentialStore: Send + Sync {
    /// Read a credential; `None` when unset or empty
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a credential
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a credential
    fn delete(&self, key: &str) -> Result<()>;

    /// Whether any of `keys` currently holds a non-empty value
    fn any_present(&self, keys: &[String]) -> bool {
        keys.iter()
            .any(|key| matches!(self.get(key), Ok(Some(ref v)) if !v.is_empty()))
    }
}

/// Environment variable consulted when the keyring has no entry
///
/// # Examples
///
/// ```
/// use coro::credentials::env_var_name;
///
/// assert_eq!(env_var_name("groq"), "GROQ_API_KEY");
/// assert_eq!(env_var_name("on-device"), "ON_DEVICE_API_KEY");
/// ```
pub fn env_var_name(key: &str) -> String {
    format!("{}_API_KEY", key.to_uppercase().replace('-', "_"))
}

/// Credential store backed by the system keyring
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl KeyringCredentialStore {
    /// Creates a store using the default service name
    pub fn new() -> Self {
        Self {
            service: KEYRING_SERVICE.to_string(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        Ok(keyring::Entry::new(&self.service, key)?)
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let from_keyring = match self.entry(key).map(|e| e.get_password()) {
            Ok(Ok(value)) if !value.is_empty() => Some(value),
            Ok(Ok(_)) | Ok(Err(keyring::Error::NoEntry)) => None,
            Ok(Err(e)) => {
                tracing::debug!("Keyring read failed for {}: {}", key, e);
                None
            }
            Err(e) => {
                tracing::debug!("Keyring not available for {}: {}", key, e);
                None
            }
        };

        if from_keyring.is_some() {
            return Ok(from_keyring);
        }

        Ok(std::env::var(env_var_name(key))
            .ok()
            .filter(|v| !v.trim().is_empty()))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(CoroError::Credential("Credential key cannot be empty".to_string()).into());
        }
        self.entry(key)?.set_password(value)?;
        tracing::info!(credential.key = key, "Stored credential in keyring");
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => {
                tracing::info!(credential.key = key, "Removed credential from keyring");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local credential store
///
/// Used by tests and by embedders that manage secrets themselves.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `(key, value)` pairs
    pub fn with(entries: &[(&str, &str)]) -> Self {
        let values = entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values: RwLock::new(values),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self
            .values
            .read()
            .map_err(|_| CoroError::Credential("Credential store lock poisoned".to_string()))?;
        Ok(values.get(key).filter(|v| !v.is_empty()).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| CoroError::Credential("Credential store lock poisoned".to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut values = self
            .values
            .write()
            .map_err(|_| CoroError::Credential("Credential store lock poisoned".to_string()))?;
        values.remove(key);
        Ok(())
    }
}
