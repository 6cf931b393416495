//! Error types for Coro
//!
//! This module defines the crate-level error type, using `thiserror` for
//! ergonomic error handling. Per-backend failures are *not* represented here:
//! those are raw [`crate::providers::ClientFault`] values that the error
//! normalizer turns into data carried inside a turn's responses.

use thiserror::Error;

/// Main error type for Coro operations
///
/// Covers configuration loading, turn validation, persistence, credential
/// storage and the lower-level I/O and serialization failures they wrap.
#[derive(Error, Debug)]
pub enum CoroError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Turn input rejected before anything was dispatched
    #[error("Validation error: {0}")]
    Validation(String),

    /// Backend client construction or routing errors
    #[error("Provider error: {0}")]
    Provider(String),

    /// A backend id that the catalog does not know
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    /// Operation requires an active turn but none exists
    #[error("No active turn: {0}")]
    NoActiveTurn(String),

    /// Web search errors
    #[error("Search error: {0}")]
    Search(String),

    /// Conversation storage errors (database operations)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Credential store errors
    #[error("Credential error: {0}")]
    Credential(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Keyring/credential storage errors
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    /// SQLite errors
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type alias for Coro operations
///
/// Uses `anyhow::Error` as the error type so call sites can attach context
/// while still downcasting to [`CoroError`] where the variant matters.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = CoroError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_validation_error_display() {
        let error = CoroError::Validation("prompt is empty".to_string());
        assert_eq!(error.to_string(), "Validation error: prompt is empty");
    }

    #[test]
    fn test_unknown_backend_display() {
        let error = CoroError::UnknownBackend("gpt-9".to_string());
        assert_eq!(error.to_string(), "Unknown backend: gpt-9");
    }

    #[test]
    fn test_storage_error_display() {
        let error = CoroError::Storage("database connection failed".to_string());
        assert_eq!(
            error.to_string(),
            "Storage error: database connection failed"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: CoroError = io_error.into();
        assert!(matches!(error, CoroError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: CoroError = json_error.into();
        assert!(matches!(error, CoroError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: CoroError = yaml_error.into();
        assert!(matches!(error, CoroError::Yaml(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CoroError>();
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let result: Result<()> = Err(CoroError::NoActiveTurn("retry".to_string()).into());
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoroError>(),
            Some(CoroError::NoActiveTurn(_))
        ));
    }
}
