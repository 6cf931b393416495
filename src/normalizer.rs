//! Error normalization for backend failures
//!
//! Every backend reports failure differently: transport faults, non-2xx
//! statuses with or without a structured body, undecodable payloads, missing
//! credentials. This module maps all of them onto one [`ErrorKind`] taxonomy
//! plus a user-facing message and a retry hint.
//!
//! Classification is an ordered rule list. The first rule that yields a kind
//! wins:
//!
//! 1. machine-readable error code from the response body
//! 2. HTTP status
//! 3. fault shape (timeout, connection, decode)
//! 4. keyword match on the human-readable message
//!
//! and anything left over is [`ErrorKind::Unknown`].

use crate::providers::ClientFault;
use serde::{Deserialize, Serialize};

/// Canonical failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing, invalid or rejected credentials
    Auth,
    /// Provider throttled the request
    RateLimit,
    /// Request did not complete in time
    Timeout,
    /// Provider is temporarily unavailable
    ServiceUnavailable,
    /// Model is overloaded
    ModelOverloaded,
    /// Provider rejected the request itself
    InvalidRequest,
    /// Transport-level failure
    NetworkError,
    /// Response body could not be decoded
    DecodingError,
    /// Anything else
    Unknown,
}

impl ErrorKind {
    /// Whether a plain manual retry can reasonably succeed
    ///
    /// `Auth` is not retryable here: it is resolved by a credential change,
    /// which drives the automatic retry path instead.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::RateLimit
                | Self::ServiceUnavailable
                | Self::Timeout
                | Self::NetworkError
                | Self::ModelOverloaded
        )
    }

    /// Every kind, in declaration order
    pub const ALL: [ErrorKind; 9] = [
        Self::Auth,
        Self::RateLimit,
        Self::Timeout,
        Self::ServiceUnavailable,
        Self::ModelOverloaded,
        Self::InvalidRequest,
        Self::NetworkError,
        Self::DecodingError,
        Self::Unknown,
    ];

    /// Recover a kind from a persisted user-facing message
    ///
    /// Saved conversations keep the message but not the kind. An exact match
    /// against the message table wins; otherwise the keyword rules apply.
    pub fn from_stored_message(message: &str) -> Self {
        Self::ALL
            .iter()
            .copied()
            .filter(|kind| *kind != Self::Unknown)
            .find(|kind| kind.user_message("") == message)
            .or_else(|| kind_for_message(message))
            .unwrap_or(Self::Unknown)
    }

    /// Whether a credential change should trigger an automatic retry
    pub fn triggers_auto_retry(self) -> bool {
        self == Self::Auth
    }

    /// User-facing message for this kind
    pub fn user_message(self, original: &str) -> String {
        match self {
            Self::Auth => "Authentication failed. Please check your API key in settings.".to_string(),
            Self::RateLimit => {
                "Rate limit exceeded. Please wait a moment and try again.".to_string()
            }
            Self::Timeout => {
                "Request timed out. Please try again with a shorter prompt or lower max tokens."
                    .to_string()
            }
            Self::ServiceUnavailable => {
                "Service is temporarily unavailable. Please try again later.".to_string()
            }
            Self::ModelOverloaded => {
                "Model is currently overloaded. Please try again in a moment.".to_string()
            }
            Self::InvalidRequest => {
                "Invalid request. Please check your input and try again.".to_string()
            }
            Self::NetworkError => {
                "Network error. Please check your connection and try again.".to_string()
            }
            Self::DecodingError => {
                "Received a response that could not be read. Please try again.".to_string()
            }
            Self::Unknown => format!("An unexpected error occurred: {}", original),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::ServiceUnavailable => "service_unavailable",
            Self::ModelOverloaded => "model_overloaded",
            Self::InvalidRequest => "invalid_request",
            Self::NetworkError => "network_error",
            Self::DecodingError => "decoding_error",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Result of normalizing one failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedError {
    /// Canonical category
    pub kind: ErrorKind,
    /// Message shown to the user
    pub message: String,
    /// Whether a manual retry is worthwhile
    pub retryable: bool,
    /// Provider-suggested wait before retrying
    pub retry_after_seconds: Option<u64>,
}

/// One classification rule
type Rule = fn(&ClientFault) -> Option<ErrorKind>;

/// Ordered rule list, highest precedence first
const RULES: &[(&str, Rule)] = &[
    ("machine_code", classify_by_code),
    ("http_status", classify_by_status),
    ("fault_shape", classify_by_shape),
    ("keyword", classify_by_message),
];

/// Normalize a raw client fault
///
/// # Examples
///
/// ```
/// use coro::normalizer::{normalize, ErrorKind};
/// use coro::providers::ClientFault;
///
/// let fault = ClientFault::Status {
///     status: 401,
///     code: Some("invalid_api_key".to_string()),
///     message: "Incorrect API key provided".to_string(),
///     retry_after: None,
/// };
/// let normalized = normalize(&fault);
/// assert_eq!(normalized.kind, ErrorKind::Auth);
/// assert!(!normalized.retryable);
/// ```
pub fn normalize(fault: &ClientFault) -> NormalizedError {
    let kind = classify(fault);
    let retry_after_seconds = match fault {
        ClientFault::Status { retry_after, .. } => *retry_after,
        _ => None,
    };

    NormalizedError {
        kind,
        message: kind.user_message(&fault.to_string()),
        retryable: kind.is_retryable(),
        retry_after_seconds,
    }
}

/// Run the rule list and return the first match, or `Unknown`
pub fn classify(fault: &ClientFault) -> ErrorKind {
    for (name, rule) in RULES {
        if let Some(kind) = rule(fault) {
            tracing::debug!(rule = name, kind = %kind, "Classified backend failure");
            return kind;
        }
    }
    ErrorKind::Unknown
}

/// Map a provider error code onto a kind
///
/// Returns `None` for empty or unrecognized codes so lower-precedence rules
/// still get a chance.
pub fn kind_for_code(code: &str) -> Option<ErrorKind> {
    let code = code.trim().to_ascii_lowercase();
    let kind = match code.as_str() {
        "" => return None,
        "authentication_failed" | "authentication_error" | "api_key_missing"
        | "api_key_invalid" | "invalid_api_key" | "unauthorized" | "permission_denied" => {
            ErrorKind::Auth
        }
        "rate_limited" | "rate_limit_exceeded" | "rate_limit_error" | "quota_exceeded"
        | "insufficient_quota" | "resource_exhausted" => ErrorKind::RateLimit,
        "invalid_request" | "invalid_request_error" | "invalid_model" | "model_not_found"
        | "invalid_parameters" | "invalid_argument" | "content_filtered"
        | "max_tokens_reached" | "context_length_exceeded" => ErrorKind::InvalidRequest,
        "model_overloaded" | "overloaded_error" | "overloaded" => ErrorKind::ModelOverloaded,
        "model_unavailable" | "service_unavailable" | "unavailable" => {
            ErrorKind::ServiceUnavailable
        }
        "timeout" | "deadline_exceeded" | "request_timeout" => ErrorKind::Timeout,
        "network_error" | "connection_error" => ErrorKind::NetworkError,
        _ => return None,
    };
    Some(kind)
}

/// Map an HTTP status onto a kind
pub fn kind_for_status(status: u16) -> Option<ErrorKind> {
    match status {
        401 | 403 => Some(ErrorKind::Auth),
        408 => Some(ErrorKind::Timeout),
        429 => Some(ErrorKind::RateLimit),
        500..=599 => Some(ErrorKind::ServiceUnavailable),
        _ => None,
    }
}

/// Keyword match on a free-text message (case-insensitive)
pub fn kind_for_message(message: &str) -> Option<ErrorKind> {
    const KEYWORDS: &[(&[&str], ErrorKind)] = &[
        (&["api key", "unauthorized"], ErrorKind::Auth),
        (&["rate limit"], ErrorKind::RateLimit),
        (&["timeout", "timed out"], ErrorKind::Timeout),
        (&["network", "connection"], ErrorKind::NetworkError),
        (&["service unavailable"], ErrorKind::ServiceUnavailable),
        (&["overloaded"], ErrorKind::ModelOverloaded),
    ];

    let lowered = message.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(words, _)| words.iter().any(|w| lowered.contains(w)))
        .map(|(_, kind)| *kind)
}

fn classify_by_code(fault: &ClientFault) -> Option<ErrorKind> {
    match fault {
        ClientFault::Status {
            code: Some(code), ..
        } => kind_for_code(code),
        _ => None,
    }
}

fn classify_by_status(fault: &ClientFault) -> Option<ErrorKind> {
    match fault {
        ClientFault::Status { status, .. } => kind_for_status(*status),
        _ => None,
    }
}

fn classify_by_shape(fault: &ClientFault) -> Option<ErrorKind> {
    match fault {
        ClientFault::Timeout { .. } => Some(ErrorKind::Timeout),
        ClientFault::Connection { .. } => Some(ErrorKind::NetworkError),
        ClientFault::Decode { .. } => Some(ErrorKind::DecodingError),
        _ => None,
    }
}

fn classify_by_message(fault: &ClientFault) -> Option<ErrorKind> {
    kind_for_message(fault.message())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16, code: Option<&str>, message: &str) -> ClientFault {
        ClientFault::Status {
            status,
            code: code.map(str::to_string),
            message: message.to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn test_code_wins_over_status() {
        // 500 would be ServiceUnavailable, but the explicit code says Auth.
        let fault = status(500, Some("invalid_api_key"), "boom");
        assert_eq!(classify(&fault), ErrorKind::Auth);
    }

    #[test]
    fn test_empty_code_falls_through_to_status() {
        let fault = status(429, Some("  "), "slow down");
        assert_eq!(classify(&fault), ErrorKind::RateLimit);
    }

    #[test]
    fn test_unrecognized_code_falls_through_to_status() {
        let fault = status(503, Some("mystery_code"), "");
        assert_eq!(classify(&fault), ErrorKind::ServiceUnavailable);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(kind_for_status(401), Some(ErrorKind::Auth));
        assert_eq!(kind_for_status(403), Some(ErrorKind::Auth));
        assert_eq!(kind_for_status(408), Some(ErrorKind::Timeout));
        assert_eq!(kind_for_status(429), Some(ErrorKind::RateLimit));
        assert_eq!(kind_for_status(502), Some(ErrorKind::ServiceUnavailable));
        assert_eq!(kind_for_status(404), None);
    }

    #[test]
    fn test_status_beats_keywords() {
        let fault = status(429, None, "network connection reset");
        assert_eq!(classify(&fault), ErrorKind::RateLimit);
    }

    #[test]
    fn test_keyword_fallback_for_unmapped_status() {
        let fault = status(400, None, "Your API key is malformed");
        assert_eq!(classify(&fault), ErrorKind::Auth);
    }

    #[test]
    fn test_keyword_matching_is_case_insensitive() {
        assert_eq!(kind_for_message("RATE LIMIT reached"), Some(ErrorKind::RateLimit));
        assert_eq!(kind_for_message("Unauthorized"), Some(ErrorKind::Auth));
        assert_eq!(kind_for_message("Service Unavailable"), Some(ErrorKind::ServiceUnavailable));
        assert_eq!(kind_for_message("nothing useful"), None);
    }

    #[test]
    fn test_missing_credentials_classify_as_auth() {
        let fault = ClientFault::InvalidConfiguration {
            message: "Groq API key not configured".to_string(),
        };
        assert_eq!(classify(&fault), ErrorKind::Auth);
    }

    #[test]
    fn test_fault_shapes() {
        assert_eq!(
            classify(&ClientFault::Timeout { after_seconds: 30 }),
            ErrorKind::Timeout
        );
        assert_eq!(
            classify(&ClientFault::Connection {
                message: "dns failure".to_string()
            }),
            ErrorKind::NetworkError
        );
        assert_eq!(
            classify(&ClientFault::Decode {
                message: "expected value at line 1".to_string()
            }),
            ErrorKind::DecodingError
        );
    }

    #[test]
    fn test_fault_shape_beats_keywords() {
        let connection = ClientFault::Connection {
            message: "connection reset while sending api key".to_string(),
        };
        assert_eq!(classify(&connection), ErrorKind::NetworkError);

        let decode = ClientFault::Decode {
            message: "missing field `rate limit` in body".to_string(),
        };
        assert_eq!(classify(&decode), ErrorKind::DecodingError);
    }

    #[test]
    fn test_unknown_default_keeps_original_text() {
        let fault = status(418, None, "I'm a teapot");
        let normalized = normalize(&fault);
        assert_eq!(normalized.kind, ErrorKind::Unknown);
        assert!(normalized.message.contains("I'm a teapot"));
        assert!(!normalized.retryable);
    }

    #[test]
    fn test_retryable_set() {
        for kind in [
            ErrorKind::RateLimit,
            ErrorKind::ServiceUnavailable,
            ErrorKind::Timeout,
            ErrorKind::NetworkError,
            ErrorKind::ModelOverloaded,
        ] {
            assert!(kind.is_retryable(), "{} should be retryable", kind);
        }
        for kind in [ErrorKind::Auth, ErrorKind::InvalidRequest, ErrorKind::Unknown] {
            assert!(!kind.is_retryable(), "{} should not be retryable", kind);
        }
        assert!(ErrorKind::Auth.triggers_auto_retry());
        assert!(!ErrorKind::RateLimit.triggers_auto_retry());
    }

    #[test]
    fn test_retry_after_is_carried() {
        let fault = ClientFault::Status {
            status: 429,
            code: None,
            message: "Too many requests".to_string(),
            retry_after: Some(12),
        };
        let normalized = normalize(&fault);
        assert_eq!(normalized.kind, ErrorKind::RateLimit);
        assert_eq!(normalized.retry_after_seconds, Some(12));
        assert!(normalized.retryable);
    }

    #[test]
    fn test_user_message_round_trips_to_auth() {
        let message = ErrorKind::Auth.user_message("");
        assert_eq!(kind_for_message(&message), Some(ErrorKind::Auth));
    }

    #[test]
    fn test_from_stored_message_recovers_every_kind() {
        for kind in ErrorKind::ALL {
            if kind == ErrorKind::Unknown {
                continue;
            }
            assert_eq!(ErrorKind::from_stored_message(&kind.user_message("")), kind);
        }
        assert_eq!(
            ErrorKind::from_stored_message("An unexpected error occurred: boom"),
            ErrorKind::Unknown
        );
        assert_eq!(
            ErrorKind::from_stored_message("HTTP 401: unauthorized"),
            ErrorKind::Auth
        );
    }
}
