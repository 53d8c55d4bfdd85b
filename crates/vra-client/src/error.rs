//! Aria Automation client errors

use thiserror::Error;

/// Errors that can occur when interacting with the Aria Automation API
#[derive(Debug, Error)]
pub enum VraError {
    /// HTTP request/response error (connection refused, TLS, timeout, body decode)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The API is temporarily unavailable (5xx)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Login failed or the token was rejected
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A query matched more results than the service returned
    #[error("Incomplete result: {returned} of {total} returned")]
    IncompleteResult { returned: usize, total: u64 },

    /// The configured base URL cannot be used
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl VraError {
    /// Whether the request itself was refused by the service (bad content),
    /// as opposed to the service being unreachable or unauthenticated.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Api { status, .. } => (400..500).contains(status),
            Self::InvalidRequest(_) => true,
            _ => false,
        }
    }
}
