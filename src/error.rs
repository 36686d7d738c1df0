// Error handling module
// Defines session error types and their classification

use thiserror::Error;

/// Maximum length for error response bodies kept in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Errors that can occur while establishing or renewing a session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Transport failure or timeout talking to the auth endpoint
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The auth endpoint refused the credentials
    #[error("Credentials rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// The auth endpoint failed on its side
    #[error("Auth server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    /// Response body could not be understood
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Auth bundle lacked an access or refresh token
    #[error("Auth response is missing {0}")]
    IncompleteTokens(&'static str),

    /// Local key-value store failure
    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),

    /// Persisted session could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..end],
                body.len()
            )
        }
    }

    /// Classify a non-success HTTP status from the auth endpoint
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = Self::truncate_body(body);
        match status.as_u16() {
            code @ 500..=599 => SessionError::ServerError {
                status: code,
                message,
            },
            code => SessionError::Rejected {
                status: code,
                message,
            },
        }
    }

    /// Whether retrying later could succeed (transport or server trouble)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Network(_) | SessionError::ServerError { .. }
        )
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
