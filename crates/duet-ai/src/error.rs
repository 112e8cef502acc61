//! Error types for duet-ai

use thiserror::Error;

/// Result type alias using duet-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a chat backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend answered with a non-success status code
    #[error("HTTP error: {code}")]
    Status { code: u16, body: String },

    /// The response body ended or broke in an unexpected way
    #[error("Stream error: {0}")]
    Stream(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a status error from a code and response body
    pub fn status(code: u16, body: impl Into<String>) -> Self {
        Self::Status {
            code,
            body: body.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_matches_code() {
        let e = Error::status(503, "busy");
        assert_eq!(e.to_string(), "HTTP error: 503");
    }

    #[test]
    fn test_json_error_converts() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Json(_)));
    }
}
