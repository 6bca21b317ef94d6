//! ZBD API error types
//!
//! ZBD answers every request with an envelope of the form
//!
//! ```json
//! {
//!   "success": false,
//!   "message": "Human-readable error message",
//!   "data": null
//! }
//! ```
//!
//! Non-2xx responses are surfaced as [`Error::Api`] carrying the HTTP status and
//! the `message` field, or the raw body when it is not a ZBD envelope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// ZBD API error
#[derive(Debug, Error)]
pub enum Error {
    /// Resource not found (404)
    #[error("Not found")]
    NotFound,

    /// Invalid URL format
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// HTTP request error (connect failures and timeouts included)
    #[error("HTTP error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// ZBD returned a non-success status
    #[error("ZBD API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Provider message, or the raw response body
        message: String,
    },

    /// Exchange rate was zero, negative or not a number
    #[error("Invalid exchange rate received from ZBD: {0}")]
    InvalidRate(f64),
}

impl Error {
    /// Build an [`Error::Api`] from a status code and response body
    pub(crate) fn from_response(status: u16, body: &str) -> Self {
        let message = serde_json::from_str::<ZbdErrorBody>(body)
            .ok()
            .and_then(|e| e.message)
            .unwrap_or_else(|| body.to_string());

        Self::Api { status, message }
    }
}

/// Error envelope returned by ZBD
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ZbdErrorBody {
    /// Always `false` on errors
    #[serde(default)]
    pub success: bool,
    /// Error description
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_response_envelope() {
        let err = Error::from_response(400, r#"{"success":false,"message":"Invalid amount"}"#);
        match err {
            Error::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Invalid amount");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_from_response_raw_body() {
        let err = Error::from_response(502, "Bad Gateway");
        assert_eq!(err.to_string(), "ZBD API error (502): Bad Gateway");
    }
}
