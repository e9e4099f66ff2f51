//! # Error Handling
//!
//! Two families of errors live here:
//!
//! - [`RelayError`]: everything that can go wrong while relaying one audio
//!   message. These never leave the WebSocket handler as Rust errors; they are
//!   turned into an `{"error": ...}` message for the client.
//! - [`AppError`]: failures on the plain HTTP surfaces (health, metrics, config),
//!   rendered as JSON through actix's `ResponseError`.
//!
//! ## Client-visible messages:
//! Upstream details (status codes, response bodies, file paths) are logged but
//! never sent to clients; [`RelayError::client_message`] is the only text a
//! client sees.

use crate::relay::storage::StorageError;
use crate::transcription::TranscriptionError;

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Shown to clients when the remote transcription call fails for any reason.
pub const TRANSCRIPTION_FAILED: &str = "Transcription failed";

/// Shown to clients when the payload could not be staged.
pub const STORAGE_FAILED: &str = "Failed to store audio payload";

/// Failures of a single relay operation.
#[derive(Debug)]
pub enum RelayError {
    /// Transient storage could not be written (or removed)
    Storage(StorageError),

    /// The remote call failed: connectivity, status or response shape
    Transcription(TranscriptionError),

    /// The inbound message was not something the relay accepts
    Protocol(String),
}

impl RelayError {
    /// The message placed in the client's `{"error": ...}` payload.
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Storage(_) => STORAGE_FAILED.to_string(),
            RelayError::Transcription(_) => TRANSCRIPTION_FAILED.to_string(),
            RelayError::Protocol(reason) => reason.clone(),
        }
    }
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Storage(err) => write!(f, "Storage error: {}", err),
            RelayError::Transcription(err) => write!(f, "Transcription error: {}", err),
            RelayError::Protocol(reason) => write!(f, "Protocol error: {}", reason),
        }
    }
}

impl std::error::Error for RelayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayError::Storage(err) => Some(err),
            RelayError::Transcription(err) => Some(err),
            RelayError::Protocol(_) => None,
        }
    }
}

impl From<StorageError> for RelayError {
    fn from(err: StorageError) -> Self {
        RelayError::Storage(err)
    }
}

impl From<TranscriptionError> for RelayError {
    fn from(err: TranscriptionError) -> Self {
        RelayError::Transcription(err)
    }
}

/// Errors returned by the HTTP endpoints.
///
/// ## HTTP Status Code Mapping:
/// - Internal → 500 (Internal Server Error)
/// - NotFound → 404 (Not Found)
#[derive(Debug)]
pub enum AppError {
    /// Server-side problems (serialization failures, etc.)
    Internal(String),

    /// Requested route does not exist
    NotFound(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
        }
    }
}

/// All errors share one JSON shape:
/// ```json
/// {
///   "error": {
///     "type": "not_found",
///     "message": "No route for GET /nope",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        match self {
            AppError::Internal(_) => actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => actix_web::http::StatusCode::NOT_FOUND,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::NotFound(msg) => ("not_found", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    /// Upstream details stay in the logs; clients get fixed messages.
    #[test]
    fn test_client_messages_hide_details() {
        let transcription = RelayError::from(TranscriptionError::Status {
            status: 401,
            body: "invalid api key sk-123".to_string(),
        });
        assert_eq!(transcription.client_message(), TRANSCRIPTION_FAILED);
        assert!(transcription.to_string().contains("401"));

        let storage = RelayError::from(StorageError::Write {
            path: PathBuf::from("/tmp/relay-x.wav"),
            source: io::Error::new(io::ErrorKind::Other, "disk full"),
        });
        assert_eq!(storage.client_message(), STORAGE_FAILED);

        let protocol = RelayError::Protocol("Expected a binary audio message".to_string());
        assert_eq!(protocol.client_message(), "Expected a binary audio message");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(
            AppError::NotFound("x".to_string()).error_response().status(),
            actix_web::http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Internal("x".to_string()).error_response().status(),
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
