//! # Relay Operation
//!
//! One relay turns one inbound [`AudioPayload`] into exactly one
//! [`RelayResponse`]:
//!
//! 1. **Stage**: write the payload to its own transient file
//! 2. **Transcribe**: hand the staged file to the [`Transcriber`]
//! 3. **Respond**: the caller sends [`RelayOutcome::response`] to the client
//! 4. **Clean up**: [`RelayOutcome::cleanup`] removes the transient file
//!
//! Every failure is folded into an `{"error": ...}` response, so the caller
//! never has to handle a Rust error to keep its one-response-per-message
//! promise. Cleanup failures are logged and never change the response.
//!
//! The future returned by [`relay_payload`] is safe to drop at any await point:
//! the transient file guard removes the file when it goes out of scope.

pub mod storage;

pub use storage::TransientStorage;

use crate::error::RelayError;
use crate::transcription::{AudioPayload, Transcriber};
use storage::TransientAudioFile;

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// The single message a client receives for each audio message it sent.
///
/// Serializes as `{"transcription": "..."}` or `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayResponse {
    Transcription(String),
    Error(String),
}

impl RelayResponse {
    pub fn from_error(err: &RelayError) -> Self {
        RelayResponse::Error(err.client_message())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RelayResponse::Transcription(_))
    }

    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            // Two string variants cannot fail to serialize; keep a literal fallback anyway
            Err(_) => r#"{"error":"Internal error"}"#.to_string(),
        }
    }
}

/// A decided response plus the staged file still waiting to be removed.
#[derive(Debug)]
pub struct RelayOutcome {
    response: RelayResponse,
    staged: Option<TransientAudioFile>,
    elapsed: Duration,
}

impl RelayOutcome {
    pub fn response(&self) -> &RelayResponse {
        &self.response
    }

    /// Time from receipt to decided response.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Remove the transient file and return the response.
    ///
    /// Removal failures are logged only; the response was already decided.
    pub async fn cleanup(mut self) -> RelayResponse {
        if let Some(staged) = self.staged.take() {
            if let Err(err) = staged.release().await {
                warn!(error = %err, "Transient audio cleanup failed");
            }
        }
        self.response
    }
}

/// Stage `payload`, transcribe it and decide the client's response.
///
/// The returned outcome still owns the transient file; call
/// [`RelayOutcome::cleanup`] once the response has been sent. Dropping the
/// outcome instead also removes the file.
pub async fn relay_payload<T>(
    payload: AudioPayload,
    storage: &TransientStorage,
    transcriber: &T,
) -> RelayOutcome
where
    T: Transcriber + ?Sized,
{
    let started = Instant::now();

    let staged = match storage.store(&payload).await {
        Ok(staged) => staged,
        Err(err) => {
            let err = RelayError::from(err);
            error!(error = %err, bytes = payload.len(), "Could not stage audio payload");
            return RelayOutcome {
                response: RelayResponse::from_error(&err),
                staged: None,
                elapsed: started.elapsed(),
            };
        }
    };

    let response = match transcriber.transcribe_file(staged.path()).await {
        Ok(text) => RelayResponse::Transcription(text),
        Err(err) => {
            let err = RelayError::from(err);
            error!(error = %err, bytes = payload.len(), "Transcription failed");
            RelayResponse::from_error(&err)
        }
    };

    RelayOutcome {
        response,
        staged: Some(staged),
        elapsed: started.elapsed(),
    }
}
