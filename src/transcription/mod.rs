//! # Transcription Module
//!
//! Turns audio bytes into text through a remote speech-to-text HTTP service.
//!
//! ## Key Components:
//! - **AudioPayload**: The opaque bytes of one client message
//! - **Transcriber**: Async trait the relay depends on, so tests can swap the backend
//! - **TranscriptionClient**: The reqwest implementation (multipart upload + bearer auth)
//! - **TranscriptionError**: Every way a single transcription attempt can fail
//!
//! There is no retry here: one call is one attempt, and the caller decides what the
//! client gets to see when it fails.

pub mod client;

pub use client::TranscriptionClient;

use actix_web::web::Bytes;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;

/// Raw audio bytes received in one inbound message.
///
/// No format is assumed; whatever the client sent is forwarded as-is.
/// Cloning is cheap (reference counted), so a payload can be handed to a
/// spawned relay without copying the audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPayload(Bytes);

impl AudioPayload {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Vec<u8>> for AudioPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<Bytes> for AudioPayload {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

/// Errors that can occur during a single transcription attempt.
#[derive(Debug)]
pub enum TranscriptionError {
    /// The multipart request could not be built (bad MIME type, etc.)
    InvalidRequest(String),

    /// The staged audio could not be read back from transient storage
    FileRead(String),

    /// Connection, TLS or timeout failure before a response arrived
    Network(String),

    /// Remote service answered with a non-success status
    Status { status: u16, body: String },

    /// Success status but the body had no usable `text` field
    MalformedResponse(String),
}

impl fmt::Display for TranscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptionError::InvalidRequest(msg) => write!(f, "Invalid transcription request: {}", msg),
            TranscriptionError::FileRead(msg) => write!(f, "Failed to read staged audio: {}", msg),
            TranscriptionError::Network(msg) => write!(f, "Network error: {}", msg),
            TranscriptionError::Status { status, body } => {
                write!(f, "Transcription API error ({}): {}", status, body)
            }
            TranscriptionError::MalformedResponse(msg) => {
                write!(f, "Malformed transcription response: {}", msg)
            }
        }
    }
}

impl std::error::Error for TranscriptionError {}

/// Anything that can turn an [`AudioPayload`] into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the payload with exactly one attempt.
    async fn transcribe(&self, payload: &AudioPayload) -> Result<String, TranscriptionError>;

    /// Transcribe audio that has been staged on disk.
    ///
    /// The relay stages every payload before transcribing it, so this is the
    /// entry point it uses; the default reads the file back and delegates.
    async fn transcribe_file(&self, path: &Path) -> Result<String, TranscriptionError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TranscriptionError::FileRead(format!("{}: {}", path.display(), e)))?;
        self.transcribe(&AudioPayload::from(bytes)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records what it was asked to transcribe.
    struct Recorder(Mutex<Vec<Vec<u8>>>);

    #[async_trait]
    impl Transcriber for Recorder {
        async fn transcribe(&self, payload: &AudioPayload) -> Result<String, TranscriptionError> {
            self.0.lock().unwrap().push(payload.as_bytes().to_vec());
            Ok(format!("{} bytes", payload.len()))
        }
    }

    #[tokio::test]
    async fn test_transcribe_file_reads_staged_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staged.wav");
        std::fs::write(&path, b"RIFF-audio").unwrap();

        let recorder = Recorder(Mutex::new(Vec::new()));
        let text = recorder.transcribe_file(&path).await.unwrap();

        assert_eq!(text, "10 bytes");
        assert_eq!(recorder.0.lock().unwrap().as_slice(), &[b"RIFF-audio".to_vec()]);
    }

    #[tokio::test]
    async fn test_transcribe_file_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder(Mutex::new(Vec::new()));

        let err = recorder
            .transcribe_file(&dir.path().join("gone.wav"))
            .await
            .unwrap_err();

        assert!(matches!(err, TranscriptionError::FileRead(_)));
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = TranscriptionError::Status {
            status: 500,
            body: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Transcription API error (500): boom");
    }
}
