//! # HTTP Transcription Client
//!
//! Uploads audio to the remote speech-to-text endpoint as `multipart/form-data`
//! and extracts the `text` field from the JSON reply.
//!
//! ## Wire Contract:
//! - `POST <endpoint_url>`
//! - `Authorization: Bearer <api_key>`
//! - One file part: field `file`, filename `audio.wav`, content type `audio/wav`
//! - Expected reply: `{"text": "..."}`; nothing else in the body is inspected

use crate::config::TranscriptionConfig;
use crate::transcription::{AudioPayload, Transcriber, TranscriptionError};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Url};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Remote reply. Only `text` matters; the service is trusted for the rest.
#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: Option<String>,
}

/// reqwest-backed [`Transcriber`].
///
/// ## Thread Safety:
/// `reqwest::Client` pools connections internally and is cheap to share, so one
/// `TranscriptionClient` behind an `Arc` serves every WebSocket connection.
#[derive(Debug, Clone)]
pub struct TranscriptionClient {
    http: Client,
    endpoint: Url,
    api_key: String,
    file_field: String,
    file_name: String,
    content_type: String,
}

impl TranscriptionClient {
    /// Build a client from validated configuration.
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint_url)
            .with_context(|| format!("Invalid transcription endpoint URL: {}", config.endpoint_url))?;

        let mut builder = Client::builder();
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }
        let http = builder.build().context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key.clone(),
            file_field: config.file_field.clone(),
            file_name: config.file_name.clone(),
            content_type: config.content_type.clone(),
        })
    }

    /// Multipart body with the single audio file part.
    fn build_form(&self, payload: &AudioPayload) -> Result<Form, TranscriptionError> {
        let length = payload.len() as u64;
        let part = Part::stream_with_length(Body::from(payload.clone().into_bytes()), length)
            .file_name(self.file_name.clone())
            .mime_str(&self.content_type)
            .map_err(|e| TranscriptionError::InvalidRequest(e.to_string()))?;

        Ok(Form::new().part(self.file_field.clone(), part))
    }
}

#[async_trait]
impl Transcriber for TranscriptionClient {
    async fn transcribe(&self, payload: &AudioPayload) -> Result<String, TranscriptionError> {
        let started = Instant::now();
        let form = self.build_form(payload)?;

        debug!(bytes = payload.len(), endpoint = %self.endpoint, "Uploading audio for transcription");

        let response = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Transcription request failed");
                TranscriptionError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "Transcription API returned an error");
            return Err(TranscriptionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::MalformedResponse(e.to_string()))?;

        let text = reply
            .text
            .ok_or_else(|| TranscriptionError::MalformedResponse("missing `text` field".to_string()))?;

        info!(
            bytes = payload.len(),
            chars = text.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Transcription completed"
        );

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use wiremock::matchers::{body_string_contains, header, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TranscriptionClient {
        let mut config = AppConfig::default().transcription;
        config.endpoint_url = format!("{}/v1/transcribe", server.uri());
        config.api_key = "test-token".to_string();
        TranscriptionClient::new(&config).unwrap()
    }

    fn silence() -> AudioPayload {
        AudioPayload::from(vec![0u8; 1024])
    }

    /// The upload carries the bearer credential and a single `audio.wav` file part.
    #[tokio::test]
    async fn test_transcribe_sends_multipart_upload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/transcribe"))
            .and(header("authorization", "Bearer test-token"))
            .and(header_regex("content-type", "^multipart/form-data; boundary="))
            .and(body_string_contains("name=\"file\""))
            .and(body_string_contains("filename=\"audio.wav\""))
            .and(body_string_contains("audio/wav"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "hello world"})))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server).transcribe(&silence()).await.unwrap();
        assert_eq!(text, "hello world");
    }

    /// Same payload and same remote behaviour give the same text.
    #[tokio::test]
    async fn test_transcribe_is_deterministic() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"text": "same every time", "confidence": 0.9})),
            )
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let first = client.transcribe(&silence()).await.unwrap();
        let second = client.transcribe(&silence()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "same every time");
    }

    #[tokio::test]
    async fn test_transcribe_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let err = client_for(&server).transcribe(&silence()).await.unwrap_err();
        match err {
            TranscriptionError::Status { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "upstream exploded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_transcribe_missing_text_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"tokens": []})))
            .mount(&server)
            .await;

        let err = client_for(&server).transcribe(&silence()).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_transcribe_non_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let err = client_for(&server).transcribe(&silence()).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_transcribe_unreachable_endpoint() {
        // Grab a free port and release it so nothing is listening there
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut config = AppConfig::default().transcription;
        config.endpoint_url = format!("http://127.0.0.1:{}/v1/transcribe", port);
        config.api_key = "test-token".to_string();
        let client = TranscriptionClient::new(&config).unwrap();

        let err = client.transcribe(&silence()).await.unwrap_err();
        assert!(matches!(err, TranscriptionError::Network(_)));
    }

    #[test]
    fn test_rejects_invalid_endpoint() {
        let mut config = AppConfig::default().transcription;
        config.endpoint_url = "::not-a-url::".to_string();
        assert!(TranscriptionClient::new(&config).is_err());
    }
}
