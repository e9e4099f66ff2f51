//! # Configuration Management
//!
//! This module handles loading the relay configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (HOST, PORT, TRANSCRIPTION_API_KEY)
//! 2. Environment variables (APP_SERVER__PORT, APP_TRANSCRIPTION__ENDPOINT_URL, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! The configuration is resolved once at startup and never mutated afterwards.
//! The transcription credential lives here rather than in the code, and every
//! outward-facing view of the config goes through [`AppConfig::redacted`].

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Placeholder shown wherever the API key would otherwise be exposed.
pub const REDACTED: &str = "<redacted>";

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, transcription, relay)
/// keeps each consumer dependent on only the settings it actually reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub transcription: TranscriptionConfig,
    pub relay: RelayConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Remote transcription endpoint settings.
///
/// ## Fields:
/// - `endpoint_url`: Where the multipart upload is POSTed
/// - `api_key`: Bearer credential sent in the `Authorization` header
/// - `file_field`: Multipart field name carrying the audio
/// - `file_name`: File name declared on the audio part
/// - `content_type`: MIME type declared on the audio part
/// - `request_timeout_secs`: Whole-request timeout, `0` waits as long as the remote takes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub endpoint_url: String,
    pub api_key: String,
    pub file_field: String,
    pub file_name: String,
    pub content_type: String,
    pub request_timeout_secs: u64,
}

/// WebSocket relay tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Directory holding per-request transient audio files
    pub temp_dir: PathBuf,

    /// Largest accepted inbound message (frame or reassembled fragments)
    pub max_message_bytes: usize,

    /// Audio messages a connection may queue behind the one being relayed
    pub max_pending_messages: usize,

    /// Seconds between protocol-level pings sent to each client
    pub heartbeat_interval_secs: u64,

    /// Seconds of client silence after which the connection is closed
    pub client_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            transcription: TranscriptionConfig {
                endpoint_url: "https://stt-rt.soniox.com/v1/transcribe".to_string(),
                // Must be supplied through the environment or config.toml
                api_key: String::new(),
                file_field: "file".to_string(),
                file_name: "audio.wav".to_string(),
                content_type: "audio/wav".to_string(),
                request_timeout_secs: 0,
            },
            relay: RelayConfig {
                temp_dir: env::temp_dir(),
                max_message_bytes: 100 * 1024 * 1024,
                max_pending_messages: 8,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_TRANSCRIPTION__ENDPOINT_URL=http://localhost:9000/v1/transcribe`
    /// - `APP_RELAY__TEMP_DIR=/var/tmp/relay`
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    /// - `TRANSCRIPTION_API_KEY`: The bearer credential for the remote endpoint
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(api_key) = env::var("TRANSCRIPTION_API_KEY") {
            settings = settings.set_override("transcription.api_key", api_key)?;
        }

        let config = settings
            .build()?
            .try_deserialize()
            .context("configuration has invalid or missing fields")?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - The endpoint is an absolute http(s) URL and a credential is present
    /// - The multipart part description is usable (field, file name, MIME type)
    /// - Relay limits are positive and the client timeout outlasts the heartbeat
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        let endpoint = reqwest::Url::parse(&self.transcription.endpoint_url)
            .with_context(|| format!("Invalid transcription endpoint URL: {}", self.transcription.endpoint_url))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "Transcription endpoint must use http or https, got {}",
                endpoint.scheme()
            ));
        }

        if self.transcription.api_key.trim().is_empty() {
            return Err(anyhow!(
                "Transcription API key is not configured (set TRANSCRIPTION_API_KEY)"
            ));
        }

        if self.transcription.file_field.is_empty() || self.transcription.file_name.is_empty() {
            return Err(anyhow!("Multipart file field and file name must not be empty"));
        }

        // Part::mime_str is the same check the client performs per request
        reqwest::multipart::Part::bytes(Vec::new())
            .mime_str(&self.transcription.content_type)
            .map_err(|e| anyhow!("Invalid audio content type '{}': {}", self.transcription.content_type, e))?;

        if self.relay.max_message_bytes == 0 {
            return Err(anyhow!("Max message size must be greater than 0"));
        }

        if self.relay.max_pending_messages == 0 {
            return Err(anyhow!("Max pending messages must be greater than 0"));
        }

        if self.relay.heartbeat_interval_secs == 0 {
            return Err(anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.relay.client_timeout_secs <= self.relay.heartbeat_interval_secs {
            return Err(anyhow!(
                "Client timeout ({}s) must be longer than the heartbeat interval ({}s)",
                self.relay.client_timeout_secs,
                self.relay.heartbeat_interval_secs
            ));
        }

        Ok(())
    }

    /// Copy of the configuration that is safe to log or return over HTTP.
    pub fn redacted(&self) -> AppConfig {
        let mut copy = self.clone();
        if !copy.transcription.api_key.is_empty() {
            copy.transcription.api_key = REDACTED.to_string();
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> AppConfig {
        let mut config = AppConfig::default();
        config.transcription.api_key = "test-key".to_string();
        config
    }

    /// The defaults mirror the upstream wire contract and only lack a credential.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.transcription.file_field, "file");
        assert_eq!(config.transcription.file_name, "audio.wav");
        assert_eq!(config.transcription.content_type, "audio/wav");
        assert!(config.validate().is_err());
        assert!(configured().validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = configured();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = configured();
        config.transcription.endpoint_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = configured();
        config.transcription.endpoint_url = "ftp://example.com/upload".to_string();
        assert!(config.validate().is_err());

        let mut config = configured();
        config.transcription.content_type = "not a mime".to_string();
        assert!(config.validate().is_err());

        let mut config = configured();
        config.relay.client_timeout_secs = config.relay.heartbeat_interval_secs;
        assert!(config.validate().is_err());

        let mut config = configured();
        config.relay.max_message_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = configured();
        config.relay.max_pending_messages = 0;
        assert!(config.validate().is_err());
    }

    /// Redaction hides the credential but leaves everything else intact.
    #[test]
    fn test_config_redaction() {
        let config = configured();
        let redacted = config.redacted();
        assert_eq!(redacted.transcription.api_key, REDACTED);
        assert_eq!(redacted.transcription.endpoint_url, config.transcription.endpoint_url);
        assert_eq!(config.transcription.api_key, "test-key");

        // Nothing to hide means nothing is claimed to be hidden
        assert_eq!(AppConfig::default().redacted().transcription.api_key, "");
    }
}
