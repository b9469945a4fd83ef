//! # Configuration Management
//!
//! This module handles loading and managing client configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between Rust structs and TOML/environment data
//! - **derive macros**: Generate Debug, Clone, Serialize, Deserialize automatically
//! - **impl blocks**: Add loading, validation and URL helpers to the structs
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment shortcuts (`WS_URL`, `BACKEND_URL`)
//! 2. Environment variables (`APP_SERVER__WS_URL`, `APP_AUDIO__SAMPLE_RATE`, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use crate::error::{ClientError, ClientResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Main client configuration that contains all settings.
///
/// ## Why separate config structs:
/// The backend origins, the reconnect policy and the audio pipeline change for
/// different reasons, so each lives in its own section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub audio: AudioConfig,
}

/// Backend origins, supplied per deployment.
///
/// ## Fields:
/// - `ws_url`: WebSocket origin, e.g. `ws://localhost:8000` or `wss://trial.example.com`
/// - `http_url`: HTTP origin for the REST surface, e.g. `http://localhost:8000`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub ws_url: String,
    pub http_url: String,
}

/// Socket reconnect behaviour and REST timeouts.
///
/// ## Backoff:
/// Attempt `n` waits `n * reconnect_base_delay_ms` before dialing again. After
/// `max_reconnect_attempts` failures the channel stays disconnected for good.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    /// Resend `initialize` on the fact-gathering channel after a reconnect
    pub reinitialize_on_reconnect: bool,
    pub request_timeout_secs: u64,
}

/// Push-to-talk capture and agent playback settings.
///
/// ## Fields:
/// - `sample_rate` / `channels`: capture target (16 kHz mono for speech)
/// - `min_payload_bytes`: encoded recordings smaller than this are treated as accidental taps
/// - `max_recording_ms`: oldest audio is discarded past this length
/// - `speaking_fallback_ms`: how long a "speaking" indicator may live without a playback completion
/// - `input_device` / `output_device`: device names; empty means platform default
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub min_payload_bytes: usize,
    pub max_recording_ms: u32,
    pub speaking_fallback_ms: u64,
    pub input_device: String,
    pub output_device: String,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// A developer can point the client at a local backend with no config file at all.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                ws_url: "ws://localhost:8000".to_string(),
                http_url: "http://localhost:8000".to_string(),
            },
            connection: ConnectionConfig {
                max_reconnect_attempts: 5,
                reconnect_base_delay_ms: 2000,
                reinitialize_on_reconnect: false,
                request_timeout_secs: 30,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                channels: 1,
                echo_cancellation: true,
                noise_suppression: true,
                min_payload_bytes: 1000,
                max_recording_ms: 120_000,
                speaking_fallback_ms: 5000,
                input_device: String::new(),
                output_device: String::new(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the `WS_URL` / `BACKEND_URL` deployment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__WS_URL=wss://trial.example.com`
    /// - `APP_CONNECTION__MAX_RECONNECT_ATTEMPTS=3`
    /// - `APP_AUDIO__SPEAKING_FALLBACK_MS=8000`
    pub fn load() -> ClientResult<Self> {
        Self::load_from("config")
    }

    /// Same as [`AppConfig::load`] but with an explicit config file stem/path.
    pub fn load_from(file: &str) -> ClientResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // required(false) means "don't error if missing"
            .add_source(config::File::with_name(file).required(false))
            // Double underscore separates sections because field names contain single ones
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(ws_url) = env::var("WS_URL") {
            settings = settings.set_override("server.ws_url", ws_url)?;
        }

        if let Ok(http_url) = env::var("BACKEND_URL") {
            settings = settings.set_override("server.http_url", http_url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Origins use the right schemes (ws/wss, http/https)
    /// - The reconnect delay is not zero (a zero delay would hammer the server)
    /// - The capture format is something a microphone can produce
    /// - The speaking fallback exists (otherwise indicators could stick forever)
    pub fn validate(&self) -> ClientResult<()> {
        if !(self.server.ws_url.starts_with("ws://") || self.server.ws_url.starts_with("wss://")) {
            return Err(ClientError::Config(format!(
                "ws_url must start with ws:// or wss://, got '{}'",
                self.server.ws_url
            )));
        }

        if !(self.server.http_url.starts_with("http://")
            || self.server.http_url.starts_with("https://"))
        {
            return Err(ClientError::Config(format!(
                "http_url must start with http:// or https://, got '{}'",
                self.server.http_url
            )));
        }

        if self.connection.reconnect_base_delay_ms == 0 {
            return Err(ClientError::Config(
                "Reconnect base delay must be greater than 0".to_string(),
            ));
        }

        if self.audio.sample_rate == 0 {
            return Err(ClientError::Config("Sample rate must be greater than 0".to_string()));
        }

        if !(1..=2).contains(&self.audio.channels) {
            return Err(ClientError::Config(format!(
                "Channel count must be 1 or 2, got {}",
                self.audio.channels
            )));
        }

        if self.audio.speaking_fallback_ms == 0 {
            return Err(ClientError::Config(
                "Speaking fallback must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// `{ws_url}/ws/fact-gathering/{session_id}`
    pub fn fact_gathering_url(&self, session_id: &str) -> String {
        format!(
            "{}/ws/fact-gathering/{}",
            self.server.ws_url.trim_end_matches('/'),
            session_id
        )
    }

    /// `{ws_url}/ws/trial/{session_id}`
    pub fn trial_url(&self, session_id: &str) -> String {
        format!("{}/ws/trial/{}", self.server.ws_url.trim_end_matches('/'), session_id)
    }

    /// Base of the REST surface, without a trailing slash.
    pub fn api_base(&self) -> String {
        format!("{}/api", self.server.http_url.trim_end_matches('/'))
    }
}

impl ConnectionConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AudioConfig {
    pub fn speaking_fallback(&self) -> Duration {
        Duration::from_millis(self.speaking_fallback_ms)
    }
}

/// Tests for the configuration module.
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.ws_url, "ws://localhost:8000");
        assert_eq!(config.connection.max_reconnect_attempts, 5);
        assert_eq!(config.audio.sample_rate, 16000);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.ws_url = "http://localhost:8000".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.connection.reconnect_base_delay_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channels = 6;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_urls() {
        let mut config = AppConfig::default();
        config.server.ws_url = "wss://trial.example.com/".to_string();
        assert_eq!(
            config.fact_gathering_url("s-1"),
            "wss://trial.example.com/ws/fact-gathering/s-1"
        );
        assert_eq!(config.trial_url("s-1"), "wss://trial.example.com/ws/trial/s-1");
        assert_eq!(config.api_base(), "http://localhost:8000/api");
    }

    /// A config file overrides defaults but leaves untouched sections alone.
    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[connection]\nmax_reconnect_attempts = 2").unwrap();

        let config = AppConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(config.connection.max_reconnect_attempts, 2);
        assert_eq!(config.connection.reconnect_base_delay_ms, 2000);
        assert_eq!(config.audio.min_payload_bytes, 1000);
    }
}
