//! # Configuration Management
//!
//! This module loads the relay configuration from multiple sources:
//! - TOML configuration file (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables: `HOST`, `PORT`, `ASSEMBLYAI_API_KEY`
//! 2. Prefixed environment variables, `__` between nested keys
//!    (APP_SERVER__PORT, APP_RELAY__MAX_CONCURRENT_BRIDGES, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! ## Secrets:
//! The upstream credential is never written back out: it is skipped when the
//! config is serialized and redacted from `Debug` output.

use anyhow::{Context, Result};         // Error handling with context
use serde::{Deserialize, Serialize};   // For converting to/from TOML, env, JSON
use std::env;                          // For reading deployment environment variables
use std::fmt;
use std::time::Duration;

/// Default realtime transcription endpoint.
pub const DEFAULT_UPSTREAM_URL: &str = "wss://api.assemblyai.com/v2/realtime/ws";

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - `server`: Where the HTTP/WebSocket listener binds
/// - `upstream`: How to reach the transcription service
/// - `relay`: Limits and timings of the bridges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
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

/// Upstream transcription service settings.
///
/// ## Fields:
/// - `url`: ws:// or wss:// endpoint of the realtime API
/// - `sample_rate`: Audio sample rate announced to the service as a query parameter
/// - `api_key`: Credential sent in the `Authorization` header
/// - `connect_timeout_ms`: How long the handshake may take before the dial fails
#[derive(Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    pub sample_rate: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub connect_timeout_ms: u64,
}

/// Bridge limits and timings.
///
/// ## Tuning guidelines:
/// - `channel_capacity` bounds the frames buffered per direction; a slow peer
///   makes the other side wait once it is full
/// - `heartbeat_interval_secs` must stay below `client_timeout_secs`, otherwise
///   healthy browsers are dropped between two pings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub max_concurrent_bridges: usize,
    pub channel_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub max_frame_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,
            },
            upstream: UpstreamConfig {
                url: DEFAULT_UPSTREAM_URL.to_string(),
                sample_rate: 16_000,            // 16kHz mono PCM from the browser
                api_key: None,
                connect_timeout_ms: 10_000,
            },
            relay: RelayConfig {
                max_concurrent_bridges: 64,
                channel_capacity: 32,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
                max_frame_bytes: 1024 * 1024,   // 1 MiB
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_UPSTREAM__SAMPLE_RATE=8000`: Override the announced sample rate
    /// - `APP_RELAY__CHANNEL_CAPACITY=64`: Deeper per-direction buffers
    /// - `HOST` / `PORT`: Special cases for deployment platforms
    /// - `ASSEMBLYAI_API_KEY`: Upstream credential
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists)
            .add_source(config::File::with_name("config").required(false))
            // 3. Prefixed environment variables
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("ASSEMBLYAI_API_KEY") {
            settings = settings.set_override("upstream.api_key", key)?;
        }

        let config = settings
            .build()
            .context("Failed to read configuration sources")?
            .try_deserialize()
            .context("Failed to parse configuration")?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// A missing credential is not an error here: the server still starts and
    /// reports `credential_configured: false` on the health endpoint, while each
    /// connection attempt fails with a notice to the browser.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !self.upstream.url.starts_with("ws://") && !self.upstream.url.starts_with("wss://") {
            return Err(anyhow::anyhow!(
                "Upstream url must start with ws:// or wss://, got {}",
                self.upstream.url
            ));
        }

        if self.upstream.sample_rate == 0 {
            return Err(anyhow::anyhow!("Upstream sample rate must be greater than 0"));
        }

        if self.upstream.connect_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Upstream connect timeout must be greater than 0"));
        }

        if self.relay.max_concurrent_bridges == 0 {
            return Err(anyhow::anyhow!("Max concurrent bridges must be greater than 0"));
        }

        if self.relay.channel_capacity == 0 {
            return Err(anyhow::anyhow!("Channel capacity must be greater than 0"));
        }

        if self.relay.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Max frame size must be greater than 0"));
        }

        if self.relay.heartbeat_interval_secs == 0
            || self.relay.heartbeat_interval_secs >= self.relay.client_timeout_secs
        {
            return Err(anyhow::anyhow!(
                "Heartbeat interval ({}s) must be non-zero and shorter than the client timeout ({}s)",
                self.relay.heartbeat_interval_secs,
                self.relay.client_timeout_secs
            ));
        }

        Ok(())
    }
}

impl UpstreamConfig {
    /// Endpoint with the sample rate appended as a query parameter.
    pub fn endpoint(&self) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}sample_rate={}", self.url, separator, self.sample_rate)
    }

    /// Whether a non-blank credential is configured.
    pub fn has_credential(&self) -> bool {
        usable_credential(self.api_key.as_deref()).is_some()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// The credential with surrounding whitespace removed, or `None` if it is missing
/// or blank. A blank `ASSEMBLYAI_API_KEY=` counts as not configured.
pub fn usable_credential(api_key: Option<&str>) -> Option<&str> {
    api_key.map(str::trim).filter(|key| !key.is_empty())
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("url", &self.url)
            .field("sample_rate", &self.sample_rate)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .finish()
    }
}

impl RelayConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.upstream.url, DEFAULT_UPSTREAM_URL);
        assert!(!config.upstream.has_credential());
        // Ensure the default config passes validation
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.upstream.url = "https://api.assemblyai.com/v2/realtime/ws".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.relay.channel_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.relay.max_concurrent_bridges = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_must_be_shorter_than_timeout() {
        let mut config = AppConfig::default();
        config.relay.heartbeat_interval_secs = 60;
        config.relay.client_timeout_secs = 60;
        assert!(config.validate().is_err());

        config.relay.heartbeat_interval_secs = 5;
        assert!(config.validate().is_ok());
        assert_eq!(config.relay.heartbeat_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_endpoint_appends_sample_rate() {
        let mut upstream = AppConfig::default().upstream;
        assert_eq!(
            upstream.endpoint(),
            "wss://api.assemblyai.com/v2/realtime/ws?sample_rate=16000"
        );

        upstream.url = "ws://localhost:9000/ws?encoding=pcm_s16le".to_string();
        upstream.sample_rate = 8000;
        assert_eq!(
            upstream.endpoint(),
            "ws://localhost:9000/ws?encoding=pcm_s16le&sample_rate=8000"
        );
    }

    #[test]
    fn test_credential_is_never_exposed() {
        let mut config = AppConfig::default();
        config.upstream.api_key = Some("secret-key".to_string());
        assert!(config.upstream.has_credential());

        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));

        config.upstream.api_key = None;
        let json = serde_json::to_value(&config).unwrap();
        assert!(json["upstream"].get("api_key").is_none());
    }

    #[test]
    fn test_blank_credential_is_not_configured() {
        let mut upstream = AppConfig::default().upstream;
        upstream.api_key = Some("   ".to_string());
        assert!(!upstream.has_credential());
    }
}
