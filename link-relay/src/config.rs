//! Configuration loading for pairlink-relay.
//!
//! Configuration is loaded from a TOML file (default: `pairlink.toml`).

use link_types::PrincipalId;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for pairlink-relay.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Pairing request configuration.
    #[serde(default)]
    pub pairing: PairingConfig,
    /// Relay queue configuration.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Rate limiting configuration.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// Known principals and their bearer tokens.
    #[serde(default)]
    pub principals: Vec<PrincipalEntry>,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WebSocket server (default: 0.0.0.0:8000).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database holding pairing edges.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Pairing request configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PairingConfig {
    /// Seconds before a pending pairing request is auto-rejected (default: 20).
    #[serde(default = "default_request_ttl_secs")]
    pub request_ttl_secs: u64,
    /// Seconds a requester waits for the device to respond (default: 30).
    #[serde(default = "default_response_wait_secs")]
    pub response_wait_secs: u64,
    /// Seconds a device long-polls for incoming requests (default: 30).
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

/// Relay queue configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Maximum messages held per recipient (default: 2000).
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// Oldest messages dropped in one trim when the queue overflows (default: 100).
    #[serde(default = "default_overflow_buffer")]
    pub overflow_buffer: usize,
    /// Seconds a session's consume loop blocks before re-polling (default: 30).
    #[serde(default = "default_consume_timeout_secs")]
    pub consume_timeout_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum relay publishes per principal per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Maximum relay publishes per second across all principals (default: 1000).
    #[serde(default = "default_global_requests_per_second")]
    pub global_requests_per_second: u32,
    /// Seconds between evictions of idle rate limiter entries (default: 60).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

/// A principal known to the static authenticator.
#[derive(Debug, Clone, Deserialize)]
pub struct PrincipalEntry {
    /// Principal id.
    pub id: PrincipalId,
    /// Unique username.
    pub username: String,
    /// Whether the principal is a device.
    #[serde(default)]
    pub is_device: bool,
    /// Bearer token accepted for this principal.
    pub token: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("pairlink.db")
}

fn default_request_ttl_secs() -> u64 {
    20
}

fn default_response_wait_secs() -> u64 {
    30
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_max_queue_size() -> usize {
    2000
}

fn default_overflow_buffer() -> usize {
    100
}

fn default_consume_timeout_secs() -> u64 {
    30
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_global_requests_per_second() -> u32 {
    1000
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            request_ttl_secs: default_request_ttl_secs(),
            response_wait_secs: default_response_wait_secs(),
            poll_timeout_secs: default_poll_timeout_secs(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            overflow_buffer: default_overflow_buffer(),
            consume_timeout_secs: default_consume_timeout_secs(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: default_messages_per_minute(),
            global_requests_per_second: default_global_requests_per_second(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            pairing: PairingConfig::default(),
            relay: RelayConfig::default(),
            limits: LimitsConfig::default(),
            principals: Vec::new(),
        }
    }
}

impl PairingConfig {
    /// TTL of a pending pairing request.
    pub fn request_ttl(&self) -> Duration {
        Duration::from_secs(self.request_ttl_secs)
    }

    /// How long a requester waits for a response.
    pub fn response_wait(&self) -> Duration {
        Duration::from_secs(self.response_wait_secs)
    }

    /// How long a device long-polls for requests.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

impl RelayConfig {
    /// Block time of one consume poll.
    pub fn consume_timeout(&self) -> Duration {
        Duration::from_secs(self.consume_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// values are inconsistent.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.max_queue_size == 0 {
            return Err(ConfigError::Invalid("relay.max_queue_size must be > 0".into()));
        }
        if self.relay.overflow_buffer == 0 || self.relay.overflow_buffer > self.relay.max_queue_size
        {
            return Err(ConfigError::Invalid(
                "relay.overflow_buffer must be in 1..=max_queue_size".into(),
            ));
        }
        if self.limits.messages_per_minute == 0 || self.limits.global_requests_per_second == 0 {
            return Err(ConfigError::Invalid("rate limits must be > 0".into()));
        }
        if self.limits.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "limits.cleanup_interval_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Values parsed but are not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:8000");
        assert_eq!(config.pairing.request_ttl_secs, 20);
        assert_eq!(config.relay.max_queue_size, 2000);
        assert_eq!(config.relay.overflow_buffer, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"

[storage]
database = "/data/pairlink.db"

[pairing]
request_ttl_secs = 5

[relay]
max_queue_size = 50
overflow_buffer = 10

[[principals]]
id = 1
username = "alice"
token = "alice-token"

[[principals]]
id = 2
username = "alice-phone"
is_device = true
token = "phone-token"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert_eq!(config.storage.database, PathBuf::from("/data/pairlink.db"));
        assert_eq!(config.pairing.request_ttl(), Duration::from_secs(5));
        assert_eq!(config.relay.max_queue_size, 50);
        assert_eq!(config.principals.len(), 2);
        assert!(!config.principals[0].is_device);
        assert!(config.principals[1].is_device);
        assert_eq!(config.principals[1].id, PrincipalId::new(2));
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.pairing.response_wait_secs, 30);
        assert_eq!(config.relay.consume_timeout_secs, 30);
        assert_eq!(config.limits.messages_per_minute, 600);
        assert!(config.principals.is_empty());
    }

    #[test]
    fn overflow_buffer_larger_than_queue_is_rejected() {
        let toml = r#"
[relay]
max_queue_size = 10
overflow_buffer = 11
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn from_file_reports_missing_file() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/pairlink.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }
}
