//! Client configuration management.
//!
//! Holds the API credentials, REST/WebSocket base URLs, connection tuning
//! (heartbeat, handshake, reconnect backoff), channel-state housekeeping and
//! logging settings. Configuration can be built in code or loaded from TOML.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::constants;
use crate::error::{ChatError, ChatResult};
use crate::platform::Platform;

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// API credentials and endpoints.
    #[serde(default)]
    pub api: ApiConfig,

    /// Real-time connection tuning.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Local channel-state behaviour.
    #[serde(default)]
    pub state: StateConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// API credentials and endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Public API key of the chat application.
    #[serde(default)]
    pub api_key: String,

    /// API secret. Only set when running with a server identity; enables
    /// server-signed tokens.
    #[serde(default)]
    pub api_secret: Option<String>,

    /// REST base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// WebSocket base URL. Derived from `base_url` when empty.
    #[serde(default)]
    pub ws_base_url: Option<String>,

    /// HTTP request timeout in milliseconds.
    #[serde(default = "default_api_timeout")]
    pub timeout_ms: u64,

    /// Extra headers attached to every HTTP request.
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
}

/// Real-time connection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Time after the last server health check before the client pings.
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// Silence tolerated on top of `ping_interval_ms` before reconnecting.
    #[serde(default = "default_health_grace")]
    pub health_grace_ms: u64,

    /// Maximum wait for the handshake frame once the socket is open.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Outage duration before `connection.changed { online: false }` fires.
    #[serde(default = "default_offline_grace")]
    pub offline_grace_ms: u64,

    /// Upper bound on the encoded handshake `json` query parameter.
    #[serde(default = "default_max_handshake_query_len")]
    pub max_handshake_query_len: usize,

    /// Reconnect backoff floor in milliseconds.
    #[serde(default = "default_reconnect_base_delay")]
    pub reconnect_base_delay_ms: u64,

    /// Reconnect backoff cap in milliseconds.
    #[serde(default = "default_reconnect_max_delay")]
    pub reconnect_max_delay_ms: u64,

    /// Jitter factor (0.0 to 1.0) applied to each reconnect delay.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

/// Local channel-state behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Re-query active channels after a reconnect.
    #[serde(default = "default_true")]
    pub recover_state_on_reconnect: bool,

    /// Channels re-queried per recovery request.
    #[serde(default = "default_recovery_channel_limit")]
    pub recovery_channel_limit: usize,

    /// Tick of the periodic channel clean-up.
    #[serde(default = "default_clean_interval")]
    pub clean_interval_ms: u64,

    /// Typing indicators without a stop event expire after this long.
    #[serde(default = "default_typing_timeout")]
    pub typing_timeout_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter: trace, debug, info, warn, error, or an EnvFilter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rotated log files. Console-only logging when empty.
    #[serde(default)]
    pub directory: String,

    /// Write the log file as JSON lines.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_base_url() -> String {
    constants::DEFAULT_BASE_URL.to_string()
}

fn default_api_timeout() -> u64 {
    constants::DEFAULT_API_TIMEOUT_MS
}

fn default_ping_interval() -> u64 {
    constants::DEFAULT_PING_INTERVAL_MS
}

fn default_health_grace() -> u64 {
    constants::DEFAULT_HEALTH_GRACE_MS
}

fn default_handshake_timeout() -> u64 {
    constants::DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_offline_grace() -> u64 {
    constants::DEFAULT_OFFLINE_GRACE_MS
}

fn default_max_handshake_query_len() -> usize {
    constants::MAX_HANDSHAKE_QUERY_LEN
}

fn default_reconnect_base_delay() -> u64 {
    constants::DEFAULT_RECONNECT_BASE_DELAY_MS
}

fn default_reconnect_max_delay() -> u64 {
    constants::DEFAULT_RECONNECT_MAX_DELAY_MS
}

fn default_jitter_factor() -> f64 {
    0.3
}

fn default_true() -> bool {
    true
}

fn default_recovery_channel_limit() -> usize {
    constants::DEFAULT_RECOVERY_CHANNEL_LIMIT
}

fn default_clean_interval() -> u64 {
    constants::DEFAULT_CLEAN_INTERVAL_MS
}

fn default_typing_timeout() -> u64 {
    constants::DEFAULT_TYPING_TIMEOUT_MS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: None,
            base_url: default_base_url(),
            ws_base_url: None,
            timeout_ms: default_api_timeout(),
            custom_headers: HashMap::new(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            health_grace_ms: default_health_grace(),
            handshake_timeout_ms: default_handshake_timeout(),
            offline_grace_ms: default_offline_grace(),
            max_handshake_query_len: default_max_handshake_query_len(),
            reconnect_base_delay_ms: default_reconnect_base_delay(),
            reconnect_max_delay_ms: default_reconnect_max_delay(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            recover_state_on_reconnect: true,
            recovery_channel_limit: default_recovery_channel_limit(),
            clean_interval_ms: default_clean_interval(),
            typing_timeout_ms: default_typing_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl ConnectionConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn health_grace(&self) -> Duration {
        Duration::from_millis(self.health_grace_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn offline_grace(&self) -> Duration {
        Duration::from_millis(self.offline_grace_ms)
    }
}

impl ClientConfig {
    /// Create a configuration for the given API key with default settings.
    pub fn new(api_key: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.api.api_key = api_key.into();
        config
    }

    /// Create a configuration for a server identity (API key + secret).
    pub fn with_secret(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        let mut config = Self::new(api_key);
        config.api.api_secret = Some(api_secret.into());
        config
    }

    /// Load configuration from the default config file path.
    pub fn load_default() -> ChatResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> ChatResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> ChatResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ChatError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> ChatResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Validate the settings every session needs.
    pub fn validate(&self) -> ChatResult<()> {
        if self.api.api_key.trim().is_empty() {
            return Err(ChatError::MissingConfig("api_key".into()));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ChatError::MissingConfig("base_url".into()));
        }
        if !(0.0..=1.0).contains(&self.connection.jitter_factor) {
            return Err(ChatError::Config(format!(
                "jitter_factor must be within 0.0..=1.0, got {}",
                self.connection.jitter_factor
            )));
        }
        Ok(())
    }

    /// Whether the client runs with a server identity.
    pub fn is_server_side(&self) -> bool {
        self.api.api_secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Point both REST and WebSocket traffic at a new base URL.
    pub fn set_base_url(&mut self, url: &str) {
        self.api.base_url = Self::sanitize_base_url(url);
        self.api.ws_base_url = None;
    }

    /// Effective WebSocket base URL.
    pub fn ws_url(&self) -> String {
        match self.api.ws_base_url.as_deref() {
            Some(ws) if !ws.is_empty() => Self::sanitize_base_url(ws),
            _ => Self::derive_ws_url(&self.api.base_url),
        }
    }

    /// Sanitize and normalize a base URL.
    ///
    /// Ensures the address has a scheme (https by default) and strips
    /// surrounding quotes/whitespace and trailing slashes.
    pub fn sanitize_base_url(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let has_scheme = ["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| trimmed.starts_with(scheme));
        let with_scheme = if has_scheme {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }

    /// Derive the WebSocket URL from an HTTP base URL (`http` -> `ws`).
    pub fn derive_ws_url(base_url: &str) -> String {
        let base = Self::sanitize_base_url(base_url);
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base
        }
    }
}

/// Thread-safe configuration holder shared by the client and its channels.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<ClientConfig>>,
}

impl ConfigHandle {
    /// Create a new configuration handle.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Read the configuration.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, ClientConfig> {
        self.inner.read().await
    }

    /// Write/update the configuration.
    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, ClientConfig> {
        self.inner.write().await
    }

    /// Snapshot the current configuration.
    pub async fn snapshot(&self) -> ClientConfig {
        self.inner.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.api.timeout_ms, 30_000);
        assert_eq!(config.connection.ping_interval_ms, 25_000);
        assert_eq!(config.connection.max_handshake_query_len, 1_900);
        assert!(config.state.recover_state_on_reconnect);
        assert!(!config.is_server_side());
    }

    #[test]
    fn test_validate_requires_api_key() {
        let err = ClientConfig::default().validate().unwrap_err();
        assert!(matches!(err, ChatError::MissingConfig(_)));
        assert!(ClientConfig::new("key").validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_jitter() {
        let mut config = ClientConfig::new("key");
        config.connection.jitter_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sanitize_base_url() {
        assert_eq!(
            ClientConfig::sanitize_base_url("chat.example.com/"),
            "https://chat.example.com"
        );
        assert_eq!(
            ClientConfig::sanitize_base_url("  \"http://localhost:3030/\"  "),
            "http://localhost:3030"
        );
        assert_eq!(ClientConfig::sanitize_base_url("   "), "");
    }

    #[test]
    fn test_ws_url_derivation() {
        let mut config = ClientConfig::new("key");
        config.set_base_url("https://chat.example.com");
        assert_eq!(config.ws_url(), "wss://chat.example.com");

        config.set_base_url("http://localhost:3030");
        assert_eq!(config.ws_url(), "ws://localhost:3030");

        config.api.ws_base_url = Some("wss://edge.example.com/".into());
        assert_eq!(config.ws_url(), "wss://edge.example.com");
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = ClientConfig::with_secret("key", "secret");
        config.connection.reconnect_max_delay_ms = 5_000;
        config.save_to_file(&path).unwrap();

        let loaded = ClientConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.api.api_key, "key");
        assert!(loaded.is_server_side());
        assert_eq!(loaded.connection.reconnect_max_delay_ms, 5_000);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: ClientConfig = toml::from_str(
            r#"
            [api]
            api_key = "abc"

            [state]
            typing_timeout_ms = 3000
            "#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, constants::DEFAULT_BASE_URL);
        assert_eq!(config.state.typing_timeout_ms, 3_000);
        assert_eq!(config.state.clean_interval_ms, 500);
    }

    #[tokio::test]
    async fn test_config_handle_updates() {
        let handle = ConfigHandle::new(ClientConfig::new("key"));
        handle.write().await.set_base_url("http://localhost:3030");
        assert_eq!(handle.read().await.ws_url(), "ws://localhost:3030");
        assert_eq!(handle.snapshot().await.api.api_key, "key");
    }
}
