//! Application configuration management.
//!
//! Handles loading, saving, and accessing the client configuration: the
//! realtime endpoint and credentials, the profile sent when joining a room,
//! GME AuthBuffer parameters, connection timings, and logging. Configuration
//! is persisted as TOML on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{YtError, YtResult};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Realtime server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Identity presented in the join payload.
    #[serde(default)]
    pub profile: ProfileConfig,

    /// Voice backend token settings.
    #[serde(default)]
    pub gme: GmeConfig,

    /// Connection timings.
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Realtime server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Engine.IO WebSocket endpoint.
    #[serde(default = "default_socket_url")]
    pub socket_url: String,

    /// JWT used to authenticate the socket.
    #[serde(default)]
    pub auth_token: String,

    /// Send the token as an `auth_token` query parameter instead of in the
    /// namespace connect payload.
    #[serde(default)]
    pub token_in_query: bool,
}

/// Profile fields sent with `join_room`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Account uuid.
    #[serde(default)]
    pub user_uuid: String,

    /// Display name shown to the room.
    #[serde(default)]
    pub pin_name: String,

    /// Avatar index.
    #[serde(default)]
    pub avatar_id: i64,

    /// Campus/group short name.
    #[serde(default = "default_campus")]
    pub campus: String,
}

/// GME AuthBuffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmeConfig {
    /// SDK application id baked into every token.
    #[serde(default = "default_sdk_app_id")]
    pub sdk_app_id: u32,

    /// 16-byte TEA key.
    #[serde(default)]
    pub secret_key: String,

    /// Token validity in seconds.
    #[serde(default = "default_auth_ttl")]
    pub ttl_secs: u32,
}

/// Connection timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Time allowed for handshake plus namespace connect.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Time to wait for a join ack before going active anyway.
    #[serde(default = "default_join_timeout")]
    pub join_timeout_ms: u64,

    /// Time a local close waits for the transport to confirm.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,

    /// Heartbeat margin subtracted from the ping interval.
    #[serde(default = "default_heartbeat_margin")]
    pub heartbeat_margin_ms: u64,

    /// Time an emitted event waits for its acknowledgment.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_ms: u64,

    /// Request message history once the room is joined.
    #[serde(default = "default_true")]
    pub load_history_on_join: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. If empty, uses default location.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

// Default value functions for serde

fn default_socket_url() -> String {
    constants::DEFAULT_SOCKET_URL.to_string()
}

fn default_campus() -> String {
    constants::DEFAULT_CAMPUS.to_string()
}

fn default_sdk_app_id() -> u32 {
    constants::DEFAULT_GME_SDK_APP_ID
}

fn default_auth_ttl() -> u32 {
    constants::DEFAULT_AUTH_TTL_SECS
}

fn default_handshake_timeout() -> u64 {
    constants::DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_join_timeout() -> u64 {
    constants::DEFAULT_JOIN_TIMEOUT_MS
}

fn default_close_timeout() -> u64 {
    constants::DEFAULT_CLOSE_TIMEOUT_MS
}

fn default_heartbeat_margin() -> u64 {
    constants::DEFAULT_HEARTBEAT_MARGIN_MS
}

fn default_ack_timeout() -> u64 {
    constants::DEFAULT_ACK_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_url: default_socket_url(),
            auth_token: String::new(),
            token_in_query: false,
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            user_uuid: String::new(),
            pin_name: String::new(),
            avatar_id: 0,
            campus: default_campus(),
        }
    }
}

impl Default for GmeConfig {
    fn default() -> Self {
        Self {
            sdk_app_id: default_sdk_app_id(),
            secret_key: String::new(),
            ttl_secs: default_auth_ttl(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout(),
            join_timeout_ms: default_join_timeout(),
            close_timeout_ms: default_close_timeout(),
            heartbeat_margin_ms: default_heartbeat_margin(),
            ack_timeout_ms: default_ack_timeout(),
            load_history_on_join: true,
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
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn heartbeat_margin(&self) -> Duration {
        Duration::from_millis(self.heartbeat_margin_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl ServerConfig {
    /// The URL actually dialed, with the token appended when configured
    /// to travel in the query string.
    pub fn effective_url(&self) -> String {
        if self.token_in_query && !self.auth_token.is_empty() {
            let sep = if self.socket_url.contains('?') { '&' } else { '?' };
            format!("{}{sep}auth_token={}", self.socket_url, self.auth_token)
        } else {
            self.socket_url.clone()
        }
    }
}

impl AppConfig {
    /// Load configuration from the default config file path.
    pub fn load_default() -> YtResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> YtResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> YtResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| YtError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    ///
    /// - Linux: `~/.config/YelloTalk/config.toml`
    /// - macOS: `~/Library/Application Support/YelloTalk/config.toml`
    /// - Windows: `%APPDATA%/YelloTalk/config.toml`
    pub fn default_config_path() -> YtResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| YtError::Config("could not determine config directory".into()))?;
        Ok(base.join(constants::APP_NAME).join("config.toml"))
    }

    /// Get the effective log directory, using the configured path or the default.
    pub fn effective_log_dir(&self) -> YtResult<PathBuf> {
        if self.logging.directory.is_empty() {
            let base = dirs::data_dir()
                .ok_or_else(|| YtError::Config("could not determine data directory".into()))?;
            Ok(base.join(constants::APP_NAME).join("logs"))
        } else {
            Ok(PathBuf::from(&self.logging.directory))
        }
    }

    /// Check the settings needed to open a realtime connection.
    pub fn validate_for_connect(&self) -> YtResult<()> {
        if self.server.socket_url.is_empty() {
            return Err(YtError::MissingConfig("server.socket_url".into()));
        }
        if self.server.auth_token.is_empty() {
            return Err(YtError::MissingConfig("server.auth_token".into()));
        }
        if self.profile.user_uuid.is_empty() {
            return Err(YtError::MissingConfig("profile.user_uuid".into()));
        }
        if self.connection.heartbeat_margin_ms == 0 {
            return Err(YtError::Config("connection.heartbeat_margin_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Check the settings needed to mint AuthBuffers.
    pub fn validate_for_gme(&self) -> YtResult<()> {
        self.gme.validate()
    }
}

impl GmeConfig {
    pub fn validate(&self) -> YtResult<()> {
        if self.secret_key.is_empty() {
            return Err(YtError::MissingConfig("gme.secret_key".into()));
        }
        let len = self.secret_key.len();
        if len != constants::GME_KEY_LEN {
            return Err(YtError::InvalidValue(format!(
                "gme.secret_key must be exactly {} bytes, got {len}",
                constants::GME_KEY_LEN
            )));
        }
        Ok(())
    }
}
