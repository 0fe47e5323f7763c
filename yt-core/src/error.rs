//! Global error types for the YelloTalk client.
//!
//! Every error category across the workspace is unified into a single
//! `YtError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using YtError.
pub type YtResult<T> = Result<T, YtError>;

/// Unified error type covering all error categories.
#[derive(Error, Debug)]
pub enum YtError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Realtime protocol errors --
    /// A single frame could not be decoded. Recoverable: the frame is dropped.
    #[error("framing error: {0}")]
    Framing(String),

    /// The handshake or authentication sequence was violated.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server rejected our credentials.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server refused to let us into the requested room.
    #[error("join rejected: {0}")]
    JoinRejected(String),

    /// No frame arrived within the liveness window.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The underlying transport failed or closed.
    #[error("transport error: {0}")]
    Transport(String),

    /// An operation needed an active connection.
    #[error("not connected")]
    NotConnected,

    /// A request was not acknowledged in time.
    #[error("request timeout: {0}")]
    Timeout(String),

    // -- AuthBuffer errors --
    /// Ciphertext failed structural checks during decryption.
    #[error("decrypt error: {0}")]
    Decrypt(String),

    /// A value was out of range or structurally inconsistent.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl YtError {
    /// Whether this error ends the connection it occurred on.
    ///
    /// Framing errors only cost the offending frame; everything on the
    /// connection-integrity path is terminal.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, YtError::Framing(_))
    }
}

impl From<serde_json::Error> for YtError {
    fn from(e: serde_json::Error) -> Self {
        YtError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for YtError {
    fn from(e: toml::de::Error) -> Self {
        YtError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yt_error_display() {
        let err = YtError::Config("bad value".to_string());
        assert_eq!(err.to_string(), "configuration error: bad value");

        let err = YtError::JoinRejected("room is full".to_string());
        assert_eq!(err.to_string(), "join rejected: room is full");
    }

    #[test]
    fn test_only_framing_is_recoverable() {
        assert!(!YtError::Framing("bad digit".into()).is_fatal());
        assert!(YtError::Protocol("no sid".into()).is_fatal());
        assert!(YtError::HeartbeatTimeout.is_fatal());
        assert!(YtError::Auth("rejected".into()).is_fatal());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: YtError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, YtError::Serialization(_)));
    }
}
