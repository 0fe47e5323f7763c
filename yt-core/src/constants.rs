//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "YelloTalk";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default realtime endpoint (Engine.IO v4 over WebSocket).
pub const DEFAULT_SOCKET_URL: &str =
    "wss://live.yellotalk.co:8443/socket.io/?EIO=4&transport=websocket";

/// GME SDK app id used by the YelloTalk voice backend.
pub const DEFAULT_GME_SDK_APP_ID: u32 = 1_400_113_874;

/// Default AuthBuffer validity window in seconds.
pub const DEFAULT_AUTH_TTL_SECS: u32 = 300;

/// Required AuthBuffer key length in bytes.
pub const GME_KEY_LEN: usize = 16;

/// Heartbeat margin (epsilon) subtracted from the ping interval.
pub const DEFAULT_HEARTBEAT_MARGIN_MS: u64 = 1_000;

/// How long to wait for the handshake and namespace connect.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// How long to wait for a join acknowledgment before assuming success.
pub const DEFAULT_JOIN_TIMEOUT_MS: u64 = 5_000;

/// How long a local close waits for the transport to confirm.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5_000;

/// How long an emitted event waits for its acknowledgment.
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;

/// Campus value sent when the room owner has no group.
pub const DEFAULT_CAMPUS: &str = "No Group";

/// Ping timeout assumed when the handshake omits `pingTimeout`.
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

/// Capacity of the broadcast channel for decoded events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Outbound Socket.IO event names.
pub mod outbound {
    pub const JOIN_ROOM: &str = "join_room";
    pub const LOAD_MESSAGE: &str = "load_message";
    pub const NEW_MESSAGE: &str = "new_message";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_margin_smaller_than_interval() {
        // Servers announce a 25s ping interval.
        assert!(DEFAULT_HEARTBEAT_MARGIN_MS * 2 < 25_000);
    }

    #[test]
    fn test_default_url_is_engine_io_v4() {
        assert!(DEFAULT_SOCKET_URL.contains("EIO=4"));
        assert!(DEFAULT_SOCKET_URL.starts_with("wss://"));
    }
}
