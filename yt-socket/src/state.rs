//! Connection state, failure kinds, and the handshake-derived session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use yt_core::error::YtError;

use crate::frame::Handshake;

/// Why a connection ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Handshake or authentication sequence violated.
    Protocol(String),
    /// Credentials rejected.
    Auth(String),
    /// The server refused the room.
    JoinRejected(String),
    /// No frame arrived within the liveness window.
    HeartbeatTimeout,
    /// The transport errored.
    Transport(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Auth(msg) => write!(f, "authentication failed: {msg}"),
            Self::JoinRejected(reason) => write!(f, "join rejected: {reason}"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl From<FailureKind> for YtError {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Protocol(msg) => YtError::Protocol(msg),
            FailureKind::Auth(msg) => YtError::Auth(msg),
            FailureKind::JoinRejected(reason) => YtError::JoinRejected(reason),
            FailureKind::HeartbeatTimeout => YtError::HeartbeatTimeout,
            FailureKind::Transport(msg) => YtError::Transport(msg),
        }
    }
}

/// Lifecycle of one connection attempt. `Closed` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Authenticating,
    Joining,
    Active,
    Closing,
    Closed,
    Failed(FailureKind),
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed(_))
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn failure(&self) -> Option<&FailureKind> {
        match self {
            Self::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Handshaking => write!(f, "handshaking"),
            Self::Authenticating => write!(f, "authenticating"),
            Self::Joining => write!(f, "joining"),
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
            Self::Failed(kind) => write!(f, "failed ({kind})"),
        }
    }
}

/// Handshake-derived session data. Exists from a valid handshake until the
/// connection reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub sid: String,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// Namespace connect acknowledged.
    pub connected: bool,
    /// Credentials accepted.
    pub authenticated: bool,
    pub room_id: Option<String>,
}

impl Session {
    pub fn from_handshake(handshake: &Handshake) -> Self {
        Self {
            sid: handshake.sid.clone(),
            ping_interval: Duration::from_millis(handshake.ping_interval),
            ping_timeout: Duration::from_millis(handshake.ping_timeout),
            connected: false,
            authenticated: false,
            room_id: None,
        }
    }
}

/// Shared, observable connection state.
///
/// Transitions out of a terminal state are refused, so the first terminal
/// transition wins and happens exactly once.
#[derive(Clone)]
pub struct StateCell {
    sender: Arc<watch::Sender<ConnectionState>>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ConnectionState::Connecting);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn get(&self) -> ConnectionState {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.sender.subscribe()
    }

    /// Move to `next`. Returns false if the current state is terminal.
    pub fn transition(&self, next: ConnectionState) -> bool {
        self.transition_if(|_| true, next)
    }

    /// Move to `next` only when `allowed` accepts the current state.
    pub fn transition_if<F>(&self, allowed: F, next: ConnectionState) -> bool
    where
        F: FnOnce(&ConnectionState) -> bool,
    {
        let mut previous = None;
        let changed = self.sender.send_if_modified(|current| {
            if current.is_terminal() || !allowed(current) || *current == next {
                return false;
            }
            previous = Some(std::mem::replace(current, next.clone()));
            true
        });
        if let Some(previous) = previous {
            match &next {
                ConnectionState::Failed(kind) => {
                    error!("connection state: {previous} -> failed: {kind}")
                }
                _ => info!("connection state: {previous} -> {next}"),
            }
        }
        changed
    }

    /// Shorthand for a transition to `Failed(kind)`.
    pub fn fail(&self, kind: FailureKind) -> bool {
        self.transition(ConnectionState::Failed(kind))
    }

    /// Wait until a terminal state is reached and return it.
    pub async fn wait_terminal(&self) -> ConnectionState {
        let mut rx = self.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                return self.get();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Active.to_string(), "active");
        assert_eq!(
            ConnectionState::Failed(FailureKind::HeartbeatTimeout).to_string(),
            "failed (heartbeat timeout)"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(ConnectionState::Closed.is_terminal());
        assert!(ConnectionState::Failed(FailureKind::Auth("x".into())).is_terminal());
        assert!(!ConnectionState::Closing.is_terminal());
        assert!(!ConnectionState::Joining.is_terminal());
    }

    #[test]
    fn test_terminal_transition_happens_once() {
        let cell = StateCell::new();
        assert!(cell.transition(ConnectionState::Handshaking));
        assert!(cell.fail(FailureKind::Protocol("no sid".into())));
        assert!(!cell.transition(ConnectionState::Closed));
        assert!(!cell.fail(FailureKind::HeartbeatTimeout));
        assert_eq!(
            cell.get(),
            ConnectionState::Failed(FailureKind::Protocol("no sid".into()))
        );
    }

    #[test]
    fn test_conditional_transition() {
        let cell = StateCell::new();
        assert!(!cell.transition_if(ConnectionState::is_active, ConnectionState::Closing));
        assert_eq!(cell.get(), ConnectionState::Connecting);

        cell.transition(ConnectionState::Active);
        assert!(cell.transition_if(ConnectionState::is_active, ConnectionState::Closing));
        assert_eq!(cell.get(), ConnectionState::Closing);
    }

    #[test]
    fn test_failure_kind_into_error() {
        let err: YtError = FailureKind::JoinRejected("room is full".into()).into();
        assert!(matches!(err, YtError::JoinRejected(ref r) if r == "room is full"));
        let err: YtError = FailureKind::HeartbeatTimeout.into();
        assert!(matches!(err, YtError::HeartbeatTimeout));
    }

    #[tokio::test]
    async fn test_wait_terminal() {
        let cell = StateCell::new();
        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait_terminal().await })
        };
        cell.transition(ConnectionState::Active);
        cell.transition(ConnectionState::Closed);
        assert_eq!(waiter.await.unwrap(), ConnectionState::Closed);
    }
}
