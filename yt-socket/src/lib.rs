//! YelloTalk Socket - realtime room client over Engine.IO v4 / Socket.IO.
//!
//! This crate provides:
//! - Engine.IO and Socket.IO frame encoding and decoding
//! - The connection state machine (handshake, connect, join, active, closed)
//! - A heartbeat scheduler running beside the receive loop
//! - Event dispatch through a handler table and a broadcast channel
//! - Roster diffing for participant joins and leaves
//! - WebSocket and in-memory transports
//!
//! There is no automatic reconnection: a `Connection` is a single attempt
//! and callers build a new one to retry.

pub mod connection;
pub mod events;
pub mod frame;
pub mod heartbeat;
pub mod participants;
pub mod state;
pub mod transport;

// Re-export key types
pub use connection::{Connection, ConnectionOptions, JoinRequest};
pub use events::{
    AuthenSuccessPayload, ChatMessagePayload, EventDispatcher, EventDispatcherBuilder,
    Participant, SocketEvent, SocketEventType,
};
pub use frame::{
    decode_event_frame, decode_frame, encode_control_frame, encode_event_frame, ControlFrame,
    Frame, FrameKind,
};
pub use participants::{Departure, ParticipantTracker, RosterChange};
pub use state::{ConnectionState, FailureKind, Session};
