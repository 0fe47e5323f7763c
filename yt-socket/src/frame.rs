//! Engine.IO v4 packet envelope and the Socket.IO envelope carried inside
//! Engine.IO message frames.
//!
//! ```text
//! 0{"sid":"..","pingInterval":25000,"pingTimeout":20000}   open (handshake)
//! 2 / 3                                                    ping / pong
//! 40 / 40{"token":".."}                                    namespace connect
//! 41                                                       namespace disconnect
//! 42["event",{..}]  42<ack>["event",{..}]                  event
//! 43<ack>[..]                                              ack
//! 44{"message":".."}                                       connect error
//! ```

use serde::Deserialize;
use serde_json::Value;

use yt_core::constants;
use yt_core::error::{YtError, YtResult};

/// Engine.IO packet kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Open,
    Close,
    Ping,
    Pong,
    Message,
    Noop,
}

impl FrameKind {
    fn from_digit(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Open),
            '1' => Some(Self::Close),
            '2' => Some(Self::Ping),
            '3' => Some(Self::Pong),
            '4' => Some(Self::Message),
            '6' => Some(Self::Noop),
            _ => None,
        }
    }

    pub fn digit(self) -> char {
        match self {
            Self::Open => '0',
            Self::Close => '1',
            Self::Ping => '2',
            Self::Pong => '3',
            Self::Message => '4',
            Self::Noop => '6',
        }
    }
}

/// A decoded Engine.IO frame with its type digit stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: String,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Re-encode to wire text.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.payload.len() + 1);
        out.push(self.kind.digit());
        out.push_str(&self.payload);
        out
    }
}

/// Decode one Engine.IO text frame.
pub fn decode_frame(raw: &str) -> YtResult<Frame> {
    let mut chars = raw.chars();
    let first = chars
        .next()
        .ok_or_else(|| YtError::Framing("empty frame".into()))?;
    let kind = FrameKind::from_digit(first)
        .ok_or_else(|| YtError::Framing(format!("unknown packet type {first:?}")))?;
    Ok(Frame {
        kind,
        payload: chars.as_str().to_string(),
    })
}

/// Fixed control frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFrame {
    Ping,
    Pong,
    Connect,
    Disconnect,
}

pub fn encode_control_frame(kind: ControlFrame) -> &'static str {
    match kind {
        ControlFrame::Ping => "2",
        ControlFrame::Pong => "3",
        ControlFrame::Connect => "40",
        ControlFrame::Disconnect => "41",
    }
}

/// Namespace connect, optionally carrying an auth object.
pub fn encode_connect_frame(auth: Option<&Value>) -> String {
    match auth {
        Some(auth) => format!("40{auth}"),
        None => encode_control_frame(ControlFrame::Connect).to_string(),
    }
}

/// `42[event,payload]`, with the ack id between the type digits and the
/// JSON array when present.
pub fn encode_event_frame(event: &str, payload: &Value, ack_id: Option<u64>) -> String {
    let body = serde_json::json!([event, payload]);
    match ack_id {
        Some(id) => format!("42{id}{body}"),
        None => format!("42{body}"),
    }
}

/// Socket.IO packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Connect,
    Disconnect,
    Event,
    Ack,
    ConnectError,
}

impl PacketType {
    fn from_digit(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Connect),
            '1' => Some(Self::Disconnect),
            '2' => Some(Self::Event),
            '3' => Some(Self::Ack),
            '4' => Some(Self::ConnectError),
            _ => None,
        }
    }
}

/// A Socket.IO packet decoded from an Engine.IO message payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub namespace: Option<String>,
    pub ack_id: Option<u64>,
    pub data: Option<Value>,
}

/// Decode the Socket.IO packet inside a message frame payload.
pub fn decode_packet(payload: &str) -> YtResult<Packet> {
    let mut chars = payload.chars();
    let first = chars
        .next()
        .ok_or_else(|| YtError::Framing("empty message payload".into()))?;
    let packet_type = PacketType::from_digit(first)
        .ok_or_else(|| YtError::Framing(format!("unsupported socket.io packet type {first:?}")))?;
    let mut rest = chars.as_str();

    let namespace = if rest.starts_with('/') {
        let (nsp, tail) = match rest.find(',') {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => (rest, ""),
        };
        rest = tail;
        Some(nsp.to_string())
    } else {
        None
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let ack_id = if digits > 0 {
        let id = rest[..digits]
            .parse::<u64>()
            .map_err(|e| YtError::Framing(format!("bad ack id: {e}")))?;
        rest = &rest[digits..];
        Some(id)
    } else {
        None
    };

    let data = if rest.is_empty() {
        None
    } else {
        Some(
            serde_json::from_str::<Value>(rest)
                .map_err(|e| YtError::Framing(format!("packet body is not json: {e}")))?,
        )
    };

    Ok(Packet {
        packet_type,
        namespace,
        ack_id,
        data,
    })
}

/// A decoded Socket.IO event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFrame {
    pub name: String,
    /// Arguments after the event name.
    pub args: Vec<Value>,
    pub ack_id: Option<u64>,
}

impl EventFrame {
    /// The first argument, or null when the event carried none.
    pub fn payload(&self) -> Value {
        self.args.first().cloned().unwrap_or(Value::Null)
    }
}

/// Decode an event from a message frame.
pub fn decode_event_frame(frame: &Frame) -> YtResult<EventFrame> {
    if frame.kind != FrameKind::Message {
        return Err(YtError::Framing(format!(
            "expected message frame, got {:?}",
            frame.kind
        )));
    }
    let packet = decode_packet(&frame.payload)?;
    if packet.packet_type != PacketType::Event {
        return Err(YtError::Framing(format!(
            "expected event packet, got {:?}",
            packet.packet_type
        )));
    }
    event_from_packet(packet)
}

/// Split an event packet's JSON array into name and arguments.
pub fn event_from_packet(packet: Packet) -> YtResult<EventFrame> {
    let mut items = match packet.data {
        Some(Value::Array(items)) => items,
        _ => return Err(YtError::Framing("event body is not a json array".into())),
    };
    if items.is_empty() {
        return Err(YtError::Framing("event array is empty".into()));
    }
    let name = match items.remove(0) {
        Value::String(name) => name,
        other => {
            return Err(YtError::Framing(format!(
                "event name must be a string, got {other}"
            )))
        }
    };
    Ok(EventFrame {
        name,
        args: items,
        ack_id: packet.ack_id,
    })
}

/// Fields of the Engine.IO open packet.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

fn default_ping_timeout() -> u64 {
    constants::DEFAULT_PING_TIMEOUT_MS
}

/// Parse an open frame payload. A missing `sid` or a missing or zero
/// `pingInterval` is a protocol error.
pub fn parse_handshake(payload: &str) -> YtResult<Handshake> {
    let handshake: Handshake = serde_json::from_str(payload)
        .map_err(|e| YtError::Protocol(format!("invalid handshake: {e}")))?;
    if handshake.sid.is_empty() {
        return Err(YtError::Protocol("handshake has empty sid".into()));
    }
    if handshake.ping_interval == 0 {
        return Err(YtError::Protocol("handshake ping interval is zero".into()));
    }
    Ok(handshake)
}
