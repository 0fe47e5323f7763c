//! Room event types and the event dispatcher.
//!
//! Decoded events are routed through a dispatch table built once at
//! construction: handlers registered per event type run in registration
//! order, then the catch-all runs for every event. Each event is also
//! published on a broadcast channel for async consumers.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use yt_core::constants::EVENT_CHANNEL_CAPACITY;
use yt_core::error::YtResult;

use crate::frame::EventFrame;

/// Event types emitted by the YelloTalk room server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketEventType {
    /// A chat message was posted (`new_message`).
    NewMessage,
    /// Older servers post chat as `message`.
    Message,
    /// Room chat history (`load_message`).
    LoadMessage,
    /// Alternate history event name (`message_history`).
    MessageHistory,
    /// Someone took or left a speaker slot (`speaker_changed`).
    SpeakerChanged,
    /// The room's participant list changed (`participant_changed`).
    ParticipantChanged,
    /// A gift was sent (`new_gift`).
    NewGift,
    /// A reaction was sent (`new_reaction`).
    NewReaction,
    /// Credentials were accepted (`authen_success`).
    AuthenSuccess,
    /// The host ended the room (`live_end`).
    LiveEnd,
    /// Alternate room end event (`end_live`).
    EndLive,
    /// Room metadata (`room_info`).
    RoomInfo,
    /// Anything else. Only the catch-all sees these unless a handler was
    /// registered for the exact name.
    Unknown(String),
}

impl SocketEventType {
    /// Parse an event name from the server.
    pub fn from_str(s: &str) -> Self {
        match s {
            "new_message" => Self::NewMessage,
            "message" => Self::Message,
            "load_message" => Self::LoadMessage,
            "message_history" => Self::MessageHistory,
            "speaker_changed" => Self::SpeakerChanged,
            "participant_changed" => Self::ParticipantChanged,
            "new_gift" => Self::NewGift,
            "new_reaction" => Self::NewReaction,
            "authen_success" => Self::AuthenSuccess,
            "live_end" => Self::LiveEnd,
            "end_live" => Self::EndLive,
            "room_info" => Self::RoomInfo,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The server's event name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::NewMessage => "new_message",
            Self::Message => "message",
            Self::LoadMessage => "load_message",
            Self::MessageHistory => "message_history",
            Self::SpeakerChanged => "speaker_changed",
            Self::ParticipantChanged => "participant_changed",
            Self::NewGift => "new_gift",
            Self::NewReaction => "new_reaction",
            Self::AuthenSuccess => "authen_success",
            Self::LiveEnd => "live_end",
            Self::EndLive => "end_live",
            Self::RoomInfo => "room_info",
            Self::Unknown(s) => s.as_str(),
        }
    }

    pub fn is_chat_event(&self) -> bool {
        matches!(self, Self::NewMessage | Self::Message)
    }

    pub fn is_history_event(&self) -> bool {
        matches!(self, Self::LoadMessage | Self::MessageHistory)
    }

    /// Whether the host has closed the room.
    pub fn is_room_end(&self) -> bool {
        matches!(self, Self::LiveEnd | Self::EndLive)
    }
}

/// A chat line, as carried by `new_message` and inside history lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    #[serde(default)]
    pub pin_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl ChatMessagePayload {
    pub fn sender(&self) -> &str {
        self.pin_name.as_deref().unwrap_or("?")
    }

    pub fn text(&self) -> &str {
        self.message.as_deref().unwrap_or("")
    }
}

/// Payload of `authen_success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenSuccessPayload {
    pub sid: String,
}

/// One entry of a `participant_changed` list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub pin_name: Option<String>,
    #[serde(default)]
    pub avatar_id: Option<Value>,
    #[serde(default)]
    pub role: Option<String>,
}

/// A decoded room event.
#[derive(Debug, Clone)]
pub struct SocketEvent {
    pub event_type: SocketEventType,
    /// First argument after the event name, or null.
    pub data: Value,
    /// Every argument after the event name, `data` included.
    pub args: Vec<Value>,
    /// Set when the server asked for an acknowledgement.
    pub ack_id: Option<u64>,
}

impl SocketEvent {
    pub fn new(event_type: SocketEventType, data: Value) -> Self {
        let args = if data.is_null() { Vec::new() } else { vec![data.clone()] };
        Self {
            event_type,
            data,
            args,
            ack_id: None,
        }
    }

    pub fn name(&self) -> &str {
        self.event_type.as_str()
    }

    /// Try to parse a chat event's payload.
    pub fn as_chat_message(&self) -> Option<ChatMessagePayload> {
        if self.event_type.is_chat_event() {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }

    /// History arrives either as a bare array or wrapped in `{messages: [...]}`.
    /// Entries that fail to parse are skipped.
    pub fn as_message_history(&self) -> Option<Vec<ChatMessagePayload>> {
        if !self.event_type.is_history_event() {
            return None;
        }
        let items = match &self.data {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("messages") {
                Some(Value::Array(items)) => items,
                _ => return None,
            },
            _ => return None,
        };
        Some(
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
        )
    }

    pub fn as_authen_success(&self) -> Option<AuthenSuccessPayload> {
        if self.event_type == SocketEventType::AuthenSuccess {
            serde_json::from_value(self.data.clone()).ok()
        } else {
            None
        }
    }

    /// The participant list, bare or wrapped in `{participants: [...]}`.
    pub fn as_participants(&self) -> Option<Vec<Participant>> {
        if self.event_type != SocketEventType::ParticipantChanged {
            return None;
        }
        let items = match &self.data {
            Value::Array(items) => items,
            Value::Object(map) => match map.get("participants") {
                Some(Value::Array(items)) => items,
                _ => return None,
            },
            _ => return None,
        };
        Some(
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect(),
        )
    }

    /// `pin_name` of whoever triggered a gift, reaction or speaker change.
    pub fn actor_name(&self) -> Option<&str> {
        self.data.get("pin_name").and_then(Value::as_str)
    }
}

impl From<EventFrame> for SocketEvent {
    fn from(frame: EventFrame) -> Self {
        let data = frame.payload();
        Self {
            event_type: SocketEventType::from_str(&frame.name),
            data,
            args: frame.args,
            ack_id: frame.ack_id,
        }
    }
}

/// A registered event handler. Errors are logged and never stop dispatch.
pub type EventHandler = Arc<dyn Fn(&SocketEvent) -> YtResult<()> + Send + Sync>;

/// Collects handlers before the dispatcher is frozen.
pub struct EventDispatcherBuilder {
    handlers: HashMap<SocketEventType, Vec<EventHandler>>,
    catch_all: Option<EventHandler>,
    capacity: usize,
}

impl Default for EventDispatcherBuilder {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            catch_all: None,
            capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl EventDispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for one event type.
    pub fn on<F>(mut self, event_type: SocketEventType, handler: F) -> Self
    where
        F: Fn(&SocketEvent) -> YtResult<()> + Send + Sync + 'static,
    {
        self.handlers
            .entry(event_type)
            .or_default()
            .push(Arc::new(handler));
        self
    }

    /// Set the catch-all, replacing any previous one.
    pub fn on_any<F>(mut self, handler: F) -> Self
    where
        F: Fn(&SocketEvent) -> YtResult<()> + Send + Sync + 'static,
    {
        self.catch_all = Some(Arc::new(handler));
        self
    }

    /// Broadcast channel capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn build(self) -> EventDispatcher {
        let (sender, _) = broadcast::channel(self.capacity);
        EventDispatcher {
            handlers: Arc::new(self.handlers),
            catch_all: self.catch_all,
            sender,
        }
    }
}

/// Routes decoded events to handlers and broadcast subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    handlers: Arc<HashMap<SocketEventType, Vec<EventHandler>>>,
    catch_all: Option<EventHandler>,
    sender: broadcast::Sender<SocketEvent>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        EventDispatcherBuilder::default().build()
    }
}

impl EventDispatcher {
    pub fn builder() -> EventDispatcherBuilder {
        EventDispatcherBuilder::new()
    }

    /// Subscribe to every dispatched event.
    ///
    /// Slow consumers that fall behind receive `RecvError::Lagged` and
    /// miss events; the read loop never waits for them.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Number of handlers registered for an event type, excluding the catch-all.
    pub fn handler_count(&self, event_type: &SocketEventType) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }

    /// Run matching handlers in order, then the catch-all, then publish.
    /// Returns how many handlers failed.
    pub fn dispatch(&self, event: SocketEvent) -> usize {
        let name = event.name().to_string();
        let mut failures = 0;

        if let Some(handlers) = self.handlers.get(&event.event_type) {
            for handler in handlers {
                if !run_handler(&name, handler, &event) {
                    failures += 1;
                }
            }
        }
        if let Some(catch_all) = &self.catch_all {
            if !run_handler(&name, catch_all, &event) {
                failures += 1;
            }
        }

        match self.sender.send(event) {
            Ok(count) => debug!("dispatched {name} to {count} subscriber(s)"),
            Err(_) => debug!("no subscribers for event {name}"),
        }
        failures
    }
}

fn run_handler(name: &str, handler: &EventHandler, event: &SocketEvent) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(event = name, "handler failed: {e}");
            false
        }
        Err(_) => {
            warn!(event = name, "handler panicked");
            false
        }
    }
}
