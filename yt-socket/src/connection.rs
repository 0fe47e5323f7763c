//! Room connection: the state machine and its receive loop.
//!
//! One [`Connection`] is one attempt. It runs handshake, namespace connect,
//! room join, and then dispatches room events until the transport closes or
//! a fatal error ends it. A new attempt needs a new `Connection`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use yt_core::config::AppConfig;
use yt_core::constants::{self, outbound};
use yt_core::error::{YtError, YtResult};

use crate::events::{EventDispatcher, SocketEvent, SocketEventType};
use crate::frame::{
    decode_frame, decode_packet, encode_connect_frame, encode_event_frame, event_from_packet,
    parse_handshake, ControlFrame, FrameKind, Packet, PacketType,
};
use crate::heartbeat::{Heartbeat, HeartbeatTiming, LinkActivity};
use crate::state::{ConnectionState, FailureKind, Session, StateCell};
use crate::transport::{self, truncate, FrameSink, FrameSource, FrameWriter};

/// Identity sent with `join_room`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub room: String,
    pub uuid: String,
    pub avatar_id: i64,
    pub pin_name: String,
    pub gme_id: String,
    pub campus: String,
}

impl JoinRequest {
    /// The server expects every key present, unused ones as null.
    pub fn payload(&self) -> Value {
        json!({
            "room": self.room,
            "uuid": self.uuid,
            "avatar_id": self.avatar_id,
            "pin_name": self.pin_name,
            "gme_id": self.gme_id,
            "campus": self.campus,
            "position": null,
            "message": null,
            "reaction": null,
            "reason_id": null,
            "reason_text": null,
            "target_user": null,
            "target_uuid": null,
            "limit_speaker": null,
        })
    }
}

/// Per-attempt settings.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Sent as `40{"token":..}`. `None` sends a bare `40`.
    pub auth_token: Option<String>,
    pub join: JoinRequest,
    pub handshake_timeout: Duration,
    pub join_timeout: Duration,
    pub close_timeout: Duration,
    pub heartbeat_margin: Duration,
    pub ack_timeout: Duration,
    pub load_history_on_join: bool,
}

impl ConnectionOptions {
    pub fn new(join: JoinRequest) -> Self {
        Self {
            auth_token: None,
            join,
            handshake_timeout: Duration::from_millis(constants::DEFAULT_HANDSHAKE_TIMEOUT_MS),
            join_timeout: Duration::from_millis(constants::DEFAULT_JOIN_TIMEOUT_MS),
            close_timeout: Duration::from_millis(constants::DEFAULT_CLOSE_TIMEOUT_MS),
            heartbeat_margin: Duration::from_millis(constants::DEFAULT_HEARTBEAT_MARGIN_MS),
            ack_timeout: Duration::from_millis(constants::DEFAULT_ACK_TIMEOUT_MS),
            load_history_on_join: true,
        }
    }

    /// Build options for joining `room` with the configured profile.
    pub fn from_config(config: &AppConfig, room: &str, gme_id: &str) -> Self {
        let server = &config.server;
        let auth_token = (!server.token_in_query && !server.auth_token.is_empty())
            .then(|| server.auth_token.clone());
        let profile = &config.profile;
        let conn = &config.connection;
        Self {
            auth_token,
            join: JoinRequest {
                room: room.to_string(),
                uuid: profile.user_uuid.clone(),
                avatar_id: profile.avatar_id,
                pin_name: profile.pin_name.clone(),
                gme_id: gme_id.to_string(),
                campus: profile.campus.clone(),
            },
            handshake_timeout: conn.handshake_timeout(),
            join_timeout: conn.join_timeout(),
            close_timeout: conn.close_timeout(),
            heartbeat_margin: conn.heartbeat_margin(),
            ack_timeout: conn.ack_timeout(),
            load_history_on_join: conn.load_history_on_join,
        }
    }
}

/// State shared by the connection handle, the receive loop and the
/// heartbeat.
struct Shared {
    options: ConnectionOptions,
    state: StateCell,
    session: Mutex<Option<Session>>,
    writer: FrameWriter,
    heartbeat: Heartbeat,
    dispatcher: EventDispatcher,
    pending_acks: Mutex<HashMap<u64, oneshot::Sender<Vec<Value>>>>,
    next_ack_id: AtomicU64,
}

impl Shared {
    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn acks(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Vec<Value>>>> {
        self.pending_acks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_ack_id(&self) -> u64 {
        self.next_ack_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send_event(&self, event: &str, payload: &Value, ack_id: Option<u64>) -> YtResult<()> {
        self.writer
            .send(encode_event_frame(event, payload, ack_id))
            .await
    }

    async fn request_history(&self) -> YtResult<()> {
        let room = self.options.join.room.clone();
        self.send_event(outbound::LOAD_MESSAGE, &json!({ "room": room }), None)
            .await
    }
}

/// A live connection attempt.
pub struct Connection {
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Open a WebSocket to `url` and start the connection over it.
    pub async fn connect_websocket(
        url: &str,
        options: ConnectionOptions,
        dispatcher: EventDispatcher,
    ) -> YtResult<Self> {
        let (sink, source) = transport::websocket::connect(url).await?;
        Ok(Self::start(sink, source, options, dispatcher))
    }

    /// Drive a connection over an already-open transport.
    ///
    /// Must be called inside a tokio runtime: the receive loop is spawned
    /// immediately.
    pub fn start<S, R>(
        sink: S,
        source: R,
        options: ConnectionOptions,
        dispatcher: EventDispatcher,
    ) -> Self
    where
        S: FrameSink + 'static,
        R: FrameSource + 'static,
    {
        let state = StateCell::new();
        let activity = Arc::new(LinkActivity::new());
        let handshake_deadline = Instant::now() + options.handshake_timeout;
        let shared = Arc::new(Shared {
            options,
            state,
            session: Mutex::new(None),
            writer: FrameWriter::new(sink, activity),
            heartbeat: Heartbeat::new(),
            dispatcher,
            pending_acks: Mutex::new(HashMap::new()),
            next_ack_id: AtomicU64::new(0),
        });
        shared.state.transition(ConnectionState::Handshaking);

        let reader = ReceiveLoop {
            shared: shared.clone(),
            source: Box::new(source),
            handshake_deadline,
            join_deadline: None,
            join_ack_id: None,
        };
        let handle = tokio::spawn(reader.run());

        Self {
            shared,
            reader: Mutex::new(Some(handle)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Watch state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// The handshake session, while one exists.
    pub fn session(&self) -> Option<Session> {
        self.shared.session().clone()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Subscribe to every dispatched room event.
    pub fn subscribe(&self) -> broadcast::Receiver<SocketEvent> {
        self.shared.dispatcher.subscribe()
    }

    pub fn room_id(&self) -> &str {
        &self.shared.options.join.room
    }

    fn ensure_active(&self) -> YtResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(YtError::NotConnected)
        }
    }

    /// Emit an event on an active connection.
    pub async fn emit(&self, event: &str, payload: Value) -> YtResult<()> {
        self.ensure_active()?;
        self.shared.send_event(event, &payload, None).await
    }

    /// Emit an event and wait for the server's acknowledgement arguments.
    pub async fn emit_with_ack(&self, event: &str, payload: Value) -> YtResult<Vec<Value>> {
        self.ensure_active()?;
        let id = self.shared.next_ack_id();
        let (tx, rx) = oneshot::channel();
        self.shared.acks().insert(id, tx);

        if let Err(e) = self.shared.send_event(event, &payload, Some(id)).await {
            self.shared.acks().remove(&id);
            return Err(e);
        }

        match time::timeout(self.shared.options.ack_timeout, rx).await {
            Ok(Ok(args)) => Ok(args),
            Ok(Err(_)) => Err(YtError::NotConnected),
            Err(_) => {
                self.shared.acks().remove(&id);
                Err(YtError::Timeout(format!("no ack for {event} (id {id})")))
            }
        }
    }

    /// Post a chat line to the room.
    pub async fn send_chat_message(&self, text: &str) -> YtResult<()> {
        self.emit(outbound::NEW_MESSAGE, json!({ "message": text }))
            .await
    }

    /// Ask the server for the room's chat history.
    pub async fn request_history(&self) -> YtResult<()> {
        self.ensure_active()?;
        self.shared.request_history().await
    }

    /// Wait for `Closed` or `Failed`.
    pub async fn wait_terminal(&self) -> ConnectionState {
        self.shared.state.wait_terminal().await
    }

    /// Close locally: stop the heartbeat, say goodbye, close the transport,
    /// then wait for the receive loop to finish.
    ///
    /// Returns the terminal state. If the transport does not confirm within
    /// the close timeout the connection is forced to `Closed`.
    pub async fn close(&self) -> ConnectionState {
        let shared = &self.shared;
        if shared.state.get().is_terminal() {
            return shared.state.get();
        }
        shared.state.transition(ConnectionState::Closing);
        shared.heartbeat.cancel();

        if let Err(e) = shared.writer.send_control(ControlFrame::Disconnect).await {
            debug!("disconnect frame not sent: {e}");
        }
        if let Err(e) = shared.writer.close().await {
            debug!("transport close failed: {e}");
        }

        match time::timeout(shared.options.close_timeout, shared.state.wait_terminal()).await {
            Ok(state) => state,
            Err(_) => {
                warn!("transport did not confirm close, forcing closed");
                shared.state.transition(ConnectionState::Closed);
                self.abort_reader();
                shared.acks().clear();
                shared.session().take();
                shared.state.get()
            }
        }
    }

    fn abort_reader(&self) {
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(handle) = reader.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shared.heartbeat.cancel();
        self.abort_reader();
    }
}

/// The sole reader of the transport.
struct ReceiveLoop {
    shared: Arc<Shared>,
    source: Box<dyn FrameSource>,
    handshake_deadline: Instant,
    join_deadline: Option<Instant>,
    join_ack_id: Option<u64>,
}

impl ReceiveLoop {
    async fn run(mut self) {
        let mut state_rx = self.shared.state.subscribe();

        loop {
            let state = state_rx.borrow_and_update().clone();
            if state.is_terminal() {
                break;
            }
            let deadline = match state {
                ConnectionState::Handshaking | ConnectionState::Authenticating => {
                    Some(self.handshake_deadline)
                }
                ConnectionState::Joining => self.join_deadline,
                _ => None,
            };

            tokio::select! {
                next = self.source.next_text() => match next {
                    Some(Ok(text)) => {
                        self.shared.writer.activity().mark_received();
                        self.handle_text(&text).await;
                    }
                    Some(Err(e)) => {
                        self.shared.state.fail(FailureKind::Transport(e.to_string()));
                    }
                    None => {
                        debug!("transport closed");
                        self.shared.state.transition(ConnectionState::Closed);
                    }
                },
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep_until(deadline) => self.on_deadline(&state).await,
            }
        }

        self.teardown().await;
    }

    async fn teardown(&mut self) {
        self.shared.heartbeat.cancel();
        if let Err(e) = self.shared.writer.close().await {
            debug!("transport close failed: {e}");
        }
        // Dropping the senders wakes every waiter with an error.
        self.shared.acks().clear();
        self.shared.session().take();
        info!(state = %self.shared.state.get(), "receive loop finished");
    }

    async fn on_deadline(&mut self, state: &ConnectionState) {
        match state {
            ConnectionState::Handshaking => {
                self.shared.state.fail(FailureKind::Protocol(
                    "no handshake before timeout".into(),
                ));
            }
            ConnectionState::Authenticating => {
                self.shared.state.fail(FailureKind::Protocol(
                    "namespace connect not acknowledged".into(),
                ));
            }
            ConnectionState::Joining => {
                info!("no join acknowledgement, assuming joined");
                self.enter_active().await;
            }
            _ => {}
        }
    }

    async fn handle_text(&mut self, text: &str) {
        debug!(frame = %truncate(text), "recv");
        let state = self.shared.state.get();

        if state == ConnectionState::Handshaking {
            self.handle_handshake(text).await;
            return;
        }

        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping frame: {e}");
                return;
            }
        };

        match frame.kind {
            FrameKind::Ping => {
                if let Err(e) = self.shared.writer.send_control(ControlFrame::Pong).await {
                    debug!("pong not sent: {e}");
                }
            }
            FrameKind::Pong | FrameKind::Noop => {}
            FrameKind::Open => warn!("ignoring repeated handshake"),
            FrameKind::Close => {
                info!("server closed the engine session");
                self.shared.state.transition(ConnectionState::Closed);
            }
            FrameKind::Message => match decode_packet(&frame.payload) {
                Ok(packet) => self.handle_packet(&state, packet).await,
                Err(e) => warn!("dropping frame: {e}"),
            },
        }
    }

    async fn handle_handshake(&mut self, text: &str) {
        let handshake = match decode_frame(text) {
            Ok(frame) if frame.kind == FrameKind::Open => parse_handshake(&frame.payload),
            Ok(frame) => Err(YtError::Protocol(format!(
                "expected handshake, got {:?} frame",
                frame.kind
            ))),
            Err(e) => Err(e),
        };
        let handshake = match handshake {
            Ok(handshake) => handshake,
            Err(e) => {
                self.shared.state.fail(FailureKind::Protocol(failure_detail(e)));
                return;
            }
        };

        let session = Session::from_handshake(&handshake);
        info!(
            sid = %session.sid,
            ping_interval_ms = handshake.ping_interval,
            ping_timeout_ms = handshake.ping_timeout,
            "handshake complete"
        );
        let timing = HeartbeatTiming::new(&session, self.shared.options.heartbeat_margin);
        *self.shared.session() = Some(session);

        if !self.shared.state.transition_if(
            |s| *s == ConnectionState::Handshaking,
            ConnectionState::Authenticating,
        ) {
            self.shared.session().take();
            return;
        }
        self.shared.heartbeat.start(
            timing,
            self.shared.writer.clone(),
            self.shared.state.clone(),
        );

        let auth = self
            .shared
            .options
            .auth_token
            .as_ref()
            .map(|token| json!({ "token": token }));
        if let Err(e) = self.shared.writer.send(encode_connect_frame(auth.as_ref())).await {
            self.shared.state.fail(FailureKind::Transport(e.to_string()));
        }
    }

    async fn handle_packet(&mut self, state: &ConnectionState, packet: Packet) {
        match packet.packet_type {
            PacketType::Connect => {
                if *state == ConnectionState::Authenticating {
                    if let Some(session) = self.shared.session().as_mut() {
                        session.connected = true;
                    }
                    self.begin_join().await;
                }
            }
            PacketType::ConnectError => {
                let reason = packet
                    .data
                    .as_ref()
                    .and_then(|d| d.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("connect error")
                    .to_string();
                self.shared.state.fail(FailureKind::Auth(reason));
            }
            PacketType::Disconnect => match state {
                ConnectionState::Authenticating => {
                    self.shared.state.fail(FailureKind::Auth(
                        "server disconnected during authentication".into(),
                    ));
                }
                ConnectionState::Joining => {
                    self.shared.state.fail(FailureKind::JoinRejected(
                        "server disconnected during join".into(),
                    ));
                }
                _ => {
                    info!("server disconnected the namespace");
                    self.shared.state.transition(ConnectionState::Closed);
                }
            },
            PacketType::Ack => self.handle_ack(state, packet).await,
            PacketType::Event => match event_from_packet(packet) {
                Ok(frame) => self.handle_event(state, SocketEvent::from(frame)).await,
                Err(e) => warn!("dropping frame: {e}"),
            },
        }
    }

    async fn handle_ack(&mut self, state: &ConnectionState, packet: Packet) {
        let Some(id) = packet.ack_id else {
            warn!("dropping ack without id");
            return;
        };
        let args = match packet.data {
            Some(Value::Array(args)) => args,
            Some(other) => vec![other],
            None => Vec::new(),
        };

        if self.join_ack_id == Some(id) {
            self.join_ack_id = None;
            if *state == ConnectionState::Joining {
                match join_rejection(args.first()) {
                    Some(reason) => {
                        self.shared.state.fail(FailureKind::JoinRejected(reason));
                    }
                    None => self.enter_active().await,
                }
            }
            return;
        }

        let waiter = self.shared.acks().remove(&id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(args);
            }
            None => debug!(id, "ack for unknown or expired request"),
        }
    }

    async fn handle_event(&mut self, state: &ConnectionState, event: SocketEvent) {
        match state {
            ConnectionState::Authenticating => {
                if let Some(payload) = event.as_authen_success() {
                    info!(sid = %payload.sid, "credentials accepted");
                    if let Some(session) = self.shared.session().as_mut() {
                        session.authenticated = true;
                    }
                    self.begin_join().await;
                }
            }
            ConnectionState::Joining => {
                if event.event_type.is_room_end() {
                    self.shared
                        .state
                        .fail(FailureKind::JoinRejected("room has ended".into()));
                } else if event.event_type == SocketEventType::ParticipantChanged {
                    self.enter_active().await;
                }
            }
            _ => {}
        }

        if let Some(id) = event.ack_id {
            debug!(id, event = event.name(), "server requested an ack");
        }
        self.shared.dispatcher.dispatch(event);
    }

    async fn begin_join(&mut self) {
        if !self.shared.state.transition_if(
            |s| *s == ConnectionState::Authenticating,
            ConnectionState::Joining,
        ) {
            return;
        }
        let join = &self.shared.options.join;
        if let Some(session) = self.shared.session().as_mut() {
            session.room_id = Some(join.room.clone());
        }

        let id = self.shared.next_ack_id();
        self.join_ack_id = Some(id);
        self.join_deadline = Some(Instant::now() + self.shared.options.join_timeout);
        info!(room = %join.room, "joining room");

        let payload = join.payload();
        if let Err(e) = self
            .shared
            .send_event(outbound::JOIN_ROOM, &payload, Some(id))
            .await
        {
            self.shared.state.fail(FailureKind::Transport(e.to_string()));
        }
    }

    async fn enter_active(&mut self) {
        self.join_deadline = None;
        if !self
            .shared
            .state
            .transition_if(|s| *s == ConnectionState::Joining, ConnectionState::Active)
        {
            return;
        }
        if self.shared.options.load_history_on_join {
            if let Err(e) = self.shared.request_history().await {
                warn!("history request failed: {e}");
            }
        }
    }
}

/// Reason a join ack refuses the room, or `None` when it accepts.
///
/// Only a numeric `result` other than 200 is a refusal; a missing or
/// non-numeric result is accepted.
fn join_rejection(response: Option<&Value>) -> Option<String> {
    let response = response?;
    let code = response.get("result").and_then(Value::as_i64)?;
    if code == 200 {
        return None;
    }
    let reason = ["message", "reason"]
        .iter()
        .find_map(|key| response.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("result {code}"));
    Some(reason)
}

/// Message of a handshake error without its category prefix.
fn failure_detail(err: YtError) -> String {
    match err {
        YtError::Protocol(msg) | YtError::Framing(msg) => msg,
        other => other.to_string(),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
