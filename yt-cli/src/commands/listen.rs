//! Listen command - join one room and log its events.

use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use yt_core::config::AppConfig;
use yt_core::error::{YtError, YtResult};
use yt_socket::{
    Connection, ConnectionOptions, ConnectionState, EventDispatcher, ParticipantTracker,
    RosterChange, SocketEvent, SocketEventType,
};

/// How many history lines to log after joining.
const HISTORY_TAIL: usize = 15;

/// Run the listen command. Returns the terminal failure as an error.
pub async fn run(
    config: AppConfig,
    room: String,
    gme_id: Option<String>,
    no_history: bool,
) -> YtResult<()> {
    config.validate_for_connect()?;

    let gme_id = gme_id.unwrap_or_else(|| room.clone());
    let mut options = ConnectionOptions::from_config(&config, &room, &gme_id);
    if no_history {
        options.load_history_on_join = false;
    }
    let dispatcher = dispatcher(&options.join.uuid);

    let conn =
        Connection::connect_websocket(&config.server.effective_url(), options, dispatcher)
            .await?;
    info!(room = %room, "connected, waiting for room events (Ctrl+C to stop)");

    let state = tokio::select! {
        state = conn.wait_terminal() => state,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, closing connection");
            conn.close().await
        }
    };
    outcome(state)
}

fn outcome(state: ConnectionState) -> YtResult<()> {
    match state {
        ConnectionState::Failed(kind) => Err(YtError::from(kind)),
        other => {
            info!("connection finished: {other}");
            Ok(())
        }
    }
}

fn dispatcher(self_uuid: &str) -> EventDispatcher {
    let roster = Arc::new(Mutex::new(ParticipantTracker::new(self_uuid)));
    EventDispatcher::builder()
        .on(SocketEventType::NewMessage, log_chat)
        .on(SocketEventType::Message, log_chat)
        .on(SocketEventType::LoadMessage, log_history)
        .on(SocketEventType::MessageHistory, log_history)
        .on(SocketEventType::SpeakerChanged, |e| {
            info!("{} speaker status changed", e.actor_name().unwrap_or("someone"));
            Ok(())
        })
        .on(SocketEventType::ParticipantChanged, move |e| {
            let change = roster
                .lock()
                .map_err(|_| YtError::Internal("participant tracker poisoned".into()))?
                .observe(e);
            match change {
                Some(change) => log_roster(&change),
                None => warn!("unrecognized participant payload"),
            }
            Ok(())
        })
        .on(SocketEventType::NewGift, |e| {
            info!("{} sent a gift", e.actor_name().unwrap_or("someone"));
            Ok(())
        })
        .on(SocketEventType::NewReaction, |_| {
            info!("reaction");
            Ok(())
        })
        .on(SocketEventType::LiveEnd, log_room_end)
        .on(SocketEventType::EndLive, log_room_end)
        .on_any(|e| {
            debug!(event = e.name(), data = %e.data, "room event");
            Ok(())
        })
        .build()
}

fn log_chat(event: &SocketEvent) -> YtResult<()> {
    let msg = event
        .as_chat_message()
        .ok_or_else(|| YtError::Serialization("chat payload is not an object".into()))?;
    info!(sender = msg.sender(), "{}", msg.text());
    Ok(())
}

fn log_history(event: &SocketEvent) -> YtResult<()> {
    let Some(history) = event.as_message_history() else {
        warn!("unrecognized history payload");
        return Ok(());
    };
    info!(total = history.len(), "chat history");
    let skip = history.len().saturating_sub(HISTORY_TAIL);
    for msg in &history[skip..] {
        info!(sender = msg.sender(), "  {}", msg.text());
    }
    Ok(())
}

fn log_roster(change: &RosterChange) {
    for person in &change.joined {
        info!("{} joined", person.pin_name.as_deref().unwrap_or("User"));
    }
    for departure in &change.left {
        info!(
            "{} left after {}s",
            departure.pin_name,
            departure.stayed.as_secs()
        );
    }
}

fn log_room_end(_: &SocketEvent) -> YtResult<()> {
    warn!("the host ended the room");
    Ok(())
}
