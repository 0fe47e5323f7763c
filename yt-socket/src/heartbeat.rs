//! Heartbeat scheduler.
//!
//! Runs as its own task once a session exists. It writes pings through the
//! shared [`FrameWriter`] and only reads the link activity clock; server
//! pings are answered by the receive loop, not here.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::frame::ControlFrame;
use crate::state::{FailureKind, Session, StateCell};
use crate::transport::FrameWriter;

/// Timestamps of the last frame received and sent.
#[derive(Debug)]
pub struct LinkActivity {
    last_received: Mutex<Instant>,
    last_sent: Mutex<Instant>,
}

impl Default for LinkActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkActivity {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            last_received: Mutex::new(now),
            last_sent: Mutex::new(now),
        }
    }

    pub fn mark_received(&self) {
        if let Ok(mut at) = self.last_received.lock() {
            *at = Instant::now();
        }
    }

    pub fn mark_sent(&self) {
        if let Ok(mut at) = self.last_sent.lock() {
            *at = Instant::now();
        }
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
            .lock()
            .map(|at| *at)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    pub fn last_sent(&self) -> Instant {
        self.last_sent
            .lock()
            .map(|at| *at)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    /// Most recent frame in either direction.
    pub fn last_activity(&self) -> Instant {
        self.last_received().max(self.last_sent())
    }
}

/// Timing derived from the handshake and the configured margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTiming {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// The ε subtracted from the interval.
    pub margin: Duration,
}

impl HeartbeatTiming {
    pub fn new(session: &Session, margin: Duration) -> Self {
        Self {
            ping_interval: session.ping_interval,
            ping_timeout: session.ping_timeout,
            margin,
        }
    }

    /// Time between ticks: `interval - ε`, or the full interval when ε
    /// would leave nothing.
    pub fn tick_period(&self) -> Duration {
        match self.ping_interval.checked_sub(self.margin) {
            Some(period) if !period.is_zero() => period,
            _ => self.ping_interval,
        }
    }

    /// A tick sends a ping only if the link has been quiet this long.
    pub fn quiet_window(&self) -> Duration {
        self.ping_interval.saturating_sub(self.margin * 2)
    }

    /// Receive silence after which the connection is declared dead.
    pub fn liveness_deadline(&self) -> Duration {
        self.ping_interval + self.ping_timeout
    }
}

/// Handle to the heartbeat task. Cancellation is synchronous and idempotent.
#[derive(Default)]
pub struct Heartbeat {
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the scheduler, replacing any previous one.
    pub fn start(&self, timing: HeartbeatTiming, writer: FrameWriter, state: StateCell) {
        debug!(
            period_ms = timing.tick_period().as_millis() as u64,
            deadline_ms = timing.liveness_deadline().as_millis() as u64,
            "heartbeat started"
        );
        let handle = tokio::spawn(run(timing, writer, state));
        if let Ok(mut task) = self.task.lock() {
            if let Some(previous) = task.replace(handle) {
                previous.abort();
            }
        }
    }

    /// Stop the scheduler. Safe to call any number of times.
    pub fn cancel(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
                debug!("heartbeat cancelled");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run(timing: HeartbeatTiming, writer: FrameWriter, state: StateCell) {
    let period = timing.tick_period();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let activity = writer.activity().clone();

    loop {
        let deadline = activity.last_received() + timing.liveness_deadline();
        tokio::select! {
            _ = ticker.tick() => {
                if state.get().is_terminal() {
                    break;
                }
                if activity.last_activity().elapsed() < timing.quiet_window() {
                    continue;
                }
                if let Err(e) = writer.send_control(ControlFrame::Ping).await {
                    debug!("heartbeat ping not sent: {e}");
                }
            }
            _ = time::sleep_until(deadline) => {
                // A frame may have arrived since the deadline was armed.
                if activity.last_received().elapsed() < timing.liveness_deadline() {
                    continue;
                }
                warn!(
                    silent_ms = activity.last_received().elapsed().as_millis() as u64,
                    "no frame within liveness window"
                );
                state.fail(FailureKind::HeartbeatTimeout);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory;

    fn timing(interval_ms: u64, timeout_ms: u64) -> HeartbeatTiming {
        HeartbeatTiming {
            ping_interval: Duration::from_millis(interval_ms),
            ping_timeout: Duration::from_millis(timeout_ms),
            margin: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_timing_math() {
        let t = timing(25_000, 20_000);
        assert_eq!(t.tick_period(), Duration::from_millis(24_000));
        assert_eq!(t.quiet_window(), Duration::from_millis(23_000));
        assert_eq!(t.liveness_deadline(), Duration::from_millis(45_000));

        let tiny = timing(500, 500);
        assert_eq!(tiny.tick_period(), Duration::from_millis(500));
        assert_eq!(tiny.quiet_window(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_ping_at_interval_minus_margin() {
        let (sink, _source, mut peer) = memory::pair();
        let writer = FrameWriter::new(sink, Arc::new(LinkActivity::new()));
        let heartbeat = Heartbeat::new();
        heartbeat.start(timing(25_000, 20_000), writer.clone(), StateCell::new());

        time::sleep(Duration::from_millis(23_999)).await;
        assert!(peer.try_recv().is_none());

        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(peer.try_recv().as_deref(), Some("2"));
        heartbeat.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_traffic_suppresses_ping() {
        let (sink, _source, mut peer) = memory::pair();
        let activity = Arc::new(LinkActivity::new());
        let writer = FrameWriter::new(sink, activity.clone());
        let heartbeat = Heartbeat::new();
        heartbeat.start(timing(25_000, 20_000), writer, StateCell::new());

        time::sleep(Duration::from_millis(10_000)).await;
        activity.mark_received();

        time::sleep(Duration::from_millis(14_500)).await;
        assert!(peer.try_recv().is_none(), "traffic 14.5s ago must suppress the tick");
        heartbeat.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_fails_connection() {
        let (sink, _source, _peer) = memory::pair();
        let writer = FrameWriter::new(sink, Arc::new(LinkActivity::new()));
        let state = StateCell::new();
        let heartbeat = Heartbeat::new();
        heartbeat.start(timing(25_000, 20_000), writer, state.clone());

        time::sleep(Duration::from_millis(44_000)).await;
        assert!(!state.get().is_terminal());

        time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(
            state.get(),
            crate::state::ConnectionState::Failed(FailureKind::HeartbeatTimeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let (sink, _source, mut peer) = memory::pair();
        let writer = FrameWriter::new(sink, Arc::new(LinkActivity::new()));
        let heartbeat = Heartbeat::new();
        heartbeat.start(timing(2_000, 2_000), writer, StateCell::new());
        assert!(heartbeat.is_running());

        heartbeat.cancel();
        heartbeat.cancel();
        assert!(!heartbeat.is_running());

        time::sleep(Duration::from_secs(10)).await;
        assert!(peer.try_recv().is_none());
    }
}
