//! Transport abstraction.
//!
//! A connection owns one [`FrameSource`] (read by the receive loop only) and
//! one [`FrameSink`] wrapped in a [`FrameWriter`], the single write path
//! shared by the heartbeat, the join sequence and caller sends.

pub mod memory;
pub mod websocket;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use yt_core::error::{YtError, YtResult};

use crate::frame::{encode_control_frame, ControlFrame};
use crate::heartbeat::LinkActivity;

/// Write half of a text-frame transport.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> YtResult<()>;

    /// Start an orderly close. The matching source should end afterwards.
    async fn close(&mut self) -> YtResult<()>;
}

/// Read half of a text-frame transport. `None` means the peer closed.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_text(&mut self) -> Option<YtResult<String>>;
}

/// Serialized write path. Every outgoing frame takes the lock for the whole
/// send, so frames never interleave.
#[derive(Clone)]
pub struct FrameWriter {
    sink: Arc<Mutex<Box<dyn FrameSink>>>,
    activity: Arc<LinkActivity>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl FrameWriter {
    pub fn new<S: FrameSink + 'static>(sink: S, activity: Arc<LinkActivity>) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            activity,
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn activity(&self) -> &Arc<LinkActivity> {
        &self.activity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::Acquire)
    }

    pub async fn send(&self, frame: String) -> YtResult<()> {
        let mut sink = self.sink.lock().await;
        if self.is_closed() {
            return Err(YtError::NotConnected);
        }
        debug!(frame = %truncate(&frame), "send");
        sink.send_text(frame).await?;
        self.activity.mark_sent();
        Ok(())
    }

    pub async fn send_control(&self, kind: ControlFrame) -> YtResult<()> {
        self.send(encode_control_frame(kind).to_string()).await
    }

    /// Close the sink once. Later calls are no-ops.
    pub async fn close(&self) -> YtResult<()> {
        let mut sink = self.sink.lock().await;
        if self.closed.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return Ok(());
        }
        sink.close().await
    }
}

/// Shorten long frames for debug logs.
pub(crate) fn truncate(frame: &str) -> &str {
    const MAX: usize = 200;
    if frame.len() <= MAX {
        return frame;
    }
    let mut end = MAX;
    while !frame.is_char_boundary(end) {
        end -= 1;
    }
    &frame[..end]
}
