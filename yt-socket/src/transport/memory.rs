//! In-memory transport pair for driving a connection without sockets.
//!
//! The [`MemoryPeer`] plays the server: it pushes frames to the client's
//! source and reads what the client sent. Closing the client sink ends the
//! client source, the way a server answers a close handshake.

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use yt_core::error::{YtError, YtResult};

use super::{FrameSink, FrameSource};

pub struct MemorySink {
    outbound: mpsc::UnboundedSender<String>,
    closed: watch::Sender<bool>,
}

pub struct MemorySource {
    inbound: mpsc::UnboundedReceiver<YtResult<String>>,
    closed: watch::Receiver<bool>,
}

/// Server side of the pair.
pub struct MemoryPeer {
    to_client: Option<mpsc::UnboundedSender<YtResult<String>>>,
    from_client: mpsc::UnboundedReceiver<String>,
    closed: watch::Receiver<bool>,
}

/// Build a connected client sink, client source and server peer.
pub fn pair() -> (MemorySink, MemorySource, MemoryPeer) {
    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, from_client) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        MemorySink {
            outbound,
            closed: closed_tx,
        },
        MemorySource {
            inbound,
            closed: closed_rx.clone(),
        },
        MemoryPeer {
            to_client: Some(to_client),
            from_client,
            closed: closed_rx,
        },
    )
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> YtResult<()> {
        if *self.closed.borrow() {
            return Err(YtError::Transport("memory transport closed".into()));
        }
        self.outbound
            .send(text)
            .map_err(|_| YtError::Transport("peer dropped".into()))
    }

    async fn close(&mut self) -> YtResult<()> {
        self.closed.send_replace(true);
        Ok(())
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_text(&mut self) -> Option<YtResult<String>> {
        loop {
            if *self.closed.borrow() {
                return None;
            }
            tokio::select! {
                biased;
                frame = self.inbound.recv() => return frame,
                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

impl MemoryPeer {
    /// Deliver a frame to the client.
    pub fn send(&self, text: impl Into<String>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Ok(text.into()));
        }
    }

    /// Deliver a transport error to the client.
    pub fn send_error(&self, message: impl Into<String>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(Err(YtError::Transport(message.into())));
        }
    }

    /// Drop the server side of the stream, as an abrupt disconnect.
    pub fn disconnect(&mut self) {
        self.to_client = None;
    }

    /// Next frame the client sent, or `None` once the client is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// A frame the client already sent, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_recv().ok()
    }

    /// Everything the client has sent so far.
    pub fn drain(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(frame) = self.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn client_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (mut sink, mut source, mut peer) = pair();
        peer.send("0{}");
        assert_eq!(source.next_text().await.unwrap().unwrap(), "0{}");

        sink.send_text("40".into()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("40"));
    }

    #[tokio::test]
    async fn test_close_ends_source() {
        let (mut sink, mut source, peer) = pair();
        sink.close().await.unwrap();
        assert!(source.next_text().await.is_none());
        assert!(peer.client_closed());
        assert!(sink.send_text("2".into()).await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_ends_source() {
        let (_sink, mut source, mut peer) = pair();
        peer.send("2");
        peer.disconnect();
        assert_eq!(source.next_text().await.unwrap().unwrap(), "2");
        assert!(source.next_text().await.is_none());
    }

    #[tokio::test]
    async fn test_injected_error() {
        let (_sink, mut source, peer) = pair();
        peer.send_error("reset by peer");
        assert!(matches!(
            source.next_text().await,
            Some(Err(YtError::Transport(_)))
        ));
    }
}
