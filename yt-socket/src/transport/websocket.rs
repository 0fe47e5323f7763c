//! WebSocket transport over `tokio-tungstenite`.
//!
//! The stream is split once: the read half becomes the connection's
//! [`FrameSource`], the write half its [`FrameSink`].

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use yt_core::error::{YtError, YtResult};

use super::{FrameSink, FrameSource};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketSink {
    inner: SplitSink<WsStream, Message>,
}

pub struct WebSocketSource {
    inner: SplitStream<WsStream>,
}

/// Open a WebSocket to `url` and split it.
pub async fn connect(url: &str) -> YtResult<(WebSocketSink, WebSocketSource)> {
    let (stream, response) = connect_async(url)
        .await
        .map_err(|e| YtError::Transport(format!("WebSocket connect error: {e}")))?;
    info!(status = %response.status(), "WebSocket connected to {}", redact(url));

    let (sink, source) = stream.split();
    Ok((WebSocketSink { inner: sink }, WebSocketSource { inner: source }))
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> YtResult<()> {
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|e| YtError::Transport(format!("WS write error: {e}")))
    }

    async fn close(&mut self) -> YtResult<()> {
        self.inner
            .close()
            .await
            .map_err(|e| YtError::Transport(format!("WS close error: {e}")))
    }
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn next_text(&mut self) -> Option<YtResult<String>> {
        loop {
            match self.inner.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!("dropping non-utf8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by server");
                    return None;
                }
                // Protocol-level ping/pong is answered by tungstenite.
                Ok(_) => continue,
                Err(e) => return Some(Err(YtError::Transport(format!("WS read error: {e}")))),
            }
        }
    }
}

/// Hide the `auth_token` query value from logs.
fn redact(url: &str) -> String {
    match url.find("auth_token=") {
        Some(idx) => {
            let start = idx + "auth_token=".len();
            let end = url[start..].find('&').map_or(url.len(), |i| start + i);
            format!("{}***{}", &url[..start], &url[end..])
        }
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_token() {
        assert_eq!(
            redact("wss://h/socket.io/?EIO=4&auth_token=secret&transport=websocket"),
            "wss://h/socket.io/?EIO=4&auth_token=***&transport=websocket"
        );
        assert_eq!(redact("wss://h/?auth_token=abc"), "wss://h/?auth_token=***");
        assert_eq!(redact("wss://h/?EIO=4"), "wss://h/?EIO=4");
    }
}
