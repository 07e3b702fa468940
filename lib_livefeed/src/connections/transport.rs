//! # Transports
//!
//! A transport opens one message-oriented socket against a URL and yields
//! its frames in order. `WsTransport` is the production websocket
//! implementation; `memory::ChannelTransport` drives connections in tests.

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::debug;
use url::Url;

use crate::connections::error::ConnectionError;

/// One inbound frame, already stripped of websocket framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text (or UTF-8 binary) message.
    Text(String),
    /// A transport-level ping or pong.
    Ping,
    /// The peer sent a close frame.
    Close,
}

/// Frames of one socket, in the order the server sent them. The stream
/// ends when the socket is gone.
pub type FrameStream = BoxStream<'static, Result<Frame, ConnectionError>>;

/// Opens sockets.
pub trait Transport: Send + Sync + 'static {
    /// Connects to `url`. Resolves once the socket is open.
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<FrameStream, ConnectionError>>;
}

/// Websocket transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Creates the transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<FrameStream, ConnectionError>> {
        Box::pin(async move {
            let (ws_stream, _) = connect_async(url.as_str())
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))?;
            debug!(%url, "websocket open");

            let frames = ws_stream.filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                    Ok(Message::Binary(bin)) => Some(Ok(Frame::Text(String::from_utf8_lossy(&bin).into_owned()))),
                    // Heartbeats so we don't go stale during low volume
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => Some(Ok(Frame::Ping)),
                    Ok(Message::Close(_)) => Some(Ok(Frame::Close)),
                    Ok(Message::Frame(_)) => None,
                    Err(e) => Some(Err(ConnectionError::Transport(e.to_string()))),
                }
            });

            Ok(frames.boxed())
        })
    }
}
