//! In-memory transport. Every `connect` hands the server side of a fresh
//! socket to whoever holds the receiver, so tests can script frames,
//! silence and disconnects without a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use url::Url;

use crate::connections::error::ConnectionError;
use crate::connections::transport::{Frame, FrameStream, Transport};

/// Server end of one in-memory socket. Dropping it closes the socket.
#[derive(Debug)]
pub struct ServerSocket {
    /// The URL the client connected to.
    pub url: Url,
    tx: mpsc::UnboundedSender<Result<Frame, ConnectionError>>,
}

impl ServerSocket {
    /// Sends a text frame. Returns `false` once the client side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.tx.send(Ok(Frame::Text(text.into()))).is_ok()
    }

    /// Sends a transport ping.
    pub fn send_ping(&self) -> bool {
        self.tx.send(Ok(Frame::Ping)).is_ok()
    }

    /// Sends a close frame.
    pub fn send_close(&self) -> bool {
        self.tx.send(Ok(Frame::Close)).is_ok()
    }

    /// Fails the socket with a transport error.
    pub fn fail(self, reason: &str) {
        let _ = self.tx.send(Err(ConnectionError::Transport(reason.to_string())));
    }

    /// `true` once the client stopped reading this socket.
    pub fn is_client_gone(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Transport whose sockets are driven from a test.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sockets: mpsc::UnboundedSender<ServerSocket>,
    refusals: Arc<AtomicUsize>,
}

impl ChannelTransport {
    /// Creates the transport and the receiver of server-side sockets.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerSocket>) {
        let (sockets, rx) = mpsc::unbounded_channel();
        (
            Self {
                sockets,
                refusals: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Makes the next `count` connects fail as if the server refused them.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }
}

impl Transport for ChannelTransport {
    fn connect(&self, url: Url) -> BoxFuture<'static, Result<FrameStream, ConnectionError>> {
        let refused = self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let sockets = self.sockets.clone();

        Box::pin(async move {
            if refused {
                return Err(ConnectionError::Transport("connection refused".to_string()));
            }

            let (tx, rx) = mpsc::unbounded_channel();
            sockets
                .send(ServerSocket { url, tx })
                .map_err(|_| ConnectionError::Transport("server gone".to_string()))?;

            let frames = futures_util::stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|frame| (frame, rx))
            });
            Ok(frames.boxed())
        })
    }
}
