//! # Connections
//!
//! Reconnecting subscriptions, one per `Location`.
//!
//! ## Core Components:
//! - **`StreamConnection`**: opens supervised subscriptions. Each one runs a
//!   staleness watchdog and reconnects after a fixed delay; frames from a
//!   replaced socket are never delivered.
//! - **`Transport`**: how a socket is opened. `WsTransport` for production,
//!   `memory::ChannelTransport` for tests.
//! - **`UrlFactory`**: builds the endpoint for a location on every connect.

/// Connection errors.
pub mod error;
/// In-memory transport for tests and demos.
pub mod memory;
/// Supervised subscriptions.
pub mod stream_connection;
/// Socket transports.
pub mod transport;
/// Endpoint URL builders.
pub mod url_factory;

pub use error::ConnectionError;
pub use stream_connection::{
    Callbacks, ConnectionConfig, ConnectionHandle, ConnectionState, StreamConnection, StreamHandler,
};
pub use transport::{Frame, FrameStream, Transport, WsTransport};
pub use url_factory::{EndpointUrl, UrlFactory};
