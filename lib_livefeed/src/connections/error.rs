use std::time::Duration;

use thiserror::Error;

/// Connection-level failures. Transport errors and staleness are recovered
/// by the reconnect policy; they reach the consumer only through
/// `on_terminal_error`, once, when the connection gives up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The socket failed to open or closed unexpectedly.
    #[error("transport error: {0}")]
    Transport(String),

    /// Neither data nor heartbeat arrived within the window.
    #[error("no heartbeat or data for {0:?}")]
    StalenessTimeout(Duration),

    /// The endpoint URL could not be built for the location.
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),
}
