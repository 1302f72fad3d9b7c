//! Transport-layer errors

use common::ErrorCategory;
use thiserror::Error;

/// Failure inside the WebSocket transport.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Error raised by the underlying WebSocket stack
    #[error("websocket transport: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    /// Operation on a connection that was closed by the caller
    #[error("connection closed")]
    Closed,
    /// Operation requiring a live socket while none is connected
    #[error("not connected")]
    NotConnected,
}

impl FeedError {
    /// Stable error category for this failure.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) => ErrorCategory::Connection,
            Self::Closed | Self::NotConnected => ErrorCategory::Unavailable,
        }
    }
}
