//! Client-side error types.

use notifeed_shared::{ApiError, ProtocolError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failure of the push channel transport. Never surfaced to callers of the
/// connection manager; it only drives the reconnect state machine.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid hub url: {0}")]
    Url(#[from] url::ParseError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),
    #[error("connection closed during handshake")]
    ClosedDuringHandshake,
    #[error("no message from server within {0:?}")]
    ServerTimeout(std::time::Duration),
    #[error("server closed the channel: {0}")]
    ServerClosed(String),
    #[error("{0}")]
    Other(String),
}

/// Errors returned by feed operations.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("no credential available")]
    MissingCredential,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
