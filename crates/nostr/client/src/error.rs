//! Client error types.

use thiserror::Error;

/// Why a relay connection could not be established.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("handshake timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("config error: {0}")]
    Config(String),

    #[error("signing error: {0}")]
    Signing(#[from] nostr::SigningError),

    #[error("malformed event: {0}")]
    MalformedEvent(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("connection closed")]
    Closed,

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;
