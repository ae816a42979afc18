use thiserror::Error;

/// A central error enum for connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    #[error("gateway error: {0}")]
    Gateway(String),
    #[error("channel '{0}' not found")]
    ChannelNotFound(String),
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
