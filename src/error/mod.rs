use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Reasons an inbound frame could not be turned into an [`Event`](crate::websocket::Event).
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
