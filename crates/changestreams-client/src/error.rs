use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("handshake rejected: {code}: {message}")]
    Handshake { code: String, message: String },

    #[error("connection closed")]
    Closed,

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
