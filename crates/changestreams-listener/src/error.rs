use thiserror::Error;

/// Errors raised by the change emitter and listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Connection, LISTEN or DDL failure reported by Postgres.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The LISTEN connection dropped under an active pump.
    #[error("LISTEN connection lost")]
    ConnectionLost,

    /// A notification payload that does not decode into a `ChangeEvent`.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A table, column or channel name that cannot be used as a bare SQL identifier.
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),
}

pub type Result<T> = std::result::Result<T, ListenerError>;
