use thiserror::Error;

/// Failures the hub reports to a client, plus config loading.
#[derive(Debug, Error)]
pub enum ChangeStreamsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Unknown entity: {name}")]
    UnknownEntity { name: String },

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unknown connection: {conn_id}")]
    UnknownConnection { conn_id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ChangeStreamsError {
    /// Stable code carried in the `error.code` field of a `res` frame.
    pub fn code(&self) -> &'static str {
        match self {
            ChangeStreamsError::Config(_) => "CONFIG_ERROR",
            ChangeStreamsError::AuthFailed(_) => "AUTH_FAILED",
            ChangeStreamsError::Protocol(_) => "PROTOCOL_ERROR",
            ChangeStreamsError::MethodNotFound { .. } => "METHOD_NOT_FOUND",
            ChangeStreamsError::UnknownEntity { .. } => "UNKNOWN_ENTITY",
            ChangeStreamsError::InvalidParams(_) => "INVALID_PARAMS",
            ChangeStreamsError::UnknownConnection { .. } => "UNKNOWN_CONNECTION",
            ChangeStreamsError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Human-readable detail without the variant prefix, for `error.message`.
    pub fn detail(&self) -> String {
        match self {
            ChangeStreamsError::AuthFailed(reason) | ChangeStreamsError::Protocol(reason) => {
                reason.clone()
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChangeStreamsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_rejections_keep_their_wire_codes() {
        let auth = ChangeStreamsError::AuthFailed("invalid token".to_string());
        assert_eq!(auth.code(), "AUTH_FAILED");
        assert_eq!(auth.detail(), "invalid token");

        let protocol = ChangeStreamsError::Protocol("must authenticate first".to_string());
        assert_eq!(protocol.code(), "PROTOCOL_ERROR");
        assert_eq!(protocol.detail(), "must authenticate first");
    }

    #[test]
    fn other_errors_render_in_full() {
        let e = ChangeStreamsError::UnknownEntity {
            name: "Invoices".to_string(),
        };
        assert_eq!(e.code(), "UNKNOWN_ENTITY");
        assert_eq!(e.detail(), "Unknown entity: Invoices");
    }
}
