//! Error types for the signaling client
//!
//! Protocol and correlation errors are recovered where they happen (logged and
//! dropped). Negotiation errors are routed to the transaction that caused them,
//! and transport errors tear the whole session down.

/// Result type alias using [`ClientError`]
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors produced by the signaling client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Inbound frame could not be parsed or carries no known `janus` value
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Response references a transaction that is not pending
    #[error("No pending transaction: {0}")]
    Correlation(String),

    /// Gateway or plugin refused a request, or SDP could not be applied
    #[error("Negotiation failed ({code}): {reason}")]
    Negotiation { code: i64, reason: String },

    /// The gateway link dropped
    #[error("Transport error: {0}")]
    Transport(String),

    /// The initial gateway link could not be opened
    #[error("Failed to connect to gateway: {0}")]
    Startup(String),

    /// The media engine rejected an operation
    #[error("Peer connection error: {0}")]
    Peer(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ClientError {
    /// Whether this error is local to a single frame and never affects the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ClientError::Protocol(_) | ClientError::Correlation(_))
    }
}
