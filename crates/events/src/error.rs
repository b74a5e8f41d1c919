//! Transport error taxonomy.

/// Errors raised by publishers, consumers and broker implementations.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// No usable broker connection. Publishes fail fast with this while the
    /// connection is being re-established.
    #[error("Broker unavailable: {0}")]
    TransportUnavailable(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The broker rejected an operation on a live connection.
    #[error("Broker protocol error: {0}")]
    Protocol(String),

    /// A queue name or routing pattern is invalid.
    #[error("Invalid messaging configuration: {0}")]
    Config(String),
}

impl MessagingError {
    /// Whether retrying after a reconnect can help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportUnavailable(_) | Self::Protocol(_))
    }
}
