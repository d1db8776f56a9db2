use thiserror::Error;

/// Errors raised while publishing or receiving broadcast envelopes
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// Envelope could not be serialized or parsed
    #[error("Failed to encode broadcast envelope: {0}")]
    Encode(#[from] serde_json::Error),

    /// Socket level failure
    #[error("Broadcast I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No receiver is left on the other side
    #[error("Broadcast channel disconnected")]
    Disconnected,

    /// Invalid transport configuration
    #[error("Invalid broadcast configuration: {0}")]
    Configuration(String),
}

/// Result type for broadcast operations
pub type Result<T> = std::result::Result<T, BroadcastError>;
