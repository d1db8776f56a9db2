use fleet_model::DeviceId;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur in the session core
#[derive(Error, Debug)]
pub enum SessionError {
    /// Device is neither cached nor stored
    #[error("Device {0} not found")]
    DeviceNotFound(DeviceId),

    /// A required storage lookup failed
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),

    /// A listener returned an error or panicked during dispatch
    ///
    /// Reported through logging; dispatch entry points never return it.
    #[error("Listener for device {device_id} failed: {message}")]
    ListenerFailure { device_id: DeviceId, message: String },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for session operations
pub type Result<T> = std::result::Result<T, SessionError>;
