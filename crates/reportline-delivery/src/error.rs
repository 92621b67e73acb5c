use thiserror::Error;

/// Errors that can occur while delivering an artifact.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The destination is neither a valid email address nor a usable path.
    #[error("Invalid destination: {0}")]
    InvalidDestination(String),

    /// The mail transport rejected or failed to send a message.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The artifact could not be written to its filesystem destination.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// The transport-specific configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
