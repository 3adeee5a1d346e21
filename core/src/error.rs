/// Error types for the messaging core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Invalid participant identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Message has neither text nor attachment")]
    EmptyMessage,

    #[error("Attachment too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Upload error: {0}")]
    Upload(String),

    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BoardError>;
