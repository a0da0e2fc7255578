//! Error types for the shared record model

use thiserror::Error;

/// Result type alias for record model operations
pub type Result<T> = std::result::Result<T, SluiceError>;

#[derive(Error, Debug)]
pub enum SluiceError {
    /// A JSON value other than an object was offered as a record
    #[error("record must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
