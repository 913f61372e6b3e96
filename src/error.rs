//! Error types for Waveform-DB

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Waveform-DB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Waveform-DB
///
/// "No data" and "access denied" are deliberately absent: a query that
/// selects nothing is an outcome, see [`crate::query::NoDataReason`].
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing query parameters
    #[error("{0}")]
    Validation(String),

    /// The file is not a recognized or readable waveform container
    #[error("Decode error in '{}': {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    /// The container decoded fine but holds no traces
    #[error("'{}' is a valid waveform file but contains no actual data", .0.display())]
    EmptyContainer(PathBuf),

    /// Codec failures outside of decoding (slicing, unsupported output format)
    #[error("Codec error: {0}")]
    Codec(String),

    /// Failure while writing a response; the response is aborted
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// The caller cancelled a long-running operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// Catalog persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A filesystem event the index cannot act on
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error wrapper
    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    /// Build a decode error for `path`
    pub fn decode(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Other(format!("worker task failed: {}", e))
    }
}
