//! Error types for context store operations

use repoctx_data::DatabaseError;
use thiserror::Error;

/// Result type alias for context store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while persisting or reading a context
#[derive(Error, Debug)]
pub enum StoreError {
    /// A vector does not have the dimension the replace was declared with
    #[error("Vector dimension mismatch for {source_path}: expected {expected}, got {actual}")]
    DimensionMismatch {
        source_path: String,
        expected: usize,
        actual: usize,
    },

    /// A record cannot be represented in the store (offsets out of range, zero dimension, ...)
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Stored status text is not one the store knows about
    #[error("Unknown context status '{0}'")]
    UnknownStatus(String),

    /// The context exists and belongs to a different repository or user
    #[error("Context {context_id} belongs to a different repository or user")]
    OwnerMismatch { context_id: String },

    /// Storage backend is unavailable
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backing database failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl StoreError {
    /// Whether the same write can succeed on a later attempt
    ///
    /// Malformed input fails the same way every time; everything else is
    /// treated as a storage outage.
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::DimensionMismatch { .. }
                | Self::InvalidRecord(_)
                | Self::UnknownStatus(_)
                | Self::OwnerMismatch { .. }
        )
    }
}
