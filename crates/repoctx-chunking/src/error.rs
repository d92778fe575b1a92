//! Error types for the chunking crate

use thiserror::Error;

/// Chunking-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    /// Window parameters that cannot make progress
    #[error("Invalid chunking parameters: size={chunk_size}, overlap={chunk_overlap}")]
    InvalidParameters {
        chunk_size: usize,
        chunk_overlap: usize,
    },

    /// A file could not be turned into chunks
    #[error("Failed to chunk {path}: {message}")]
    File { path: String, message: String },
}

impl ChunkingError {
    pub fn file(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::File {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for chunking operations
pub type ChunkingResult<T> = Result<T, ChunkingError>;
