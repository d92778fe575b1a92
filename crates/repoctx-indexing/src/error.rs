//! Failure classification for the ingestion pipeline

use repoctx_data::QueueError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for pool-level operations
pub type IndexingResult<T> = Result<T, IndexingError>;

/// Which pipeline stage a job failed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    InvalidPayload,
    FetchError,
    ChunkingError,
    EmbeddingError,
    StorageError,
    Timeout,
}

impl FailureKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPayload => "InvalidPayload",
            Self::FetchError => "FetchError",
            Self::ChunkingError => "ChunkingError",
            Self::EmbeddingError => "EmbeddingError",
            Self::StorageError => "StorageError",
            Self::Timeout => "Timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job did not fully succeed, and whether trying again can help
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorSummary {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl ErrorSummary {
    pub fn new(kind: FailureKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::new(FailureKind::InvalidPayload, message, false)
    }

    pub fn timeout(stage: impl fmt::Display, limit: std::time::Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("{stage} exceeded {}s", limit.as_secs()),
            true,
        )
    }

    /// Text stored as the dead-letter or nack reason
    pub fn reason(&self) -> String {
        format!("{}: {}", self.kind, self.message)
    }
}

impl fmt::Display for ErrorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

/// Errors surfaced by the worker pool itself (not by individual jobs)
#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid worker configuration: {0}")]
    Configuration(String),

    #[error("Worker slot ended abnormally: {message}")]
    SlotPanicked { message: String },
}
