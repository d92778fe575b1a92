//! Error types for the repoctx-embeddings crate

use thiserror::Error;

/// Result type alias for embedding operations
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Comprehensive error type for embedding operations
#[derive(Error, Debug, Clone)]
pub enum EmbeddingError {
    /// Provider answered with a non-success status
    #[error("Embedding provider returned {status}: {body}")]
    Http { status: u16, body: String },

    /// Request never got a response (connect, timeout, TLS)
    #[error("Network error calling embedding provider: {0}")]
    Network(String),

    /// Response body could not be decoded or did not match the request
    #[error("Invalid embedding response: {0}")]
    InvalidResponse(String),

    /// Vector length differs from the configured dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Configuration and environment errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A batch kept failing after every retry
    #[error("Embedding batch failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<EmbeddingError>,
    },
}

impl EmbeddingError {
    /// Create a configuration error
    pub fn config_error(msg: &str) -> Self {
        Self::Config(msg.to_string())
    }

    /// Whether the same request may succeed later
    ///
    /// Rate limiting (429), server errors (5xx), network failures and
    /// truncated responses are transient. Any other 4xx, a dimension
    /// mismatch and configuration problems are permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Network(_) | Self::InvalidResponse(_) => true,
            Self::DimensionMismatch { .. } | Self::Config(_) => false,
            Self::RetriesExhausted { last, .. } => last.is_retryable(),
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}
