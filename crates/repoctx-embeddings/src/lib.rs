//! repoctx embedding generation crate
//!
//! Converts chunk text into fixed-dimension vectors through a remote,
//! OpenAI-compatible embedding API.

pub mod error;
pub mod http;
pub mod mock;
pub mod service;
pub mod traits;

pub use error::{EmbeddingError, EmbeddingResult};
pub use http::HttpEmbeddingProvider;
pub use mock::MockEmbeddingProvider;
pub use repoctx_config::EmbeddingConfig;
pub use service::DefaultEmbeddingService;
pub use traits::{EmbeddingProvider, EmbeddingService, EmbeddingStats};
