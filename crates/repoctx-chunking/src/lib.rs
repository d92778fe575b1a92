//! repoctx chunking crate
//!
//! Splits text files into bounded, overlapping character windows tagged with
//! their source path, offsets, language hint and content hash.

pub mod chunker;
pub mod error;
pub mod hash;
pub mod language;

pub use chunker::{Chunk, Chunker, Chunks, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use error::{ChunkingError, ChunkingResult};
pub use hash::hash_content;
pub use language::detect_language;
