//! repoctx context storage crate
//!
//! Persists the chunks and embeddings of a processed repository context.
//! `PostgresContextStore` backs production; `MockContextStore` keeps
//! everything in memory for tests.

pub mod error;
pub mod mock;
pub mod postgres;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use mock::MockContextStore;
pub use postgres::PostgresContextStore;
pub use store::{
    ChunkRecord, ContextOwner, ContextState, ContextStatus, ContextStore, ReplaceContext,
};
