//! Ingestion orchestration crate for repoctx
//!
//! The job processor drives one claimed job through fetch, chunk, embed and
//! store; the worker pool runs many processors against the shared queue and
//! turns each result into an ack, a delayed retry or a dead letter.

pub mod callback;
pub mod error;
pub mod pool;
pub mod processor;
pub mod result;
pub mod stage;

// Re-export error types
pub use error::{ErrorSummary, FailureKind, IndexingError, IndexingResult};

// Re-export main orchestration types
pub use callback::CompletionCallback;
pub use pool::{
    PoolContext, PoolHealth, PoolSettings, Resolution, ShutdownHandle, SlotState, StopReport,
    WorkerPool,
};
pub use processor::{JobHandler, JobProcessor, ProcessorSettings};
pub use result::{ProcessingResult, ProcessingStatus};
pub use stage::{Stage, StageTracker};
