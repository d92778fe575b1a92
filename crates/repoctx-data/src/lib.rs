//! repoctx data layer: job queue and `PostgreSQL` state management

pub mod error;
pub mod memory_queue;
pub mod migrations;
pub mod models;
pub mod postgres_queue;
pub mod queue;

pub use error::{
    DatabaseError, DatabaseErrorExt, DatabaseOperation, DatabaseResult, QueueError, QueueResult,
};
pub use memory_queue::{EntryStatus, InMemoryJobQueue, JobSnapshot};
pub use migrations::{connect_with_retry, run_migrations};
pub use models::{
    ClaimedJob, ConfigOverrides, DeadLetteredJob, GitProviderKind, GitToken, GitTokenRef,
    InFlightJob, JobEnvelope, JobPayload, JobSpec, JobType, NewJob, PayloadError, QueueDepth,
};
pub use postgres_queue::PostgresJobQueue;
pub use queue::JobQueue;
