//! Errors for the queue and context tables
//!
//! Every database failure carries the operation it happened in and, when the
//! caller has one, the correlation id of the job being processed.

use std::fmt;
use thiserror::Error;
use uuid::Uuid;

pub type DatabaseResult<T> = std::result::Result<T, DatabaseError>;

/// Result type alias for queue operations
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Which queue or store call was running when the database failed
#[derive(Debug, Clone)]
pub enum DatabaseOperation {
    /// Queue operations
    Enqueue {
        job_type: String,
    },
    Claim {
        max_batch: usize,
    },
    Ack {
        job_id: Uuid,
    },
    Nack {
        job_id: Uuid,
    },
    ExtendLease {
        job_id: Uuid,
    },
    DeadLetter {
        job_id: Uuid,
    },
    RecordStage {
        job_id: Uuid,
        stage: String,
    },
    QueueDepth,
    InFlight,

    /// Context store operations
    ReplaceContext {
        context_id: String,
        chunk_count: usize,
    },
    LoadContextState {
        context_id: String,
    },
    MarkContextStatus {
        context_id: String,
        status: String,
    },
    LoadChunkHashes {
        context_id: String,
    },
    LoadAuthScope {
        user_id: String,
    },

    /// Generic operations
    Query {
        description: String,
    },
    Transaction {
        description: String,
    },
    Migration,
}

impl fmt::Display for DatabaseOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enqueue { job_type } => write!(f, "enqueue(job_type={job_type})"),
            Self::Claim { max_batch } => write!(f, "claim(max_batch={max_batch})"),
            Self::Ack { job_id } => write!(f, "ack(job_id={job_id})"),
            Self::Nack { job_id } => write!(f, "nack(job_id={job_id})"),
            Self::ExtendLease { job_id } => write!(f, "extend_lease(job_id={job_id})"),
            Self::DeadLetter { job_id } => write!(f, "dead_letter(job_id={job_id})"),
            Self::RecordStage { job_id, stage } => {
                write!(f, "record_stage(job_id={job_id}, stage={stage})")
            }
            Self::QueueDepth => write!(f, "queue_depth"),
            Self::InFlight => write!(f, "in_flight"),

            Self::ReplaceContext {
                context_id,
                chunk_count,
            } => write!(
                f,
                "replace_context(context={context_id}, count={chunk_count})"
            ),
            Self::LoadContextState { context_id } => {
                write!(f, "load_context_state(context={context_id})")
            }
            Self::MarkContextStatus { context_id, status } => write!(
                f,
                "mark_context_status(context={context_id}, status={status})"
            ),
            Self::LoadChunkHashes { context_id } => {
                write!(f, "load_chunk_hashes(context={context_id})")
            }
            Self::LoadAuthScope { user_id } => write!(f, "load_auth_scope(user={user_id})"),

            Self::Query { description } => write!(f, "query({description})"),
            Self::Transaction { description } => write!(f, "transaction({description})"),
            Self::Migration => write!(f, "migration"),
        }
    }
}

/// Database failure tagged with the operation that caused it
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Database connection error
    #[error("Database connection failed: {message} (correlation_id={correlation_id:?})")]
    ConnectionFailed {
        message: String,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Query timeout
    #[error(
        "Query timeout for operation '{operation}' (correlation_id={correlation_id:?})"
    )]
    QueryTimeout {
        operation: Box<DatabaseOperation>,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Query execution error
    #[error(
        "Query failed for operation '{operation}': {message} (correlation_id={correlation_id:?})"
    )]
    QueryFailed {
        operation: Box<DatabaseOperation>,
        message: String,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Constraint violation
    #[error(
        "Database constraint violation in table '{table}': {constraint} (operation='{operation}', correlation_id={correlation_id:?})"
    )]
    ConstraintViolation {
        table: String,
        constraint: String,
        operation: Box<DatabaseOperation>,
        correlation_id: Option<String>,
        #[source]
        source: sqlx::Error,
    },

    /// Data integrity error
    #[error(
        "Data integrity error: {message} (operation='{operation}', correlation_id={correlation_id:?})"
    )]
    DataIntegrityError {
        operation: Box<DatabaseOperation>,
        message: String,
        correlation_id: Option<String>,
    },

    /// Migration error
    #[error("Database migration failed: {message}")]
    MigrationFailed {
        message: String,
        #[source]
        source: sqlx::migrate::MigrateError,
    },
}

impl DatabaseError {
    /// Classify a `sqlx::Error` into timeout, constraint or plain query failure
    pub fn query_failed(
        operation: DatabaseOperation,
        source: sqlx::Error,
        correlation_id: Option<String>,
    ) -> Self {
        let message = source.to_string();

        if matches!(
            source,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        ) {
            return Self::ConnectionFailed {
                message,
                correlation_id,
                source,
            };
        }

        if let Some(db_err) = source.as_database_error() {
            if let Some(constraint) = db_err.constraint() {
                let table = db_err
                    .table()
                    .map(String::from)
                    .or_else(|| Self::extract_table_from_constraint(constraint))
                    .unwrap_or_else(|| "unknown".to_string());

                return Self::ConstraintViolation {
                    table,
                    constraint: constraint.to_string(),
                    operation: Box::new(operation),
                    correlation_id,
                    source,
                };
            }
        }

        if message.contains("timeout") || message.contains("timed out") {
            return Self::QueryTimeout {
                operation: Box::new(operation),
                correlation_id,
                source,
            };
        }

        Self::QueryFailed {
            operation: Box::new(operation),
            message,
            correlation_id,
            source,
        }
    }

    /// Create a data integrity error for rows that cannot be decoded or violate an invariant
    pub fn integrity(
        operation: DatabaseOperation,
        message: impl Into<String>,
        correlation_id: Option<String>,
    ) -> Self {
        Self::DataIntegrityError {
            operation: Box::new(operation),
            message: message.into(),
            correlation_id,
        }
    }

    /// Attach the job's correlation id after the fact
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        match &mut self {
            Self::ConnectionFailed {
                correlation_id: id, ..
            }
            | Self::QueryTimeout {
                correlation_id: id, ..
            }
            | Self::QueryFailed {
                correlation_id: id, ..
            }
            | Self::ConstraintViolation {
                correlation_id: id, ..
            }
            | Self::DataIntegrityError {
                correlation_id: id, ..
            } => {
                *id = Some(correlation_id);
            }
            Self::MigrationFailed { .. } => {}
        }
        self
    }

        pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailed { correlation_id, .. }
            | Self::QueryTimeout { correlation_id, .. }
            | Self::QueryFailed { correlation_id, .. }
            | Self::ConstraintViolation { correlation_id, .. }
            | Self::DataIntegrityError { correlation_id, .. } => correlation_id.as_deref(),
            Self::MigrationFailed { .. } => None,
        }
    }

    /// Whether retrying the same operation later can succeed
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::QueryTimeout { .. } | Self::QueryFailed { .. }
        )
    }

    /// Leading `table_` segment of a constraint name
    fn extract_table_from_constraint(constraint: &str) -> Option<String> {
        constraint.split('_').next().map(String::from)
    }
}

/// `map_db_err` for sqlx results
#[allow(clippy::result_large_err)]
pub trait DatabaseErrorExt<T> {
    /// Wrap the sqlx error in a `DatabaseError` for `operation`
    ///
    /// # Errors
    /// Returns the classified `DatabaseError`
    fn map_db_err(
        self,
        operation: DatabaseOperation,
        correlation_id: Option<String>,
    ) -> DatabaseResult<T>;
}

impl<T> DatabaseErrorExt<T> for std::result::Result<T, sqlx::Error> {
    fn map_db_err(
        self,
        operation: DatabaseOperation,
        correlation_id: Option<String>,
    ) -> DatabaseResult<T> {
        self.map_err(|e| DatabaseError::query_failed(operation, e, correlation_id))
    }
}

/// Errors surfaced by [`crate::queue::JobQueue`] implementations
#[derive(Debug, Error)]
pub enum QueueError {
    /// The delivery id is unknown: already acked, dead-lettered, or superseded by a re-claim
    #[error("Job delivery {job_id} not found (acked, dead-lettered or re-claimed)")]
    NotFound { job_id: Uuid },

    /// Arguments the queue cannot act on
    #[error("Invalid queue request: {message}")]
    InvalidRequest { message: String },

    /// Payload could not be encoded for storage
    #[error("Failed to serialize job payload: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing store failure
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl QueueError {
    pub const fn not_found(job_id: Uuid) -> Self {
        Self::NotFound { job_id }
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
