//! Outcome of processing one job

use crate::error::ErrorSummary;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Terminal status of one processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Succeeded,
    Partial,
    Failed,
}

impl ProcessingStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one attempt produced
///
/// `error_summary` is present exactly when `status` is not `Succeeded`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub context_id: String,
    pub status: ProcessingStatus,
    pub chunks_written: usize,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub commit_sha: Option<String>,
    /// The context was already complete at this commit and nothing was rewritten
    pub unchanged: bool,
    pub error_summary: Option<ErrorSummary>,
    pub completed_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl ProcessingResult {
    fn base(context_id: String, status: ProcessingStatus, elapsed: Duration) -> Self {
        Self {
            context_id,
            status,
            chunks_written: 0,
            files_processed: 0,
            files_skipped: 0,
            files_failed: 0,
            commit_sha: None,
            unchanged: false,
            error_summary: None,
            completed_at: Utc::now(),
            elapsed,
        }
    }

    pub fn succeeded(context_id: impl Into<String>, chunks_written: usize, elapsed: Duration) -> Self {
        Self {
            chunks_written,
            ..Self::base(context_id.into(), ProcessingStatus::Succeeded, elapsed)
        }
    }

    pub fn partial(
        context_id: impl Into<String>,
        chunks_written: usize,
        summary: ErrorSummary,
        elapsed: Duration,
    ) -> Self {
        Self {
            chunks_written,
            error_summary: Some(summary),
            ..Self::base(context_id.into(), ProcessingStatus::Partial, elapsed)
        }
    }

    pub fn failed(context_id: impl Into<String>, summary: ErrorSummary, elapsed: Duration) -> Self {
        Self {
            error_summary: Some(summary),
            ..Self::base(context_id.into(), ProcessingStatus::Failed, elapsed)
        }
    }

    /// Attach file counters from the enumeration stage
    #[must_use]
    pub const fn with_files(mut self, processed: usize, skipped: usize, failed: usize) -> Self {
        self.files_processed = processed;
        self.files_skipped = skipped;
        self.files_failed = failed;
        self
    }

    #[must_use]
    pub fn with_commit(mut self, commit_sha: Option<String>) -> Self {
        self.commit_sha = commit_sha;
        self
    }

    #[must_use]
    pub const fn unchanged(mut self) -> Self {
        self.unchanged = true;
        self
    }

    /// Whether the job should be acked
    pub const fn is_success(&self) -> bool {
        matches!(
            self.status,
            ProcessingStatus::Succeeded | ProcessingStatus::Partial
        )
    }

    /// A failure that a later attempt may fix
    pub fn is_retryable_failure(&self) -> bool {
        self.status == ProcessingStatus::Failed
            && self.error_summary.as_ref().is_some_and(|s| s.retryable)
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }
}
