//! Pipeline stages and the tracker that reports transitions
//!
//! Every transition is a structured `info` event carrying the delivery id,
//! context id and attempt, so one job can be followed through the logs.

use std::fmt;
use std::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validate,
    Workdir,
    SourceFetch,
    Chunking,
    Embeddings,
    VectorStore,
    Finalize,
}

impl Stage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "Validate",
            Self::Workdir => "Workdir",
            Self::SourceFetch => "SourceFetch",
            Self::Chunking => "Chunking",
            Self::Embeddings => "Embeddings",
            Self::VectorStore => "VectorStore",
            Self::Finalize => "Finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records the current stage of one job and logs each transition
#[derive(Debug)]
pub struct StageTracker {
    job_id: Uuid,
    context_id: String,
    attempt: u32,
    current: Stage,
    entered_at: Instant,
}

impl StageTracker {
    pub fn new(job_id: Uuid, attempt: u32) -> Self {
        let tracker = Self {
            job_id,
            context_id: String::new(),
            attempt,
            current: Stage::Validate,
            entered_at: Instant::now(),
        };
        tracker.emit(None);
        tracker
    }

    /// Context id becomes known after validation
    pub fn set_context(&mut self, context_id: &str) {
        context_id.clone_into(&mut self.context_id);
    }

    pub const fn current(&self) -> Stage {
        self.current
    }

    pub fn enter(&mut self, stage: Stage) {
        let previous = self.current;
        let elapsed_ms = self.elapsed_ms();
        self.current = stage;
        self.entered_at = Instant::now();
        self.emit(Some((previous, elapsed_ms)));
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.entered_at.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn emit(&self, previous: Option<(Stage, u64)>) {
        match previous {
            Some((previous, previous_ms)) => tracing::info!(
                job_id = %self.job_id,
                context_id = %self.context_id,
                attempt = self.attempt,
                stage = %self.current,
                previous_stage = %previous,
                previous_stage_ms = previous_ms,
                "Job stage"
            ),
            None => tracing::info!(
                job_id = %self.job_id,
                attempt = self.attempt,
                stage = %self.current,
                "Job stage"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_follows_transitions() {
        let mut tracker = StageTracker::new(Uuid::nil(), 1);
        assert_eq!(tracker.current(), Stage::Validate);

        tracker.set_context("ctx-1");
        tracker.enter(Stage::Workdir);
        tracker.enter(Stage::SourceFetch);
        assert_eq!(tracker.current(), Stage::SourceFetch);
        assert_eq!(tracker.context_id, "ctx-1");
    }
}
