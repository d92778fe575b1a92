//! Exponential backoff with jitter
//!
//! `delay_for(n)` is `base * 2^(n-1)` plus up to `jitter` of that value,
//! clamped to `cap`. The result is never below `base`.

use std::time::Duration;

/// Default jitter fraction applied on top of the exponential delay
pub const DEFAULT_JITTER: f64 = 0.25;

/// Backoff schedule shared by job-level and batch-level retries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: f64,
}

impl Backoff {
    /// Create a schedule; a `cap` below `base` is raised to `base`
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
            jitter: DEFAULT_JITTER,
        }
    }

    /// Override the jitter fraction (clamped to `0.0..=1.0`)
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Deterministic schedule, used by tests and by callers that need exact delays
    #[must_use]
    pub fn without_jitter(self) -> Self {
        self.with_jitter(0.0)
    }

    pub const fn base(&self) -> Duration {
        self.base
    }

    pub const fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before retry number `attempt` (1-based; 0 is treated as 1)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        let exponential = self.base.saturating_mul(factor).min(self.cap);

        if self.jitter <= 0.0 {
            return exponential;
        }

        let spread = exponential.as_secs_f64() * self.jitter * rand::random::<f64>();
        let jittered = exponential.saturating_add(Duration::from_secs_f64(spread));
        jittered.min(self.cap).max(self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_growth_without_jitter() {
        let backoff =
            Backoff::new(Duration::from_secs(2), Duration::from_secs(60)).without_jitter();

        assert_eq!(backoff.delay_for(1), Duration::from_secs(2));
        assert_eq!(backoff.delay_for(2), Duration::from_secs(4));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(10), Duration::from_secs(60));
    }

    #[test]
    fn test_attempt_zero_behaves_like_first_attempt() {
        let backoff =
            Backoff::new(Duration::from_millis(100), Duration::from_secs(1)).without_jitter();
        assert_eq!(backoff.delay_for(0), backoff.delay_for(1));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let backoff = Backoff::new(Duration::from_secs(30), Duration::from_secs(900));
        for attempt in 1..=12 {
            let delay = backoff.delay_for(attempt);
            assert!(delay >= Duration::from_secs(30), "attempt {attempt}: {delay:?}");
            assert!(delay <= Duration::from_secs(900), "attempt {attempt}: {delay:?}");
        }
    }

    #[test]
    fn test_cap_below_base_is_raised() {
        let backoff = Backoff::new(Duration::from_secs(10), Duration::from_secs(1));
        assert_eq!(backoff.cap(), Duration::from_secs(10));
        assert_eq!(backoff.delay_for(5), Duration::from_secs(10));
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let backoff =
            Backoff::new(Duration::from_secs(1), Duration::from_secs(3600)).without_jitter();
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_secs(3600));
    }
}
