//! Per-iteration retry accounting with exponential backoff.

use std::time::Duration;

use rand::Rng;

use crate::config::AgentConfig;

/// Delay before retrying after the n-th consecutive failure (1-indexed):
/// `initial · 2^n` seconds plus up to one second of jitter.
pub fn backoff_delay(initial_secs: f64, failure_count: u32) -> Duration {
    let jitter: f64 = rand::thread_rng().gen();
    Duration::from_secs_f64(initial_secs * 2f64.powi(failure_count as i32) + jitter)
}

/// Counts transient failures within one iteration. Reset when an attempt
/// succeeds or a new iteration starts.
pub struct RetryController {
    max_retries: u32,
    initial_backoff_secs: f64,
    failures: u32,
}

impl RetryController {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff_secs: config.initial_backoff_secs,
            failures: 0,
        }
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Record one transient failure. Returns the delay to sleep before the
    /// next attempt, or `None` when the failure budget is spent.
    pub fn note_failure(&mut self) -> Option<Duration> {
        self.failures += 1;
        if self.failures >= self.max_retries {
            return None;
        }
        Some(backoff_delay(self.initial_backoff_secs, self.failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_with_bounded_jitter() {
        for n in 1..=4u32 {
            let base = 1.5 * 2f64.powi(n as i32);
            for _ in 0..20 {
                let delay = backoff_delay(1.5, n).as_secs_f64();
                assert!(delay >= base, "delay {delay} below base {base}");
                assert!(delay < base + 1.0, "delay {delay} exceeds base {base} + 1");
            }
        }
    }

    #[test]
    fn third_failure_exhausts_the_budget() {
        let mut retry = RetryController::new(&AgentConfig::default());
        assert!(retry.note_failure().is_some());
        assert!(retry.note_failure().is_some());
        assert!(retry.note_failure().is_none());
        assert_eq!(retry.failures(), 3);
    }

    #[test]
    fn reset_restores_the_budget() {
        let mut retry = RetryController::new(&AgentConfig::default());
        retry.note_failure();
        retry.note_failure();
        retry.reset();
        assert_eq!(retry.failures(), 0);
        assert!(retry.note_failure().is_some());
    }

    #[test]
    fn delays_grow_between_consecutive_failures() {
        let mut retry = RetryController::new(&AgentConfig::default());
        let first = retry.note_failure().unwrap().as_secs_f64();
        let second = retry.note_failure().unwrap().as_secs_f64();
        // first ∈ [2, 3), second ∈ [4, 5)
        assert!(second > first);
    }
}
