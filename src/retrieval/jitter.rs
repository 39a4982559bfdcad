//! Exponential backoff with full jitter
//!
//! Each delay is drawn uniformly from `[0, min(max_delay, base * factor^attempt)]`.
//! Attempt counting (and giving up) is the retry loop's job, so this backoff
//! never runs dry on its own.

use backoff::backoff::Backoff;
use rand::Rng;
use std::time::Duration;

/// Full-jitter backoff usable with `backoff::future::retry`
#[derive(Debug, Clone)]
pub struct FullJitterBackoff {
    base_delay: Duration,
    max_delay: Duration,
    factor: f64,
    attempt: u32,
}

impl FullJitterBackoff {
    pub fn new(base_delay: Duration, max_delay: Duration, factor: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            factor: factor.max(1.0),
            attempt: 0,
        }
    }

    /// Upper bound of the jitter window for a given attempt (0-based)
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_millis() as f64;
        let exp = self.base_delay.as_millis() as f64 * self.factor.powi(attempt.min(64) as i32);
        // powi can overflow to inf, min() keeps it finite
        Duration::from_millis(exp.min(max_ms) as u64)
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Backoff for FullJitterBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        let ceiling = self.ceiling(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let ms = rand::thread_rng().gen_range(0..=ceiling.as_millis() as u64);
        Some(Duration::from_millis(ms))
    }
}
