//! Exponential backoff with jitter for instance start retries
//!
//! The reconciler retries failed starts across passes rather than in a
//! closure loop, so this exposes the delay computation directly: the worker
//! records when the next attempt is allowed and skips creation until then.

use rand::Rng;
use std::time::Duration;

/// Delay policy for retrying failed instance starts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Cap on the computed delay, before jitter.
    pub max_delay: Duration,
    /// Exponential growth factor per attempt.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay to wait after the given failure count. `attempt` is 1-based:
    /// attempt 1 waits around `initial_delay`. Jitter is 0.5x to 1.5x to
    /// avoid synchronized retries across workloads.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let base = (self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent as i32))
            .min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        Duration::from_secs_f64(base * jitter)
    }
}
