// Reconnect backoff: capped exponential growth with jitter and a hard floor

use rand::Rng;
use std::time::Duration;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    multiplier: f64,
    jitter: f64,
    failures: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Backoff {
            min: Duration::from_millis(config.min_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier,
            jitter: config.jitter,
            failures: 0,
        }
    }

    /// Consecutive failures since the last success
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Records a failure and returns how long to wait before the next attempt.
    /// The result is never below the configured minimum nor above the maximum.
    pub fn next_delay<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let exponent = self.failures.min(32) as i32;
        self.failures = self.failures.saturating_add(1);

        let base = (self.min.as_millis() as f64 * self.multiplier.powi(exponent))
            .min(self.max.as_millis() as f64);
        let spread = if self.jitter > 0.0 {
            rng.random_range(-self.jitter..=self.jitter)
        } else {
            0.0
        };
        let jittered = (base * (1.0 + spread)) as u64;

        Duration::from_millis(jittered).clamp(self.min, self.max)
    }
}
