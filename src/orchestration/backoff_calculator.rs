//! # Backoff Calculator
//!
//! Exponential backoff between step retry attempts: `base * multiplier^(n-1)`, capped
//! at `max_delay`, with optional proportional jitter to avoid synchronized retries
//! against the same service.

use crate::config::BackoffConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    config: BackoffConfig,
}

impl BackoffCalculator {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before the retry that follows `attempts_made` failed attempts (1-based)
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        let delay = self.base_delay_for_attempt(attempts_made);
        if !self.config.jitter_enabled || self.config.max_jitter <= 0.0 {
            return delay;
        }

        let jitter = delay.mul_f64(self.config.max_jitter * fastrand::f64());
        (delay + jitter).min(self.config.max_delay())
    }

    /// Deterministic component of the delay
    pub fn base_delay_for_attempt(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1).min(32) as i32;
        let factor = self.config.multiplier.powi(exponent);
        let max_delay = self.config.max_delay();

        let scaled = self.config.base_delay().as_secs_f64() * factor;
        if !scaled.is_finite() || scaled >= max_delay.as_secs_f64() {
            return max_delay;
        }
        Duration::from_secs_f64(scaled)
    }
}
