use std::time::Duration;

use rand::Rng;

/// How long the SSE driver waits between attempts.
///
/// Attempt `n` waits `initial_delay * factor^n`, capped at `max_delay`, then
/// shortened by up to `jitter` of that amount.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RetrySchedule {
    pub(crate) initial_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) factor: f64,
    pub(crate) jitter: f64,
}

impl RetrySchedule {
    pub(crate) fn check(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Reconnect initial delay is zero".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Reconnect max delay is below the initial delay".to_string());
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err("Reconnect backoff factor must be finite and at least 1.0".to_string());
        }
        if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
            return Err("Reconnect jitter must be a fraction in 0.0..=1.0".to_string());
        }
        Ok(())
    }

    /// Upper bound of the wait before retry `attempt` (zero-based).
    fn ceiling(&self, attempt: u32) -> f64 {
        let grown = self.initial_delay.as_secs_f64() * self.factor.powf(f64::from(attempt));
        grown.min(self.max_delay.as_secs_f64())
    }

    /// Wait before retry `attempt` (zero-based).
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        let spread = ceiling * self.jitter;
        if spread <= 0.0 {
            return Duration::from_secs_f64(ceiling);
        }
        let cut = rand::rng().random_range(0.0..=spread);
        Duration::from_secs_f64(ceiling - cut)
    }
}
