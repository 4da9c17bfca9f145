use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter for transient provider failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub factor: f64,
    pub cap: Duration,
    /// Total attempts including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            factor: 2.0,
            cap: Duration::from_secs(8),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the sleep before retry number `retry` (0-based).
    pub fn ceiling(&self, retry: u32) -> Duration {
        let exp = self.factor.powi(i32::try_from(retry).unwrap_or(i32::MAX));
        let millis = (self.initial.as_millis() as f64 * exp).min(self.cap.as_millis() as f64);
        Duration::from_millis(millis.max(0.0).round() as u64)
    }

    /// Sleep before retry number `retry`: uniformly drawn from half to all of the ceiling.
    pub fn delay(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry);
        let scale: f64 = rand::rng().random_range(0.5..=1.0);
        ceiling.mul_f64(scale)
    }
}
