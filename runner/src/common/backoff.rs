//! Jittered exponential backoff shared by the control-plane client, the
//! progress reporter, and the per-attempt retry policy.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with uniform jitter: `min(base * 2^(attempt-1), cap)`,
/// plus a uniform random fraction of that value.
///
/// `attempt` is 1-indexed (the first retry is `attempt = 1`).
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub jitter_fraction: f64,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration, jitter_fraction: f64) -> Self {
        Self {
            base,
            cap,
            jitter_fraction,
        }
    }

    /// Control-plane / progress-reporter retries: base 500ms, cap 30s, 25% jitter.
    pub const fn api_call() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), 0.25)
    }

    /// Per-attempt retry delay: base 5s, cap 60s, 10% jitter.
    pub const fn attempt_retry() -> Self {
        Self::new(Duration::from_millis(5000), Duration::from_secs(60), 0.10)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let unjittered = self.base.saturating_mul(exp as u32).min(self.cap);
        let jitter_max = unjittered.mul_f64(self.jitter_fraction);
        if jitter_max.is_zero() {
            return unjittered;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_max.as_millis() as u64);
        unjittered + Duration::from_millis(jitter_ms)
    }
}
