//! Retry classification and per-directory circuit breaking.
//!
//! The shapes here (closed/open/half-open, a registry keyed by operation
//! name) follow the retry/breaker pairing used throughout delivery-style
//! processors; the classification rule itself is substring-based to match
//! the error strings the submission driver and control-plane client
//! actually produce.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::common::Backoff;

/// Buckets an error string into a retry decision. Matching is substring
/// based and case-insensitive, the same coarse classification style used
/// to route storage/network errors through a retry chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::attempt_retry(),
        }
    }
}

impl RetryPolicy {
    pub fn classify(reason: &str) -> ErrorClass {
        let lower = reason.to_lowercase();
        const PERMANENT_MARKERS: &[&str] = &[
            "requires_login",
            "captcha",
            "validation",
            "not_found",
            "forbidden",
            "unsupported",
        ];
        if PERMANENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
            ErrorClass::Permanent
        } else {
            ErrorClass::Transient
        }
    }

    pub fn should_retry(&self, attempt: u32, reason: &str) -> bool {
        attempt < self.max_attempts && Self::classify(reason) == ErrorClass::Transient
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub half_open_trial_count: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
            half_open_trial_count: 1,
        }
    }
}

struct BreakerSlot {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_trials: u32,
}

impl BreakerSlot {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_trials: 0,
        }
    }
}

/// Circuit breaker registry keyed by operation name, not by directory: one
/// breaker for submission, one per advisor, one per control-plane call —
/// each process-wide and independent of the others. Slots are created
/// lazily on first use of a given key.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    slots: Mutex<HashMap<String, BreakerSlot>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a call against `key` is currently allowed. Transitions an
    /// expired `Open` breaker into `HalfOpen` as a side effect.
    pub fn allow(&self, key: &str) -> bool {
        let mut slots = self.slots.lock().expect("circuit breaker mutex poisoned");
        let slot = slots.entry(key.to_string()).or_insert_with(BreakerSlot::new);

        match slot.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => slot.half_open_trials < self.config.half_open_trial_count,
            BreakerState::Open => {
                let elapsed = slot.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.config.open_duration {
                    slot.state = BreakerState::HalfOpen;
                    slot.half_open_trials = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self, key: &str) {
        let mut slots = self.slots.lock().expect("circuit breaker mutex poisoned");
        let slot = slots.entry(key.to_string()).or_insert_with(BreakerSlot::new);
        slot.consecutive_failures = 0;
        slot.state = BreakerState::Closed;
        slot.opened_at = None;
        slot.half_open_trials = 0;
    }

    pub fn record_failure(&self, key: &str) {
        let mut slots = self.slots.lock().expect("circuit breaker mutex poisoned");
        let slot = slots.entry(key.to_string()).or_insert_with(BreakerSlot::new);

        match slot.state {
            BreakerState::HalfOpen => {
                slot.half_open_trials += 1;
                slot.state = BreakerState::Open;
                slot.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                slot.consecutive_failures += 1;
                if slot.consecutive_failures >= self.config.failure_threshold {
                    slot.state = BreakerState::Open;
                    slot.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }

    pub fn state_of(&self, key: &str) -> BreakerState {
        let mut slots = self.slots.lock().expect("circuit breaker mutex poisoned");
        slots.entry(key.to_string()).or_insert_with(BreakerSlot::new).state
    }
}
