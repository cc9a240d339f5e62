//! Rolling health statistics per directory, owned exclusively by the health
//! monitor (catalog entries themselves stay read-only after load).

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityBucket {
    Critical,
    High,
    Medium,
    Low,
}

/// Maps a composite priority score onto a scheduling/health bucket. Shared
/// by the scheduler's bucket queues and the health monitor's recheck cadence
/// — both partition directories the same way.
pub fn bucket_for(priority: f64) -> PriorityBucket {
    if priority >= 0.80 {
        PriorityBucket::Critical
    } else if priority >= 0.60 {
        PriorityBucket::High
    } else if priority >= 0.40 {
        PriorityBucket::Medium
    } else {
        PriorityBucket::Low
    }
}

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub ewma_alpha: f64,
    pub unhealthy_success_rate: f64,
    pub unhealthy_observation_count: u32,
    pub recovery_success_rate: f64,
    pub recovery_streak_required: u32,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.2,
            unhealthy_success_rate: 0.20,
            unhealthy_observation_count: 20,
            recovery_success_rate: 0.50,
            recovery_streak_required: 10,
        }
    }
}

fn default_recheck_interval(bucket: PriorityBucket) -> Duration {
    match bucket {
        PriorityBucket::Critical => Duration::from_secs(5 * 60),
        PriorityBucket::High => Duration::from_secs(15 * 60),
        PriorityBucket::Medium => Duration::from_secs(30 * 60),
        PriorityBucket::Low => Duration::from_secs(60 * 60),
    }
}

/// Recheck intervals adapt within ±40% of the bucket default: they stretch
/// under sustained failure (less point probing a directory that keeps
/// failing) and shrink back once observations start succeeding again.
fn bounded(interval: Duration, bucket: PriorityBucket) -> Duration {
    let default = default_recheck_interval(bucket);
    let low = default.mul_f64(0.6);
    let high = default.mul_f64(1.4);
    interval.clamp(low, high)
}

#[derive(Debug, Clone)]
struct HealthRecord {
    success_rate: f64,
    average_response_time_ms: f64,
    observations: u32,
    unhealthy: bool,
    recovery_streak: u32,
    bucket: PriorityBucket,
    recheck_interval: Duration,
    last_checked: Instant,
    /// Set by `tick()` once an unhealthy directory's recheck interval has
    /// elapsed; cleared by the next recorded outcome either way. Gives an
    /// unhealthy directory exactly one more chance to prove itself rather
    /// than excluding it from the catalog forever.
    eligible_for_probe: bool,
}

impl HealthRecord {
    fn seeded(success_rate: f64, average_response_time_ms: f64, bucket: PriorityBucket) -> Self {
        Self {
            success_rate,
            average_response_time_ms,
            observations: 0,
            unhealthy: false,
            recovery_streak: 0,
            bucket,
            recheck_interval: default_recheck_interval(bucket),
            last_checked: Instant::now(),
            eligible_for_probe: false,
        }
    }
}

/// EWMA-based health tracker. One record per `directory_id`, seeded from the
/// catalog's initial `success_rate`/`average_response_time_ms` and updated
/// after every attempt outcome.
pub struct HealthMonitor {
    config: HealthMonitorConfig,
    records: RwLock<HashMap<String, HealthRecord>>,
}

impl HealthMonitor {
    pub fn new(config: HealthMonitorConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn seed(&self, directory_id: &str, success_rate: f64, average_response_time_ms: f64, priority: f64) {
        let bucket = bucket_for(priority);
        let mut records = self.records.write().expect("health monitor lock poisoned");
        records
            .entry(directory_id.to_string())
            .or_insert_with(|| HealthRecord::seeded(success_rate, average_response_time_ms, bucket));
    }

    pub fn record_outcome(&self, directory_id: &str, succeeded: bool, response_time_ms: f64) {
        let mut records = self.records.write().expect("health monitor lock poisoned");
        let record = records
            .entry(directory_id.to_string())
            .or_insert_with(|| HealthRecord::seeded(0.5, response_time_ms, PriorityBucket::Medium));

        let alpha = self.config.ewma_alpha;
        let sample = if succeeded { 1.0 } else { 0.0 };
        record.success_rate = alpha * sample + (1.0 - alpha) * record.success_rate;
        record.average_response_time_ms = alpha * response_time_ms + (1.0 - alpha) * record.average_response_time_ms;
        record.observations += 1;
        record.last_checked = Instant::now();
        record.eligible_for_probe = false;

        record.recheck_interval = bounded(
            if succeeded {
                record.recheck_interval.mul_f64(0.9)
            } else {
                record.recheck_interval.mul_f64(1.2)
            },
            record.bucket,
        );

        if record.unhealthy {
            if record.success_rate >= self.config.recovery_success_rate {
                record.recovery_streak += 1;
                if record.recovery_streak >= self.config.recovery_streak_required {
                    record.unhealthy = false;
                    record.recovery_streak = 0;
                }
            } else {
                record.recovery_streak = 0;
            }
        } else if record.observations >= self.config.unhealthy_observation_count
            && record.success_rate < self.config.unhealthy_success_rate
        {
            record.unhealthy = true;
            record.recovery_streak = 0;
        }
    }

    pub fn is_unhealthy(&self, directory_id: &str) -> bool {
        self.records
            .read()
            .expect("health monitor lock poisoned")
            .get(directory_id)
            .map(|r| r.unhealthy && !r.eligible_for_probe)
            .unwrap_or(false)
    }

    pub fn success_rate(&self, directory_id: &str) -> Option<f64> {
        self.records
            .read()
            .expect("health monitor lock poisoned")
            .get(directory_id)
            .map(|r| r.success_rate)
    }

    pub fn average_response_time_ms(&self, directory_id: &str) -> Option<f64> {
        self.records
            .read()
            .expect("health monitor lock poisoned")
            .get(directory_id)
            .map(|r| r.average_response_time_ms)
    }

    /// Scans every unhealthy directory and opens a probe window for the ones
    /// whose adaptive recheck interval has elapsed since their last outcome.
    /// Meant to be driven by a periodic background task, not called inline
    /// from the selection path.
    pub fn tick(&self) {
        let mut records = self.records.write().expect("health monitor lock poisoned");
        let now = Instant::now();
        for record in records.values_mut() {
            if record.unhealthy && !record.eligible_for_probe && now.duration_since(record.last_checked) >= record.recheck_interval {
                record.eligible_for_probe = true;
            }
        }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new(HealthMonitorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_for_matches_priority_thresholds() {
        assert_eq!(bucket_for(0.95), PriorityBucket::Critical);
        assert_eq!(bucket_for(0.80), PriorityBucket::Critical);
        assert_eq!(bucket_for(0.79), PriorityBucket::High);
        assert_eq!(bucket_for(0.60), PriorityBucket::High);
        assert_eq!(bucket_for(0.40), PriorityBucket::Medium);
        assert_eq!(bucket_for(0.39), PriorityBucket::Low);
    }

    #[test]
    fn seed_only_applies_once() {
        let monitor = HealthMonitor::default();
        monitor.seed("dir-1", 0.9, 100.0, 0.5);
        monitor.seed("dir-1", 0.1, 9999.0, 0.5);
        assert_eq!(monitor.success_rate("dir-1"), Some(0.9));
    }

    #[test]
    fn twenty_failing_observations_mark_directory_unhealthy() {
        let monitor = HealthMonitor::default();
        monitor.seed("dir-1", 0.8, 200.0, 0.5);
        for _ in 0..19 {
            monitor.record_outcome("dir-1", false, 200.0);
        }
        assert!(!monitor.is_unhealthy("dir-1"), "should not flip before the observation floor");
        monitor.record_outcome("dir-1", false, 200.0);
        assert!(monitor.is_unhealthy("dir-1"));
    }

    #[test]
    fn recovery_requires_a_sustained_streak_not_a_single_sample() {
        let monitor = HealthMonitor::default();
        monitor.seed("dir-1", 0.8, 200.0, 0.5);
        for _ in 0..20 {
            monitor.record_outcome("dir-1", false, 200.0);
        }
        assert!(monitor.is_unhealthy("dir-1"));

        for _ in 0..9 {
            monitor.record_outcome("dir-1", true, 200.0);
        }
        assert!(monitor.is_unhealthy("dir-1"), "one sample under the streak requirement must not clear it");

        monitor.record_outcome("dir-1", true, 200.0);
        assert!(!monitor.is_unhealthy("dir-1"));
    }

    #[test]
    fn a_single_failure_mid_streak_resets_the_recovery_counter() {
        let monitor = HealthMonitor::default();
        monitor.seed("dir-1", 0.8, 200.0, 0.5);
        for _ in 0..20 {
            monitor.record_outcome("dir-1", false, 200.0);
        }
        for _ in 0..9 {
            monitor.record_outcome("dir-1", true, 200.0);
        }
        monitor.record_outcome("dir-1", false, 200.0);
        for _ in 0..9 {
            monitor.record_outcome("dir-1", true, 200.0);
        }
        assert!(monitor.is_unhealthy("dir-1"), "recovery streak must restart after an intervening failure");
    }

    #[test]
    fn tick_opens_a_probe_window_once_the_recheck_interval_elapses() {
        let monitor = HealthMonitor::default();
        monitor.seed("dir-1", 0.8, 200.0, 0.9); // critical bucket, 5 minute default
        for _ in 0..20 {
            monitor.record_outcome("dir-1", false, 200.0);
        }
        assert!(monitor.is_unhealthy("dir-1"));

        monitor.tick();
        assert!(monitor.is_unhealthy("dir-1"), "interval has not elapsed yet");
    }

    #[test]
    fn unknown_directory_has_no_recorded_health() {
        let monitor = HealthMonitor::default();
        assert_eq!(monitor.success_rate("nonexistent"), None);
        assert!(!monitor.is_unhealthy("nonexistent"));
    }
}
