//! Bounded-concurrency scheduler: claims a job's directory slate, runs
//! submissions across priority buckets with retrying, circuit-broken
//! attempts and per-directory politeness delays, and hands results to the
//! progress state.
//!
//! The worker-set/heartbeat/cooperative-cancellation shape follows a
//! common job-worker poll-loop pattern: a `CancellationToken` per running
//! unit of work, tracked in a shared map so a shutdown can cancel everything
//! that is still in flight and wait a bounded amount of time for it to
//! unwind.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::directory::{DirectoryDescriptor, FormMapping};
use super::health::{bucket_for, HealthMonitor, PriorityBucket};
use super::job::Job;
use super::progress::{JobProgressState, SubmissionAttempt};
use super::resilience::{CircuitBreakerRegistry, RetryPolicy};
use crate::kernel::traits::{DescriptionCustomizer, FormFieldMapper, SubmissionDriver, SuccessProbabilityOracle};

/// Every advisor call carries this deadline; an unresponsive advisor
/// degrades to its default rather than blocking the attempt.
const ADVISOR_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SchedulerConfig {
    pub max_concurrent_attempts: usize,
    pub attempt_timeout: Duration,
    pub dir_delay_min: Duration,
    pub dir_delay_max: Duration,
    pub ai_probability_threshold: f64,
    pub escalation_threshold: u32,
}

/// Runs the directory slate for a single job to completion, honoring the
/// shared `cancel` token for cooperative shutdown.
pub struct Scheduler {
    config: SchedulerConfig,
    driver: Arc<dyn SubmissionDriver>,
    oracle: Arc<dyn SuccessProbabilityOracle>,
    description_customizer: Arc<dyn DescriptionCustomizer>,
    form_field_mapper: Arc<dyn FormFieldMapper>,
    health: Arc<HealthMonitor>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry_policy: RetryPolicy,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        driver: Arc<dyn SubmissionDriver>,
        oracle: Arc<dyn SuccessProbabilityOracle>,
        description_customizer: Arc<dyn DescriptionCustomizer>,
        form_field_mapper: Arc<dyn FormFieldMapper>,
        health: Arc<HealthMonitor>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            config,
            driver,
            oracle,
            description_customizer,
            form_field_mapper,
            health,
            breakers,
            retry_policy,
        }
    }

    /// Runs every directory in `directories` against `job`, recording
    /// outcomes into `progress` as they complete. Strict priority order:
    /// every `Critical` directory is drained before `High` is touched, and
    /// so on, with bounded concurrency inside each bucket.
    pub async fn run_job(
        &self,
        job: &Job,
        directories: Vec<DirectoryDescriptor>,
        progress: Arc<Mutex<JobProgressState>>,
        cancel: CancellationToken,
        mut on_flush: impl FnMut(Vec<SubmissionAttempt>) + Send,
    ) {
        let mut buckets: HashMap<PriorityBucket, VecDeque<DirectoryDescriptor>> = HashMap::new();
        for descriptor in directories {
            buckets.entry(bucket_for(descriptor.priority)).or_default().push_back(descriptor);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_attempts.max(1)));

        for bucket in [PriorityBucket::Critical, PriorityBucket::High, PriorityBucket::Medium, PriorityBucket::Low] {
            let Some(queue) = buckets.remove(&bucket) else { continue };
            if cancel.is_cancelled() {
                break;
            }
            self.drain_bucket(job, queue, &semaphore, &progress, &cancel).await;

            let mut state = progress.lock().await;
            if state.buffer_full(10) {
                on_flush(state.drain_buffer());
            }
        }

        let mut state = progress.lock().await;
        let remaining = state.drain_buffer();
        if !remaining.is_empty() {
            on_flush(remaining);
        }
    }

    async fn drain_bucket(
        &self,
        job: &Job,
        queue: VecDeque<DirectoryDescriptor>,
        semaphore: &Arc<Semaphore>,
        progress: &Arc<Mutex<JobProgressState>>,
        cancel: &CancellationToken,
    ) {
        let mut handles = Vec::new();

        for descriptor in queue {
            if cancel.is_cancelled() {
                break;
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => permit.expect("semaphore closed"),
                _ = cancel.cancelled() => break,
            };

            let oracle = self.oracle.clone();
            let description_customizer = self.description_customizer.clone();
            let form_field_mapper = self.form_field_mapper.clone();
            let driver = self.driver.clone();
            let health = self.health.clone();
            let breakers = self.breakers.clone();
            let retry_policy = self.retry_policy.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            let job = job.clone();
            let threshold = self.config.ai_probability_threshold;
            let escalation_threshold = self.config.escalation_threshold;
            let attempt_timeout = self.config.attempt_timeout;
            let dir_delay_min = self.config.dir_delay_min;
            let dir_delay_max = self.config.dir_delay_max;

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let directory_id = descriptor.directory_id.clone();
                let directory_name = descriptor.name.clone();
                let escalation_eligible = descriptor.is_escalation_eligible(escalation_threshold);

                let probability = with_advisor_breaker(&breakers, "oracle", ADVISOR_TIMEOUT, 1.0, oracle.estimate(&descriptor, &job)).await;
                if probability < threshold && !escalation_eligible {
                    let mut state = progress.lock().await;
                    state.record(SubmissionAttempt::skipped(directory_id, directory_name, "low_probability"));
                    return;
                }

                let mut working_profile = job.profile.clone();
                let mut ai_customized = false;
                if let Some(original) = job.profile.description.clone() {
                    let customized = with_advisor_breaker(
                        &breakers,
                        "description_customizer",
                        ADVISOR_TIMEOUT,
                        original.clone(),
                        description_customizer.customize(&descriptor, &original),
                    )
                    .await;
                    ai_customized = customized != original;
                    working_profile.description = Some(customized);
                }

                let mut working_descriptor = descriptor.clone();
                if working_descriptor.form_mapping.is_empty() {
                    let mapped = with_advisor_breaker(
                        &breakers,
                        "form_field_mapper",
                        ADVISOR_TIMEOUT,
                        Vec::new(),
                        form_field_mapper.map_extra_fields(&descriptor, &working_profile),
                    )
                    .await;
                    if !mapped.is_empty() {
                        let mut form_mapping = FormMapping::new();
                        for (field, selector) in mapped {
                            form_mapping.entry(field).or_default().push(selector);
                        }
                        working_descriptor.form_mapping = form_mapping;
                    }
                }

                let mut ordinal = 1u32;
                loop {
                    if !breakers.allow("submit") {
                        let mut state = progress.lock().await;
                        state.record(SubmissionAttempt::skipped(directory_id.clone(), directory_name.clone(), "circuit_open"));
                        break;
                    }

                    let started = Instant::now();
                    let outcome = tokio::select! {
                        result = timeout(attempt_timeout, driver.submit(&working_descriptor, &working_profile)) => result,
                        _ = cancel.cancelled() => {
                            let mut state = progress.lock().await;
                            state.record(SubmissionAttempt::skipped(directory_id.clone(), directory_name.clone(), "cancelled"));
                            return;
                        }
                    };
                    let duration_ms = started.elapsed().as_millis() as u64;

                    let (succeeded, reason) = match outcome {
                        Err(_) => (false, "timeout".to_string()),
                        Ok(result) if result.succeeded => (true, String::new()),
                        Ok(result) => (false, result.reason_code.unwrap_or_else(|| "unknown".to_string())),
                    };

                    if succeeded {
                        breakers.record_success("submit");
                    } else {
                        breakers.record_failure("submit");
                    }
                    health.record_outcome(&directory_id, succeeded, duration_ms as f64);

                    let attempt = if succeeded {
                        SubmissionAttempt::succeeded(directory_id.clone(), directory_name.clone(), ordinal, duration_ms)
                    } else {
                        SubmissionAttempt::failed(directory_id.clone(), directory_name.clone(), ordinal, reason.clone(), duration_ms)
                    }
                    .with_ai_score(probability)
                    .with_ai_customized(ai_customized)
                    .with_via_alternate(escalation_eligible);

                    {
                        let mut state = progress.lock().await;
                        state.record(attempt);
                    }

                    if succeeded {
                        break;
                    }
                    if retry_policy.should_retry(ordinal, &reason) {
                        let delay = retry_policy.delay_for(ordinal);
                        tokio::time::sleep(delay).await;
                        ordinal += 1;
                        continue;
                    }
                    break;
                }

                politeness_delay(dir_delay_min, dir_delay_max).await;
            });

            handles.push(handle);
        }

        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "submission task panicked");
            }
        }
    }
}

/// Checks the named breaker before running `fut`; if the breaker is open the
/// call is skipped entirely and `default` stands in. A call that exceeds
/// `deadline` counts as a breaker failure and also falls back to `default` —
/// an unresponsive advisor degrades gracefully rather than blocking the
/// attempt.
async fn with_advisor_breaker<T>(
    breakers: &CircuitBreakerRegistry,
    key: &str,
    deadline: Duration,
    default: T,
    fut: impl Future<Output = T>,
) -> T {
    if !breakers.allow(key) {
        return default;
    }
    match timeout(deadline, fut).await {
        Ok(value) => {
            breakers.record_success(key);
            value
        }
        Err(_) => {
            breakers.record_failure(key);
            default
        }
    }
}

/// Sleeps a uniform-random duration in `[dir_delay_min, dir_delay_max]`
/// after an attempt completes, before the permit is released — spacing out
/// how often this worker hits any one directory, regardless of outcome.
async fn politeness_delay(dir_delay_min: Duration, dir_delay_max: Duration) {
    if dir_delay_max.is_zero() {
        return;
    }
    let min_ms = dir_delay_min.as_millis() as u64;
    let max_ms = dir_delay_max.as_millis() as u64;
    let delay_ms = if max_ms <= min_ms {
        max_ms
    } else {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    };
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}
