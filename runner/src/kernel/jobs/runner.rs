//! Top-level poll loop: claims jobs from the control plane, runs their
//! directory slate through the scheduler, and reports progress and
//! completion. Follows a claim-process-heartbeat-shutdown shape, minus a
//! local database: the control plane is the source of truth here instead
//! of a local job-store table.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::kernel::control_plane::{ControlPlaneClient, JobSummary};
use crate::kernel::jobs::catalog::DirectoryCatalog;
use crate::kernel::jobs::health::{HealthMonitor, HealthMonitorConfig};
use crate::kernel::jobs::job::Job;
use crate::kernel::jobs::progress::JobProgressState;
use crate::kernel::jobs::reporter::ProgressReporter;
use crate::kernel::jobs::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, RetryPolicy};
use crate::kernel::jobs::scheduler::{Scheduler, SchedulerConfig};
use crate::kernel::traits::{DescriptionCustomizer, FormFieldMapper, SubmissionDriver, SuccessProbabilityOracle};

/// How often the health monitor scans for unhealthy directories whose
/// adaptive recheck interval has elapsed, independent of any job running.
const HEALTH_TICK_INTERVAL: Duration = Duration::from_secs(60);

pub struct JobRunnerConfig {
    pub worker_id: String,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub scheduler: SchedulerConfig,
    pub health: HealthMonitorConfig,
    pub retry_policy: RetryPolicy,
}

/// Owns the poll loop for one worker process. Seeds directory health from
/// the catalog once at startup, then loops: ask the control plane for work,
/// run it, report it, repeat — until `shutdown` is cancelled.
pub struct JobRunner {
    config: JobRunnerConfig,
    control_plane: Arc<ControlPlaneClient>,
    catalog: Arc<DirectoryCatalog>,
    health: Arc<HealthMonitor>,
    breakers: Arc<CircuitBreakerRegistry>,
    driver: Arc<dyn SubmissionDriver>,
    oracle: Arc<dyn SuccessProbabilityOracle>,
    description_customizer: Arc<dyn DescriptionCustomizer>,
    form_field_mapper: Arc<dyn FormFieldMapper>,
    reporter: Arc<ProgressReporter>,
}

impl JobRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: JobRunnerConfig,
        control_plane: Arc<ControlPlaneClient>,
        catalog: Arc<DirectoryCatalog>,
        driver: Arc<dyn SubmissionDriver>,
        oracle: Arc<dyn SuccessProbabilityOracle>,
        description_customizer: Arc<dyn DescriptionCustomizer>,
        form_field_mapper: Arc<dyn FormFieldMapper>,
    ) -> Self {
        let health = Arc::new(HealthMonitor::new(config.health.clone()));
        let reporter = Arc::new(ProgressReporter::new(control_plane.clone(), config.worker_id.clone()));
        Self {
            config,
            control_plane,
            catalog,
            health,
            breakers: Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            driver,
            oracle,
            description_customizer,
            form_field_mapper,
            reporter,
        }
    }

    /// Runs until `shutdown` is cancelled. Returns once the current job (if
    /// any) has been cancelled and its partial progress reported.
    pub async fn run(&self, shutdown: CancellationToken) {
        self.run_loop(shutdown, false).await
    }

    /// Claims and runs at most one job, then returns. Still honors
    /// `shutdown` if it fires while waiting on or running that job.
    pub async fn run_once(&self, shutdown: CancellationToken) {
        self.run_loop(shutdown, true).await
    }

    /// Number of submission attempts that could not be reported to the
    /// control plane even after exhausting the client's retry budget.
    pub fn dead_letter_count(&self) -> usize {
        self.reporter.dead_letter_count()
    }

    async fn run_loop(&self, shutdown: CancellationToken, once: bool) {
        info!(worker_id = %self.config.worker_id, "job runner starting");

        let health_tick_cancel = shutdown.clone();
        let health_tick_monitor = self.health.clone();
        let health_tick_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_TICK_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => health_tick_monitor.tick(),
                    _ = health_tick_cancel.cancelled() => break,
                }
            }
        });

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let next = tokio::select! {
                result = self.control_plane.next_job(&self.config.worker_id) => result,
                _ = shutdown.cancelled() => break,
            };

            let envelope = match next {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(error = %err, "failed to poll for next job");
                    if once {
                        break;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => continue,
                        _ = shutdown.cancelled() => break,
                    }
                }
            };

            if envelope.queue_paused {
                if once {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => continue,
                    _ = shutdown.cancelled() => break,
                }
            }

            let Some(job) = envelope.data else {
                if once {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.config.poll_interval) => continue,
                    _ = shutdown.cancelled() => break,
                }
            };

            self.run_one_job(job, shutdown.clone()).await;

            if once {
                break;
            }
        }

        health_tick_handle.abort();
        info!(worker_id = %self.config.worker_id, "job runner stopped");
    }

    async fn run_one_job(&self, job: Job, shutdown: CancellationToken) {
        let job_id = job.job_id.clone();
        info!(job_id = %job_id, "claimed job");
        let started_at = Instant::now();

        self.reporter.acknowledge(&job_id).await;

        let directories = self.directories_for(&job);
        for descriptor in &directories {
            self.health.seed(
                &descriptor.directory_id,
                descriptor.success_rate,
                descriptor.average_response_time_ms,
                descriptor.priority,
            );
        }

        let progress = Arc::new(Mutex::new(JobProgressState::new(job_id.clone(), directories.len() as u32)));
        let scheduler = Scheduler::new(
            SchedulerConfig {
                max_concurrent_attempts: self.config.scheduler.max_concurrent_attempts,
                attempt_timeout: self.config.scheduler.attempt_timeout,
                dir_delay_min: self.config.scheduler.dir_delay_min,
                dir_delay_max: self.config.scheduler.dir_delay_max,
                ai_probability_threshold: self.config.scheduler.ai_probability_threshold,
                escalation_threshold: self.config.scheduler.escalation_threshold,
            },
            self.driver.clone(),
            self.oracle.clone(),
            self.description_customizer.clone(),
            self.form_field_mapper.clone(),
            self.health.clone(),
            self.breakers.clone(),
            self.config.retry_policy.clone(),
        );

        let job_cancel = CancellationToken::new();
        let heartbeat_job_id = job_id.clone();
        let heartbeat_worker_id = self.config.worker_id.clone();
        let heartbeat_control_plane = self.control_plane.clone();
        let heartbeat_interval = self.config.heartbeat_interval;
        let heartbeat_cancel = job_cancel.clone();

        let heartbeat_handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = heartbeat_control_plane.heartbeat(&heartbeat_job_id, &heartbeat_worker_id).await {
                            warn!(job_id = %heartbeat_job_id, error = %err, "heartbeat failed");
                        }
                    }
                    _ = heartbeat_cancel.cancelled() => break,
                }
            }
        });

        let reporter = self.reporter.clone();
        let flush_job_id = job_id.clone();
        let linked_cancel = job_cancel.child_token();

        // Forward an outer shutdown into the job's own cancel token instead
        // of racing `run_job` itself against `shutdown`: racing would drop
        // `run_job`'s future outright on shutdown, abandoning its in-flight
        // submissions and skipping its final buffer flush. Watching for
        // shutdown in a side task and letting `run_job` observe `job_cancel`
        // at its own checkpoints lets it wind down and flush what it has.
        let shutdown_watch = shutdown.clone();
        let forward_cancel = job_cancel.clone();
        let shutdown_forwarder = tokio::spawn(async move {
            shutdown_watch.cancelled().await;
            forward_cancel.cancel();
        });

        scheduler
            .run_job(&job, directories, progress.clone(), linked_cancel, |batch| {
                let reporter = reporter.clone();
                let job_id = flush_job_id.clone();
                tokio::spawn(async move { reporter.flush(&job_id, batch).await; });
            })
            .await;

        let was_cancelled = shutdown.is_cancelled();
        job_cancel.cancel();
        shutdown_forwarder.abort();
        let _ = heartbeat_handle.await;

        let final_state = progress.lock().await;
        let final_status = if was_cancelled {
            "cancelled"
        } else if final_state.failed > 0 && final_state.succeeded == 0 && final_state.skipped == 0 {
            "failed"
        } else {
            "completed"
        };
        let error_message = final_state.error_tail().last().map(String::as_str);
        let summary = JobSummary {
            total_directories: final_state.total,
            successful_submissions: final_state.succeeded,
            failed_submissions: final_state.failed,
            processing_time_seconds: started_at.elapsed().as_secs(),
        };
        self.reporter.complete(&job_id, final_status, summary, error_message).await;
        info!(
            job_id = %job_id,
            succeeded = final_state.succeeded,
            failed = final_state.failed,
            skipped = final_state.skipped,
            "job completed"
        );
    }

    fn directories_for(&self, job: &Job) -> Vec<crate::kernel::jobs::directory::DirectoryDescriptor> {
        let health = self.health.clone();
        self.catalog
            .select_for(job, move |id| health.is_unhealthy(id))
            .into_iter()
            .cloned()
            .collect()
    }
}
