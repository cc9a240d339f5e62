//! Flushes accumulated submission attempts to the control plane. Retries
//! transient failures with backoff; attempts that still cannot be reported
//! after exhausting retries land in a bounded dead-letter list rather than
//! being dropped silently or blocking the scheduler indefinitely.

use std::collections::VecDeque;

use tracing::{error, warn};

use crate::kernel::control_plane::{ControlPlaneClient, JobSummary};
use crate::kernel::jobs::progress::SubmissionAttempt;

const DEAD_LETTER_CAP: usize = 100;

pub struct ProgressReporter {
    client: std::sync::Arc<ControlPlaneClient>,
    worker_id: String,
    dead_letters: std::sync::Mutex<VecDeque<(String, SubmissionAttempt)>>,
}

impl ProgressReporter {
    pub fn new(client: std::sync::Arc<ControlPlaneClient>, worker_id: impl Into<String>) -> Self {
        Self {
            client,
            worker_id: worker_id.into(),
            dead_letters: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    /// Acknowledges that this worker has claimed `job_id`, before any
    /// directory has been attempted. An empty-batch `UpdateProgress` call
    /// still carries meaning to the control plane: the job is in flight, not
    /// merely queued. Best-effort — a failure here doesn't block the job.
    pub async fn acknowledge(&self, job_id: &str) {
        if let Err(err) = self.client.update_progress(job_id, &[], Some("in_progress")).await {
            warn!(job_id, worker_id = %self.worker_id, error = %err, "acquisition acknowledgment failed");
        }
    }

    /// Flush one batch for `job_id`. Failures land in the dead-letter list;
    /// this never blocks the scheduler waiting on retries beyond the
    /// control-plane client's own bounded retry budget.
    pub async fn flush(&self, job_id: &str, attempts: Vec<SubmissionAttempt>) {
        if attempts.is_empty() {
            return;
        }
        match self.client.update_progress(job_id, &attempts, None).await {
            Ok(()) => {}
            Err(err) => {
                warn!(job_id, error = %err, count = attempts.len(), "progress flush failed, dead-lettering batch");
                let mut dead_letters = self.dead_letters.lock().expect("dead letter mutex poisoned");
                for attempt in attempts {
                    if dead_letters.len() >= DEAD_LETTER_CAP {
                        dead_letters.pop_front();
                    }
                    dead_letters.push_back((job_id.to_string(), attempt));
                }
            }
        }
    }

    /// The job's terminal report is mandatory: retried by the control-plane
    /// client to exhaustion, and logged loudly if it still cannot get
    /// through, since the control plane otherwise has no way to learn the
    /// job ever finished.
    pub async fn complete(&self, job_id: &str, final_status: &str, summary: JobSummary, error_message: Option<&str>) {
        if let Err(err) = self.client.complete_job(job_id, final_status, summary, error_message).await {
            error!(job_id, error = %err, "completion-lost: could not report job completion to control plane");
        }
    }

    pub fn dead_letter_count(&self) -> usize {
        self.dead_letters.lock().expect("dead letter mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dead_letter_queue_starts_empty() {
        let client = std::sync::Arc::new(
            ControlPlaneClient::new("https://example.com", "test-key").expect("client should build"),
        );
        let reporter = ProgressReporter::new(client, "worker-1");
        assert_eq!(reporter.dead_letter_count(), 0);
    }
}
