//! Per-job progress accumulation: the in-memory record of what has happened
//! to a job so far, batched up for the reporter to flush to the control
//! plane.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const ERROR_TAIL_CAP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Succeeded,
    Failed,
    Skipped,
}

/// One directory submission outcome, ready to ship to the control plane.
/// Identity is `(job_id, directory_id, attempt_ordinal)`: a retried attempt
/// against the same directory gets a new, strictly-increasing ordinal
/// rather than overwriting the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionAttempt {
    #[serde(rename = "directoryId")]
    pub directory_id: String,
    #[serde(rename = "directoryName")]
    pub directory_name: String,
    #[serde(rename = "attemptOrdinal")]
    pub attempt_ordinal: u32,
    pub status: AttemptStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "durationMs")]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "aiScore", skip_serializing_if = "Option::is_none")]
    pub ai_score: Option<f64>,
    #[serde(rename = "aiCustomized", skip_serializing_if = "Option::is_none")]
    pub ai_customized: Option<bool>,
    #[serde(rename = "viaAlternate", skip_serializing_if = "Option::is_none")]
    pub via_alternate: Option<bool>,
}

impl SubmissionAttempt {
    pub fn succeeded(
        directory_id: impl Into<String>,
        directory_name: impl Into<String>,
        attempt_ordinal: u32,
        duration_ms: u64,
    ) -> Self {
        Self {
            directory_id: directory_id.into(),
            directory_name: directory_name.into(),
            attempt_ordinal,
            status: AttemptStatus::Succeeded,
            message: None,
            duration_ms,
            timestamp: Utc::now(),
            ai_score: None,
            ai_customized: None,
            via_alternate: None,
        }
    }

    pub fn failed(
        directory_id: impl Into<String>,
        directory_name: impl Into<String>,
        attempt_ordinal: u32,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            directory_id: directory_id.into(),
            directory_name: directory_name.into(),
            attempt_ordinal,
            status: AttemptStatus::Failed,
            message: Some(message.into()),
            duration_ms,
            timestamp: Utc::now(),
            ai_score: None,
            ai_customized: None,
            via_alternate: None,
        }
    }

    /// A skip never became an attempt in the `(job_id, directory_id,
    /// attempt_ordinal)` sense — it carries ordinal `0` to mark that no
    /// submission was actually dispatched.
    pub fn skipped(directory_id: impl Into<String>, directory_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            directory_id: directory_id.into(),
            directory_name: directory_name.into(),
            attempt_ordinal: 0,
            status: AttemptStatus::Skipped,
            message: Some(message.into()),
            duration_ms: 0,
            timestamp: Utc::now(),
            ai_score: None,
            ai_customized: None,
            via_alternate: None,
        }
    }

    pub fn with_ai_score(mut self, score: f64) -> Self {
        self.ai_score = Some(score);
        self
    }

    pub fn with_ai_customized(mut self, customized: bool) -> Self {
        self.ai_customized = Some(customized);
        self
    }

    pub fn with_via_alternate(mut self, via_alternate: bool) -> Self {
        self.via_alternate = Some(via_alternate);
        self
    }
}

/// Accumulated state for one job, owned by the scheduler and drained by the
/// reporter. Never shared outside the job's own worker set.
#[derive(Debug, Clone)]
pub struct JobProgressState {
    pub job_id: String,
    pub total: u32,
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub skipped: u32,
    pub buffer: Vec<SubmissionAttempt>,
    error_tail: VecDeque<String>,
}

impl JobProgressState {
    /// `total` is the directory slate size, used to derive `progress_percent`.
    pub fn new(job_id: impl Into<String>, total: u32) -> Self {
        Self {
            job_id: job_id.into(),
            total,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            buffer: Vec::new(),
            error_tail: VecDeque::new(),
        }
    }

    pub fn record(&mut self, attempt: SubmissionAttempt) {
        self.attempted += 1;
        match attempt.status {
            AttemptStatus::Succeeded => self.succeeded += 1,
            AttemptStatus::Failed => {
                self.failed += 1;
                if let Some(message) = &attempt.message {
                    if self.error_tail.len() >= ERROR_TAIL_CAP {
                        self.error_tail.pop_front();
                    }
                    self.error_tail.push_back(message.clone());
                }
            }
            AttemptStatus::Skipped => self.skipped += 1,
        }
        self.buffer.push(attempt);
    }

    /// Percentage of the directory slate that has produced a terminal
    /// attempt (succeeded, failed, or skipped) so far.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        let completed = self.succeeded + self.failed + self.skipped;
        (completed as f64 / self.total as f64) * 100.0
    }

    /// Bounded tail of the most recent failure messages, oldest first.
    pub fn error_tail(&self) -> &[String] {
        self.error_tail.as_slices().0
    }

    /// True once the buffer has accumulated enough attempts to justify a
    /// flush without waiting for the periodic timer.
    pub fn buffer_full(&self, threshold: usize) -> bool {
        self.buffer.len() >= threshold
    }

    pub fn drain_buffer(&mut self) -> Vec<SubmissionAttempt> {
        std::mem::take(&mut self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_updates_counts_per_status() {
        let mut state = JobProgressState::new("job-1", 3);
        state.record(SubmissionAttempt::succeeded("dir-1", "Dir One", 1, 120));
        state.record(SubmissionAttempt::failed("dir-2", "Dir Two", 1, "timeout", 500));
        state.record(SubmissionAttempt::skipped("dir-3", "Dir Three", "requires_login"));

        assert_eq!(state.attempted, 3);
        assert_eq!(state.succeeded, 1);
        assert_eq!(state.failed, 1);
        assert_eq!(state.skipped, 1);
        assert_eq!(state.buffer.len(), 3);
    }

    #[test]
    fn buffer_full_respects_threshold() {
        let mut state = JobProgressState::new("job-1", 10);
        for i in 0..9 {
            state.record(SubmissionAttempt::succeeded(format!("dir-{i}"), format!("Dir {i}"), 1, 10));
        }
        assert!(!state.buffer_full(10));
        state.record(SubmissionAttempt::succeeded("dir-9", "Dir 9", 1, 10));
        assert!(state.buffer_full(10));
    }

    #[test]
    fn drain_buffer_empties_without_resetting_counts() {
        let mut state = JobProgressState::new("job-1", 1);
        state.record(SubmissionAttempt::succeeded("dir-1", "Dir One", 1, 10));
        let drained = state.drain_buffer();
        assert_eq!(drained.len(), 1);
        assert!(state.buffer.is_empty());
        assert_eq!(state.succeeded, 1);
    }

    #[test]
    fn error_tail_keeps_only_the_most_recent_failures() {
        let mut state = JobProgressState::new("job-1", 30);
        for i in 0..25 {
            state.record(SubmissionAttempt::failed(format!("dir-{i}"), format!("Dir {i}"), 1, format!("reason-{i}"), 10));
        }
        assert_eq!(state.error_tail().len(), ERROR_TAIL_CAP);
        assert_eq!(state.error_tail().first().unwrap(), "reason-5");
        assert_eq!(state.error_tail().last().unwrap(), "reason-24");
    }

    #[test]
    fn progress_percent_counts_terminal_attempts_against_total() {
        let mut state = JobProgressState::new("job-1", 4);
        state.record(SubmissionAttempt::succeeded("dir-1", "Dir One", 1, 10));
        state.record(SubmissionAttempt::failed("dir-2", "Dir Two", 1, "timeout", 10));
        assert_eq!(state.progress_percent(), 50.0);
    }
}
