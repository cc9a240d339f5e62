//! HTTP client for the control plane: `GetNextJob`, `UpdateProgress`,
//! `CompleteJob`, `Heartbeat`. Retries transient failures with jittered
//! backoff, and each operation carries its own circuit breaker keyed by
//! operation name — a sustained outage on one call degrades only that call,
//! not the others.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::common::Backoff;
use crate::kernel::jobs::job::Job;
use crate::kernel::jobs::progress::SubmissionAttempt;
use crate::kernel::jobs::resilience::{CircuitBreakerConfig, CircuitBreakerRegistry};

/// Typed failure modes for a single control-plane request. `retryable()`
/// drives the retry loop the same way an `ErrorKind::should_retry` method
/// gates a job-store retry chain.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("sending request to {url}: {source}")]
    Request { url: String, #[source] source: reqwest::Error },
    #[error("{url} returned {status}: {body}")]
    UnexpectedStatus { url: String, status: StatusCode, body: String },
    #[error("parsing response body from {url}: {message}")]
    Decode { url: String, message: String },
    #[error("circuit open for {operation}")]
    CircuitOpen { operation: String },
}

impl ControlPlaneError {
    fn retryable(&self) -> bool {
        match self {
            ControlPlaneError::Request { .. } => true,
            ControlPlaneError::Decode { .. } => false,
            ControlPlaneError::CircuitOpen { .. } => false,
            ControlPlaneError::UnexpectedStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NextJobEnvelope {
    pub success: bool,
    #[serde(default)]
    pub data: Option<Job>,
    #[serde(default)]
    pub message: Option<String>,
    /// Not part of the documented envelope, but additive: the control plane
    /// may set this alongside `data: null` to say "no job, but don't poll
    /// again yet" rather than "nothing queued at all".
    #[serde(rename = "queuePaused", default)]
    pub queue_paused: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiAck {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct JobSummary {
    #[serde(rename = "totalDirectories")]
    pub total_directories: u32,
    #[serde(rename = "successfulSubmissions")]
    pub successful_submissions: u32,
    #[serde(rename = "failedSubmissions")]
    pub failed_submissions: u32,
    #[serde(rename = "processingTimeSeconds")]
    pub processing_time_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
struct UpdateProgressRequest<'a> {
    #[serde(rename = "jobId")]
    job_id: &'a str,
    #[serde(rename = "directoryResults")]
    directory_results: &'a [SubmissionAttempt],
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'a str>,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
struct CompleteJobRequest<'a> {
    #[serde(rename = "jobId")]
    job_id: &'a str,
    #[serde(rename = "finalStatus")]
    final_status: &'a str,
    summary: JobSummary,
    #[serde(rename = "errorMessage", skip_serializing_if = "Option::is_none")]
    error_message: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
struct HeartbeatRequest<'a> {
    #[serde(rename = "jobId")]
    job_id: &'a str,
}

pub struct ControlPlaneClient {
    http: Client,
    api_base: String,
    api_key: String,
    retry: Backoff,
    max_attempts: u32,
    breakers: CircuitBreakerRegistry,
}

impl ControlPlaneClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("building control-plane HTTP client")?;
        Ok(Self {
            http,
            api_base: api_base.into(),
            api_key: api_key.into(),
            retry: Backoff::api_call(),
            max_attempts: 5,
            breakers: CircuitBreakerRegistry::new(CircuitBreakerConfig::default()),
        })
    }

    /// Overrides the retry budget; used by tests that exercise the retry
    /// path without waiting out the full production backoff schedule.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub async fn next_job(&self, worker_id: &str) -> Result<NextJobEnvelope> {
        let url = format!("{}/api/jobs/next", self.api_base);
        self.get_with_retry("next_job", &url, Some(worker_id)).await
    }

    /// Always ships the batch to the control plane, even when `attempts` is
    /// empty — an empty-batch call still serves as a liveness signal that
    /// this worker is alive and processing this job.
    pub async fn update_progress(
        &self,
        job_id: &str,
        attempts: &[SubmissionAttempt],
        status: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/api/jobs/update", self.api_base);
        let body = UpdateProgressRequest {
            job_id,
            directory_results: attempts,
            status,
            error_message: None,
        };
        let _: ApiAck = self.post_with_retry("update_progress", &url, &body).await?;
        Ok(())
    }

    pub async fn complete_job(
        &self,
        job_id: &str,
        final_status: &str,
        summary: JobSummary,
        error_message: Option<&str>,
    ) -> Result<()> {
        let url = format!("{}/api/jobs/complete", self.api_base);
        let body = CompleteJobRequest {
            job_id,
            final_status,
            summary,
            error_message,
        };
        let _: ApiAck = self.post_with_retry("complete_job", &url, &body).await?;
        Ok(())
    }

    pub async fn heartbeat(&self, job_id: &str, _worker_id: &str) -> Result<()> {
        let url = format!("{}/api/jobs/heartbeat", self.api_base);
        let body = HeartbeatRequest { job_id };
        let _: ApiAck = self.post_with_retry("heartbeat", &url, &body).await?;
        Ok(())
    }

    async fn get_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        worker_id: Option<&str>,
    ) -> Result<T> {
        self.with_retry(operation, url, || self.get_once(url, worker_id)).await
    }

    async fn post_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
        body: &impl Serialize,
    ) -> Result<T> {
        self.with_retry(operation, url, || self.post_once(url, body)).await
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, url: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, ControlPlaneError>>,
    {
        if !self.breakers.allow(operation) {
            return Err(ControlPlaneError::CircuitOpen { operation: operation.to_string() })
                .with_context(|| format!("calling control plane at {url}"));
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    self.breakers.record_success(operation);
                    return Ok(value);
                }
                Err(err) if attempt < self.max_attempts && err.retryable() => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(url, attempt, error = %err, delay_ms = delay.as_millis() as u64, "control-plane call failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.breakers.record_failure(operation);
                    return Err(err).with_context(|| format!("calling control plane at {url}"));
                }
            }
        }
    }

    async fn get_once<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        worker_id: Option<&str>,
    ) -> Result<T, ControlPlaneError> {
        let mut request = self.http.get(url).header("X-API-Key", &self.api_key).timeout(Duration::from_secs(30));
        if let Some(worker_id) = worker_id {
            request = request.header("X-Worker-ID", worker_id);
        }
        let response = request
            .send()
            .await
            .map_err(|source| ControlPlaneError::Request { url: url.to_string(), source })?;
        Self::decode(url, response).await
    }

    async fn post_once<T: serde::de::DeserializeOwned>(&self, url: &str, body: &impl Serialize) -> Result<T, ControlPlaneError> {
        let response = self
            .http
            .post(url)
            .header("X-API-Key", &self.api_key)
            .json(body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|source| ControlPlaneError::Request { url: url.to_string(), source })?;
        Self::decode(url, response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(url: &str, response: reqwest::Response) -> Result<T, ControlPlaneError> {
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return serde_json::from_value(serde_json::Value::Null)
                .map_err(|source| ControlPlaneError::Decode { url: url.to_string(), message: source.to_string() });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ControlPlaneError::UnexpectedStatus { url: url.to_string(), status, body });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| ControlPlaneError::Decode { url: url.to_string(), message: source.to_string() })
    }
}
