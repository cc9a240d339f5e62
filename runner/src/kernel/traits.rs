//! Seams the scheduler calls through: the actual submission mechanics and
//! the optional advisors that shape which directories are attempted and how.
//!
//! Every advisor trait carries a default implementation that degrades to a
//! no-op, so the runner works the same with or without an advisor wired in —
//! mirroring the uniform-interface-with-sensible-defaults shape used for the
//! AI advisor surface this crate's submission advisors are descended from.

use async_trait::async_trait;

use super::jobs::directory::DirectoryDescriptor;
use super::jobs::job::{BusinessProfile, Job};

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub succeeded: bool,
    pub reason_code: Option<String>,
}

impl SubmissionOutcome {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            reason_code: None,
        }
    }

    pub fn failure(reason_code: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            reason_code: Some(reason_code.into()),
        }
    }
}

/// Performs the actual directory submission attempt. The production
/// implementation drives a headless browser or HTTP form post; tests supply
/// a scripted double.
#[async_trait]
pub trait SubmissionDriver: Send + Sync {
    async fn submit(&self, directory: &DirectoryDescriptor, profile: &BusinessProfile) -> SubmissionOutcome;
}

/// Estimates the likelihood a submission to `directory` will succeed before
/// spending a worker slot on it. Directories scoring below the configured
/// threshold are skipped rather than attempted.
#[async_trait]
pub trait SuccessProbabilityOracle: Send + Sync {
    async fn estimate(&self, _directory: &DirectoryDescriptor, _job: &Job) -> f64 {
        1.0
    }
}

/// Tailors the free-text description field per directory's category and
/// length constraints. Default is the identity transform.
#[async_trait]
pub trait DescriptionCustomizer: Send + Sync {
    async fn customize(&self, _directory: &DirectoryDescriptor, description: &str) -> String {
        description.to_string()
    }
}

/// Maps a profile field to the directory's actual form selectors when the
/// catalog's static `form_mapping` doesn't cover it. Default declines to map
/// anything extra.
#[async_trait]
pub trait FormFieldMapper: Send + Sync {
    async fn map_extra_fields(&self, _directory: &DirectoryDescriptor, _profile: &BusinessProfile) -> Vec<(String, String)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAdvisor;
    impl SuccessProbabilityOracle for NoopAdvisor {}
    impl DescriptionCustomizer for NoopAdvisor {}
    impl FormFieldMapper for NoopAdvisor {}

    fn sample_directory() -> DirectoryDescriptor {
        use crate::kernel::jobs::directory::{Difficulty, FormMapping};
        use crate::kernel::jobs::job::PackageSize;
        DirectoryDescriptor {
            directory_id: "dir-1".into(),
            name: "Example".into(),
            submission_url: "https://example.com".into(),
            requires_login: false,
            has_captcha: false,
            has_anti_bot: false,
            difficulty: Difficulty::Easy,
            tier: PackageSize::Starter,
            priority: 0.0,
            failure_rate: 0.0,
            domain_authority: 0.0,
            traffic_volume: 0.0,
            success_rate: 0.5,
            average_response_time_ms: 0.0,
            category: "general".into(),
            form_mapping: FormMapping::new(),
        }
    }

    #[tokio::test]
    async fn default_oracle_estimates_full_confidence() {
        let advisor = NoopAdvisor;
        let job = Job {
            job_id: "job-1".into(),
            customer_id: "cust-1".into(),
            profile: BusinessProfile::default(),
            directory_limit: None,
            package_size: None,
        };
        assert_eq!(advisor.estimate(&sample_directory(), &job).await, 1.0);
    }

    #[tokio::test]
    async fn default_customizer_is_identity() {
        let advisor = NoopAdvisor;
        let out = advisor.customize(&sample_directory(), "hello world").await;
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn default_field_mapper_maps_nothing() {
        let advisor = NoopAdvisor;
        let out = advisor
            .map_extra_fields(&sample_directory(), &BusinessProfile::default())
            .await;
        assert!(out.is_empty());
    }
}
