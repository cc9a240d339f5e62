//! Concrete advisor implementations. The default set here are no-op (the
//! runner degrades gracefully with no AI advisor wired in); a production
//! deployment supplies its own implementations of the same traits from
//! outside this crate.

use async_trait::async_trait;

use crate::kernel::jobs::directory::DirectoryDescriptor;
use crate::kernel::jobs::job::Job;
use crate::kernel::traits::{DescriptionCustomizer, FormFieldMapper, SuccessProbabilityOracle};

/// Estimates success probability from the directory's own rolling
/// `success_rate` alone, with no external advisor involved. This is the
/// floor behaviour the scheduler falls back to when no oracle is configured.
pub struct HeuristicProbabilityOracle;

#[async_trait]
impl SuccessProbabilityOracle for HeuristicProbabilityOracle {
    async fn estimate(&self, directory: &DirectoryDescriptor, _job: &Job) -> f64 {
        let difficulty_penalty = match directory.difficulty {
            crate::kernel::jobs::directory::Difficulty::Easy => 0.0,
            crate::kernel::jobs::directory::Difficulty::Medium => 0.1,
            crate::kernel::jobs::directory::Difficulty::Hard => 0.25,
        };
        (directory.success_rate - difficulty_penalty).clamp(0.0, 1.0)
    }
}

pub struct PassthroughDescriptionCustomizer;

#[async_trait]
impl DescriptionCustomizer for PassthroughDescriptionCustomizer {}

pub struct NoopFormFieldMapper;

#[async_trait]
impl FormFieldMapper for NoopFormFieldMapper {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::directory::{Difficulty, FormMapping};
    use crate::kernel::jobs::job::{BusinessProfile, PackageSize};

    fn descriptor(difficulty: Difficulty, success_rate: f64) -> DirectoryDescriptor {
        DirectoryDescriptor {
            directory_id: "dir-1".into(),
            name: "Example".into(),
            submission_url: "https://example.com".into(),
            requires_login: false,
            has_captcha: false,
            has_anti_bot: false,
            difficulty,
            tier: PackageSize::Starter,
            priority: 0.0,
            failure_rate: 0.0,
            domain_authority: 0.0,
            traffic_volume: 0.0,
            success_rate,
            average_response_time_ms: 0.0,
            category: "general".into(),
            form_mapping: FormMapping::new(),
        }
    }

    fn job() -> Job {
        Job {
            job_id: "job-1".into(),
            customer_id: "cust-1".into(),
            profile: BusinessProfile::default(),
            directory_limit: None,
            package_size: None,
        }
    }

    #[tokio::test]
    async fn hard_directories_are_penalised_more_than_easy_ones() {
        let oracle = HeuristicProbabilityOracle;
        let easy = oracle.estimate(&descriptor(Difficulty::Easy, 0.8), &job()).await;
        let hard = oracle.estimate(&descriptor(Difficulty::Hard, 0.8), &job()).await;
        assert!(hard < easy);
    }

    #[tokio::test]
    async fn estimate_never_goes_negative() {
        let oracle = HeuristicProbabilityOracle;
        let estimate = oracle.estimate(&descriptor(Difficulty::Hard, 0.1), &job()).await;
        assert!(estimate >= 0.0);
    }
}
