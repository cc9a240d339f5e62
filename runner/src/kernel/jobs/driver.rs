//! Submission driver implementations.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::kernel::jobs::directory::DirectoryDescriptor;
use crate::kernel::jobs::job::BusinessProfile;
use crate::kernel::traits::{SubmissionDriver, SubmissionOutcome};

/// A scripted outcome queue for tests: each call to `submit` pops the next
/// scripted outcome, falling back to a final-outcome default once exhausted.
pub struct ScriptedDriver {
    script: Mutex<VecDeque<SubmissionOutcome>>,
    default: SubmissionOutcome,
}

impl ScriptedDriver {
    pub fn new(script: Vec<SubmissionOutcome>, default: SubmissionOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            default,
        }
    }

    pub fn always(outcome: SubmissionOutcome) -> Self {
        Self::new(Vec::new(), outcome)
    }
}

#[async_trait]
impl SubmissionDriver for ScriptedDriver {
    async fn submit(&self, _directory: &DirectoryDescriptor, _profile: &BusinessProfile) -> SubmissionOutcome {
        let mut script = self.script.lock().expect("scripted driver mutex poisoned");
        script.pop_front().unwrap_or_else(|| self.default.clone())
    }
}

/// Routes a submission through an alternate driver first when the
/// directory's escalation score qualifies (login wall, captcha, anti-bot,
/// hard difficulty, high failure rate, or a thin form mapping), falling
/// back to the local driver within the same attempt if the alternate fails.
/// Directories that don't qualify go straight to the local driver.
pub struct EscalatingDriver<L, A> {
    local: L,
    alternate: A,
    escalation_threshold: u32,
}

impl<L, A> EscalatingDriver<L, A>
where
    L: SubmissionDriver,
    A: SubmissionDriver,
{
    pub fn new(local: L, alternate: A, escalation_threshold: u32) -> Self {
        Self {
            local,
            alternate,
            escalation_threshold,
        }
    }
}

#[async_trait]
impl<L, A> SubmissionDriver for EscalatingDriver<L, A>
where
    L: SubmissionDriver,
    A: SubmissionDriver,
{
    async fn submit(&self, directory: &DirectoryDescriptor, profile: &BusinessProfile) -> SubmissionOutcome {
        if directory.is_escalation_eligible(self.escalation_threshold) {
            let outcome = self.alternate.submit(directory, profile).await;
            if outcome.succeeded {
                return outcome;
            }
            return self.local.submit(directory, profile).await;
        }
        self.local.submit(directory, profile).await
    }
}
