//! Job model: the immutable input record describing one customer's
//! submission batch.

use serde::{Deserialize, Serialize};

/// Ordered package-size budget, cheapest to most generous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageSize {
    Starter,
    Growth,
    Professional,
    Enterprise,
}

impl PackageSize {
    /// Directory count this package size budgets for.
    pub fn directory_count(&self) -> u32 {
        match self {
            PackageSize::Starter => 50,
            PackageSize::Growth => 150,
            PackageSize::Professional => 300,
            PackageSize::Enterprise => 500,
        }
    }
}

/// Normalised business profile. Every field is optional; directories that
/// require a missing field are skipped by the catalog/driver, never by a
/// hard failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusinessProfile {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

/// Immutable input job, as the control plane hands it to `GetNextJob()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "jobId")]
    pub job_id: String,
    #[serde(rename = "customerId")]
    pub customer_id: String,

    #[serde(default)]
    pub profile: BusinessProfile,

    #[serde(rename = "directoryLimit", default)]
    pub directory_limit: Option<u32>,
    #[serde(rename = "packageSize", default)]
    pub package_size: Option<PackageSize>,
}

impl Job {
    /// Resolve the number of directories this job is budgeted for.
    /// `directory_limit` wins over `package_size` if both are present.
    pub fn resolved_directory_limit(&self) -> u32 {
        if let Some(limit) = self.directory_limit {
            return limit;
        }
        self.package_size
            .map(PackageSize::directory_count)
            .unwrap_or(0)
    }

    /// The package tier that gates which directories are eligible by tier.
    /// A job specifying only a raw `directory_limit` (no package) is not tier
    /// constrained, so it is treated as `Enterprise` (the most permissive
    /// tier).
    pub fn package_tier(&self) -> PackageSize {
        self.package_size.unwrap_or(PackageSize::Enterprise)
    }
}
