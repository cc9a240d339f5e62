//! Directory catalog: loaded once at startup, filtered and scored per job.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::directory::DirectoryDescriptor;
use super::job::{Job, PackageSize};

/// Accepts any of the three JSON shapes a catalog file might arrive in: a
/// bare array, `{"directories": [...]}`, or `{"items": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CatalogDocument {
    Bare(Vec<DirectoryDescriptor>),
    Directories { directories: Vec<DirectoryDescriptor> },
    Items { items: Vec<DirectoryDescriptor> },
}

impl CatalogDocument {
    fn into_descriptors(self) -> Vec<DirectoryDescriptor> {
        match self {
            CatalogDocument::Bare(v) => v,
            CatalogDocument::Directories { directories } => directories,
            CatalogDocument::Items { items } => items,
        }
    }
}

const DEFAULT_SEARCH_PATHS: &[&str] = &[
    "./directories.json",
    "./config/directories.json",
    "/etc/autobolt/directories.json",
];

pub struct DirectoryCatalog {
    descriptors: Vec<DirectoryDescriptor>,
}

impl DirectoryCatalog {
    /// Load from an explicit path, falling back to the default search path
    /// list when `explicit_path` is `None`.
    pub fn load(explicit_path: Option<&str>) -> Result<Self> {
        let path = match explicit_path {
            Some(p) => p.to_string(),
            None => Self::find_default_path()
                .context("no directory catalog found in any default search path")?,
        };

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading directory catalog at {path}"))?;
        let document: CatalogDocument =
            serde_json::from_str(&raw).with_context(|| format!("parsing directory catalog at {path}"))?;

        let mut descriptors = document.into_descriptors();
        for descriptor in &mut descriptors {
            descriptor.normalize_form_mapping();
        }

        Ok(Self { descriptors })
    }

    fn find_default_path() -> Option<String> {
        DEFAULT_SEARCH_PATHS
            .iter()
            .find(|p| Path::new(p).exists())
            .map(|p| p.to_string())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Select up to `job.resolved_directory_limit()` directories eligible
    /// for `job`, ranked by composite score, highest first.
    pub fn select_for(&self, job: &Job, unhealthy: impl Fn(&str) -> bool) -> Vec<&DirectoryDescriptor> {
        let limit = job.resolved_directory_limit() as usize;
        let tier = job.package_tier();

        let mut eligible: Vec<&DirectoryDescriptor> = self
            .descriptors
            .iter()
            .filter(|d| Self::is_eligible(d, &job, tier, &unhealthy))
            .collect();

        eligible.sort_by(|a, b| {
            composite_score(b)
                .partial_cmp(&composite_score(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.directory_id.cmp(&b.directory_id))
        });

        eligible.truncate(limit);
        eligible
    }

    fn is_eligible(
        descriptor: &DirectoryDescriptor,
        job: &Job,
        tier: PackageSize,
        unhealthy: &impl Fn(&str) -> bool,
    ) -> bool {
        if descriptor.requires_login || descriptor.has_captcha {
            return false;
        }
        if descriptor.tier > tier {
            return false;
        }
        if unhealthy(&descriptor.directory_id) {
            return false;
        }
        if let Some(required) = required_fields_satisfied(descriptor, job) {
            required
        } else {
            true
        }
    }
}

/// Directory categories that earn the composite-score category bonus:
/// the channels with the highest conversion value per submission.
const BONUS_CATEGORIES: &[&str] = &["search-engines", "social-media", "review-sites", "maps-services"];

/// Weighted composite score: domain authority, log-scaled traffic, category
/// bonus, and rolling success rate. Ties are broken by `directory_id` in
/// `select_for` for deterministic ordering.
fn composite_score(descriptor: &DirectoryDescriptor) -> f64 {
    let domain_authority_norm = (descriptor.domain_authority / 100.0).clamp(0.0, 1.0);
    let traffic_component = (descriptor.traffic_volume + 1.0).log10() / 6.0;
    let category_bonus = if BONUS_CATEGORIES.contains(&descriptor.category.as_str()) { 1.0 } else { 0.0 };

    0.30 * domain_authority_norm + 0.25 * traffic_component + 0.25 * category_bonus + 0.20 * descriptor.success_rate
}

/// `None` means "no form mapping recorded yet" (don't filter on it);
/// `Some(false)` means a mapped field the job profile cannot satisfy.
fn required_fields_satisfied(descriptor: &DirectoryDescriptor, job: &Job) -> Option<bool> {
    if descriptor.form_mapping.is_empty() {
        return None;
    }
    let profile = &job.profile;
    let has_business_name = descriptor.form_mapping.contains_key("businessName") && profile.name.is_none();
    let has_email = descriptor.form_mapping.contains_key("email") && profile.email.is_none();
    Some(!has_business_name && !has_email)
}
