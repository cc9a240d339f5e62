//! Directory descriptor: the read-only catalog entry for one external web
//! directory, plus the form-field alias normalisation applied at load time.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::job::PackageSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// Ordered sequence of candidate selectors for one canonical business field.
pub type FormMapping = HashMap<String, Vec<String>>;

/// Read-only catalog entry. Rolling statistics (`failure_rate`,
/// `success_rate`, `average_response_time_ms`) are seeded from the catalog
/// file but thereafter owned exclusively by the Health Monitor — see
/// Invariant D-1 in SPEC_FULL.md.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryDescriptor {
    #[serde(rename = "directoryId")]
    pub directory_id: String,
    pub name: String,
    #[serde(rename = "submissionUrl")]
    pub submission_url: String,

    #[serde(rename = "requiresLogin", default)]
    pub requires_login: bool,
    #[serde(rename = "hasCaptcha", default)]
    pub has_captcha: bool,
    #[serde(rename = "hasAntiBot", default)]
    pub has_anti_bot: bool,
    #[serde(default = "default_difficulty")]
    pub difficulty: Difficulty,
    #[serde(default = "default_tier")]
    pub tier: PackageSize,

    #[serde(default)]
    pub priority: f64,
    #[serde(rename = "failureRate", default)]
    pub failure_rate: f64,
    #[serde(rename = "domainAuthority", default)]
    pub domain_authority: f64,
    #[serde(rename = "trafficVolume", default)]
    pub traffic_volume: f64,
    #[serde(rename = "successRate", default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(rename = "averageResponseTimeMs", default)]
    pub average_response_time_ms: f64,

    #[serde(default)]
    pub category: String,

    #[serde(rename = "formMapping", default)]
    pub form_mapping: FormMapping,
}

fn default_difficulty() -> Difficulty {
    Difficulty::Medium
}

fn default_tier() -> PackageSize {
    PackageSize::Starter
}

fn default_success_rate() -> f64 {
    0.5
}

impl DirectoryDescriptor {
    /// Total number of candidate selectors across all mapped fields. Used by
    /// the escalation heuristic (`selector_count < 3`).
    pub fn selector_count(&self) -> usize {
        self.form_mapping.values().map(Vec::len).sum()
    }

    /// Collapse known aliases for canonical business-field keys
    /// (`company`, `business_name`, `businessName` → `businessName`).
    pub fn normalize_form_mapping(&mut self) {
        self.form_mapping = normalize_aliases(std::mem::take(&mut self.form_mapping));
    }

    /// Count of signals favoring the alternate submission path: login wall,
    /// captcha, anti-bot protection, hard difficulty, a high rolling failure
    /// rate, or a thin form mapping.
    pub fn escalation_score(&self) -> u32 {
        let mut score = 0;
        if self.requires_login {
            score += 1;
        }
        if self.has_captcha {
            score += 1;
        }
        if self.has_anti_bot {
            score += 1;
        }
        if self.difficulty == Difficulty::Hard {
            score += 1;
        }
        if self.failure_rate >= 0.60 {
            score += 1;
        }
        if self.selector_count() < 3 {
            score += 1;
        }
        score
    }

    pub fn is_escalation_eligible(&self, threshold: u32) -> bool {
        self.escalation_score() >= threshold
    }
}

fn canonical_field(key: &str) -> &'static str {
    match key.to_lowercase().replace(['-', '_'], "").as_str() {
        "company" | "businessname" | "name" => "businessName",
        "email" | "contactemail" => "email",
        "phone" | "phonenumber" | "telephone" => "phone",
        "website" | "url" | "websiteurl" => "website",
        "address" | "fulladdress" | "streetaddress" => "address",
        "description" | "about" | "businessdescription" => "description",
        "category" | "businesscategory" => "category",
        _ => "",
    }
}

fn normalize_aliases(raw: FormMapping) -> FormMapping {
    let mut normalized: FormMapping = HashMap::new();
    for (key, selectors) in raw {
        let canonical = canonical_field(&key);
        let target = if canonical.is_empty() { key.as_str() } else { canonical };
        normalized
            .entry(target.to_string())
            .or_default()
            .extend(selectors);
    }
    for selectors in normalized.values_mut() {
        selectors.dedup();
    }
    normalized
}
