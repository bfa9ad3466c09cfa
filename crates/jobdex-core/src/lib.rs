//! Canonical domain model for the Jobdex catalog.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

pub const CRATE_NAME: &str = "jobdex-core";

/// Compensation cadence attached to a salary figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalaryType {
    Hourly,
    Yearly,
    Fixed,
}

impl SalaryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalaryType::Hourly => "hourly",
            SalaryType::Yearly => "yearly",
            SalaryType::Fixed => "fixed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractType {
    FullTime,
    PartTime,
    Contract,
    Freelance,
}

impl ContractType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractType::FullTime => "full-time",
            ContractType::PartTime => "part-time",
            ContractType::Contract => "contract",
            ContractType::Freelance => "freelance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceLevel {
    Junior,
    Mid,
    Senior,
    Lead,
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceLevel::Junior => "junior",
            ExperienceLevel::Mid => "mid",
            ExperienceLevel::Senior => "senior",
            ExperienceLevel::Lead => "lead",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteType {
    Remote,
    Hybrid,
    Onsite,
}

impl RemoteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteType::Remote => "remote",
            RemoteType::Hybrid => "hybrid",
            RemoteType::Onsite => "onsite",
        }
    }
}

/// Canonical normalized representation of one job posting.
///
/// `id` is always derived from `(platform, external_id)` and `raw` keeps the
/// original source payload verbatim; neither is touched after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub platform: String,
    pub external_id: String,
    pub title: String,
    pub company: Option<String>,
    pub description: Option<String>,
    pub url: String,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub salary_currency: Option<String>,
    pub salary_type: Option<SalaryType>,
    pub contract_type: Option<ContractType>,
    pub experience_level: Option<ExperienceLevel>,
    pub location: Option<String>,
    pub remote_type: Option<RemoteType>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub tech_stack: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub raw: Map<String, JsonValue>,
}

impl JobRecord {
    pub fn new(
        platform: impl Into<String>,
        external_id: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let platform = platform.into();
        let external_id = external_id.into();
        Self {
            id: derive_id(&platform, &external_id),
            platform,
            external_id,
            title: title.into(),
            company: None,
            description: None,
            url: url.into(),
            salary_min: None,
            salary_max: None,
            salary_currency: None,
            salary_type: None,
            contract_type: None,
            experience_level: None,
            location: None,
            remote_type: None,
            timezone: None,
            tech_stack: BTreeSet::new(),
            tags: BTreeSet::new(),
            posted_at: None,
            fetched_at: Utc::now(),
            raw: Map::new(),
        }
    }

    pub fn with_raw(mut self, raw: Map<String, JsonValue>) -> Self {
        self.raw = raw;
        self
    }
}

/// Source-unique identity: `platform:external_id`.
pub fn derive_id(platform: &str, external_id: &str) -> String {
    format!("{platform}:{external_id}")
}

/// One resolved duplicate group: the record kept plus everything folded away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCluster {
    pub kept: String,
    pub removed: Vec<String>,
}

/// Audit trail of every non-trivial cluster resolved in a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateReport {
    pub clusters: Vec<DuplicateCluster>,
}

impl DuplicateReport {
    pub fn removed_count(&self) -> usize {
        self.clusters.iter().map(|c| c.removed.len()).sum()
    }
}
