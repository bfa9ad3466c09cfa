//! Batch pipeline: enrich, dedup, sort, and count a catalog in one pass.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use jobdex_core::{DuplicateReport, JobRecord, SalaryType};
use jobdex_dedup::{DedupConfig, DedupEngine};
use jobdex_enrich::{Enricher, SignalExtractor};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobdex-pipeline";

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub dedup: DedupConfig,
    pub merge_duplicates: bool,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_f64("JOBDEX_COMPANY_THRESHOLD") {
            config.dedup.company_threshold = v;
        }
        if let Some(v) = env_f64("JOBDEX_TITLE_THRESHOLD") {
            config.dedup.title_threshold = v;
        }
        config.merge_duplicates = std::env::var("JOBDEX_MERGE_DUPLICATES")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
            .unwrap_or(false);
        config
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Aggregate counters over the deduplicated catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total: usize,
    pub by_platform: BTreeMap<String, usize>,
    pub by_tech: BTreeMap<String, usize>,
    pub by_contract_type: BTreeMap<String, usize>,
    pub by_remote_type: BTreeMap<String, usize>,
    pub by_salary_bucket: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub input_records: usize,
    /// Duplicate groups the batch partitioned into, singletons included.
    pub clusters: usize,
    pub duplicates_removed: usize,
    pub catalog: Vec<JobRecord>,
    pub stats: CatalogStats,
    pub report: DuplicateReport,
}

pub struct Pipeline {
    config: PipelineConfig,
    enricher: Enricher,
    dedup: DedupEngine,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let dedup = DedupEngine::new(config.dedup.clone());
        Self {
            config,
            enricher: Enricher::default(),
            dedup,
        }
    }

    /// Swap in an extractor with overridden pattern tables.
    pub fn with_extractor(mut self, extractor: SignalExtractor) -> Self {
        self.enricher = Enricher::new(extractor);
        self
    }

    /// One synchronous batch transform: raw records in, canonical catalog,
    /// counters, and a duplicate report out. No state carries across runs.
    pub fn run(&self, records: Vec<JobRecord>) -> RunSummary {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let input_records = records.len();
        info!(%run_id, input_records, "pipeline run started");

        let enriched = self.enricher.enrich_batch(records);
        let outcome = if self.config.merge_duplicates {
            self.dedup.dedup_merging(enriched)
        } else {
            self.dedup.dedup(enriched)
        };

        let mut catalog = outcome.catalog;
        sort_catalog(&mut catalog);
        let stats = catalog_stats(&catalog);

        let finished_at = Utc::now();
        info!(
            %run_id,
            catalog = catalog.len(),
            removed = outcome.report.removed_count(),
            "pipeline run finished"
        );
        RunSummary {
            run_id,
            started_at,
            finished_at,
            input_records,
            clusters: catalog.len(),
            duplicates_removed: outcome.report.removed_count(),
            catalog,
            stats,
            report: outcome.report,
        }
    }
}

/// Canonical catalog order: `posted_at` descending, unposted records last.
pub fn sort_catalog(catalog: &mut [JobRecord]) {
    catalog.sort_by(|a, b| match (a.posted_at, b.posted_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

const HOURS_PER_YEAR: f64 = 2080.0;

fn salary_bucket(record: &JobRecord) -> &'static str {
    let Some(figure) = record.salary_min.or(record.salary_max) else {
        return "unknown";
    };
    let yearly = match record.salary_type {
        Some(SalaryType::Hourly) => figure * HOURS_PER_YEAR,
        _ => figure,
    };
    if yearly < 50_000.0 {
        "<50k"
    } else if yearly < 100_000.0 {
        "50-100k"
    } else if yearly < 150_000.0 {
        "100-150k"
    } else if yearly < 200_000.0 {
        "150-200k"
    } else {
        "200k+"
    }
}

pub fn catalog_stats(catalog: &[JobRecord]) -> CatalogStats {
    let mut stats = CatalogStats {
        total: catalog.len(),
        ..CatalogStats::default()
    };
    for record in catalog {
        *stats.by_platform.entry(record.platform.clone()).or_default() += 1;
        for tech in &record.tech_stack {
            *stats.by_tech.entry(tech.clone()).or_default() += 1;
        }
        if let Some(contract) = record.contract_type {
            *stats
                .by_contract_type
                .entry(contract.as_str().to_string())
                .or_default() += 1;
        }
        if let Some(remote) = record.remote_type {
            *stats
                .by_remote_type
                .entry(remote.as_str().to_string())
                .or_default() += 1;
        }
        *stats
            .by_salary_bucket
            .entry(salary_bucket(record).to_string())
            .or_default() += 1;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobdex_core::RemoteType;

    fn record(platform: &str, external_id: &str, company: &str, title: &str) -> JobRecord {
        let mut record = JobRecord::new(platform, external_id, title, "https://example.com/job");
        record.company = Some(company.to_string());
        record
    }

    #[test]
    fn end_to_end_batch_dedups_near_duplicates() {
        let mut a = record("hn", "1", "Acme Inc", "Senior Rust Engineer");
        a.description = Some("Rust, Kubernetes, $140k - $180k per year".to_string());
        // Same company after suffix peeling, one typo in the title.
        let b = record("wwr", "2", "Acme LLC", "Senior Rust Engineeer");
        let c = record("remoteok", "3", "Globex", "Growth Marketing Manager");

        let summary = Pipeline::new(PipelineConfig::default()).run(vec![a, b, c]);
        assert_eq!(summary.input_records, 3);
        assert_eq!(summary.catalog.len(), 2);
        assert_eq!(summary.clusters, 2);
        assert_eq!(summary.report.clusters.len(), 1);
        assert_eq!(summary.report.clusters[0].removed.len(), 1);
        assert_eq!(summary.duplicates_removed, 1);

        let survivor = summary
            .catalog
            .iter()
            .find(|r| r.platform == "hn")
            .unwrap();
        assert!(survivor.tech_stack.contains("rust"));
        assert_eq!(survivor.salary_min, Some(140_000.0));
    }

    #[test]
    fn catalog_sorts_by_posted_at_desc_nulls_last() {
        let mut old = record("hn", "1", "Acme", "A");
        old.posted_at = Some(Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).single().unwrap());
        let mut new = record("wwr", "2", "Globex", "B");
        new.posted_at = Some(Utc.with_ymd_and_hms(2026, 8, 15, 0, 0, 0).single().unwrap());
        let unposted = record("remoteok", "3", "Initech", "C");

        let mut catalog = vec![unposted, old, new];
        sort_catalog(&mut catalog);
        let ids: Vec<&str> = catalog.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["wwr:2", "hn:1", "remoteok:3"]);
    }

    #[test]
    fn stats_count_platforms_tech_and_classifications() {
        let mut a = record("hn", "1", "Acme", "Rust Engineer");
        a.tech_stack.insert("rust".to_string());
        a.tech_stack.insert("kubernetes".to_string());
        a.remote_type = Some(RemoteType::Remote);
        let mut b = record("hn", "2", "Globex", "Go Engineer");
        b.tech_stack.insert("go".to_string());
        b.tech_stack.insert("kubernetes".to_string());
        b.contract_type = Some(jobdex_core::ContractType::Contract);

        let stats = catalog_stats(&[a, b]);
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_platform.get("hn"), Some(&2));
        assert_eq!(stats.by_tech.get("kubernetes"), Some(&2));
        assert_eq!(stats.by_tech.get("rust"), Some(&1));
        assert_eq!(stats.by_contract_type.get("contract"), Some(&1));
        assert_eq!(stats.by_remote_type.get("remote"), Some(&1));
    }

    #[test]
    fn salary_buckets_normalize_hourly_to_yearly() {
        let mut hourly = record("hn", "1", "Acme", "A");
        hourly.salary_min = Some(50.0); // 104k/year at 2080 hours
        hourly.salary_type = Some(SalaryType::Hourly);
        let mut yearly = record("hn", "2", "Acme", "B");
        yearly.salary_min = Some(45_000.0);
        yearly.salary_type = Some(SalaryType::Yearly);
        let mut max_only = record("hn", "3", "Acme", "C");
        max_only.salary_max = Some(210_000.0);
        let unknown = record("hn", "4", "Acme", "D");

        let stats = catalog_stats(&[hourly, yearly, max_only, unknown]);
        assert_eq!(stats.by_salary_bucket.get("100-150k"), Some(&1));
        assert_eq!(stats.by_salary_bucket.get("<50k"), Some(&1));
        assert_eq!(stats.by_salary_bucket.get("200k+"), Some(&1));
        assert_eq!(stats.by_salary_bucket.get("unknown"), Some(&1));
    }

    #[test]
    fn merge_duplicates_flag_folds_data_into_survivor() {
        let a = record("hn", "1", "Acme", "Senior Rust Engineer");
        let mut b = record("wwr", "2", "Acme", "Senior Rust Engineer");
        b.salary_min = Some(150_000.0);
        b.tags.insert("remote".to_string());

        let config = PipelineConfig {
            merge_duplicates: true,
            ..PipelineConfig::default()
        };
        let summary = Pipeline::new(config).run(vec![a, b]);
        assert_eq!(summary.catalog.len(), 1);
        assert_eq!(summary.clusters, 1);
        let survivor = &summary.catalog[0];
        assert_eq!(survivor.id, "hn:1");
        assert_eq!(survivor.salary_min, Some(150_000.0));
        assert!(survivor.tags.contains("remote"));
    }

    #[test]
    fn custom_pattern_tables_flow_through_the_pipeline() {
        let tables = jobdex_enrich::PatternTables::default()
            .with_tech_entry("zig", r"\bzig\b")
            .unwrap();
        let pipeline = Pipeline::new(PipelineConfig::default())
            .with_extractor(SignalExtractor::new(tables));

        let mut a = record("hn", "1", "Acme", "Zig Systems Engineer");
        a.description = Some("Low-level Zig work".to_string());
        let summary = pipeline.run(vec![a]);
        assert!(summary.catalog[0].tech_stack.contains("zig"));
    }
}
