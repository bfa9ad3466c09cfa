//! Duplicate clustering and survivor selection over enriched job records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use jobdex_core::{DuplicateCluster, DuplicateReport, JobRecord};
use jobdex_enrich::{normalize_company, normalize_title};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CRATE_NAME: &str = "jobdex-dedup";

// ---------------------------------------------------------------------------
// Similarity engine
// ---------------------------------------------------------------------------

/// Fixed score for substring containment, a cheap short-circuit for truncated
/// vs. full titles.
const CONTAINMENT_SCORE: f64 = 0.9;

/// Normalized string similarity in [0, 1]. Symmetric.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(b) || b.contains(a) {
        return CONTAINMENT_SCORE;
    }
    let distance = strsim::levenshtein(a, b) as f64;
    let max_len = a.chars().count().max(b.chars().count()) as f64;
    1.0 - distance / max_len
}

// ---------------------------------------------------------------------------
// Dedup engine
// ---------------------------------------------------------------------------

/// Thresholds and the per-platform priority table used for survivor
/// selection. Unranked platforms score 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    pub company_threshold: f64,
    pub title_threshold: f64,
    pub platform_priority: BTreeMap<String, i64>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        let platform_priority = BTreeMap::from(
            [
                ("hn", 10),
                ("wwr", 8),
                ("remoteok", 7),
                ("remotive", 6),
                ("jobicy", 5),
                ("himalayas", 4),
                ("workingnomads", 3),
            ]
            .map(|(platform, score)| (platform.to_string(), score)),
        );
        Self {
            company_threshold: 0.85,
            title_threshold: 0.85,
            platform_priority,
        }
    }
}

/// Normalized (company, title) pair a record is matched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey {
    pub company: String,
    pub title: String,
}

impl DedupKey {
    pub fn for_record(record: &JobRecord) -> Self {
        Self {
            company: normalize_company(record.company.as_deref().unwrap_or_default()),
            title: normalize_title(&record.title),
        }
    }
}

/// Result of one dedup pass: the surviving catalog plus the audit report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupOutcome {
    pub catalog: Vec<JobRecord>,
    pub report: DuplicateReport,
}

#[derive(Debug, Clone, Default)]
pub struct DedupEngine {
    config: DedupConfig,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    fn keys_similar(&self, a: &DedupKey, b: &DedupKey) -> bool {
        // Conjunction: a near-identical title at a different company is not
        // a duplicate.
        similarity(&a.company, &b.company) >= self.config.company_threshold
            && similarity(&a.title, &b.title) >= self.config.title_threshold
    }

    /// Single-pass seed-based clustering in input order. Candidates are
    /// compared against the cluster seed only, so a chain A~B~C without a
    /// direct A~C match may split into two clusters; seed selection also
    /// makes tie-breaking order-sensitive.
    fn cluster(&self, records: &[JobRecord]) -> Vec<Vec<usize>> {
        let keys: Vec<DedupKey> = records.iter().map(DedupKey::for_record).collect();
        let mut processed = vec![false; records.len()];
        let mut clusters = Vec::new();

        for seed in 0..records.len() {
            if processed[seed] {
                continue;
            }
            processed[seed] = true;
            let mut members = vec![seed];
            // A record without a usable title gets an empty key and stays a
            // singleton instead of attracting unrelated records.
            if !keys[seed].title.is_empty() {
                for candidate in seed + 1..records.len() {
                    if processed[candidate] {
                        continue;
                    }
                    if self.keys_similar(&keys[seed], &keys[candidate]) {
                        processed[candidate] = true;
                        members.push(candidate);
                    }
                }
            }
            clusters.push(members);
        }
        clusters
    }

    fn priority(&self, record: &JobRecord) -> i64 {
        self.config
            .platform_priority
            .get(&record.platform)
            .copied()
            .unwrap_or(0)
    }

    fn selection_key(&self, record: &JobRecord) -> (i64, i64, DateTime<Utc>) {
        (
            self.priority(record),
            completeness_bonus(record),
            record.posted_at.unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    }

    fn select_survivor(&self, records: &[JobRecord], members: &[usize]) -> usize {
        let mut best = members[0];
        let mut best_key = self.selection_key(&records[best]);
        for &member in &members[1..] {
            let key = self.selection_key(&records[member]);
            // Strict comparison keeps the seed on full ties.
            if key > best_key {
                best = member;
                best_key = key;
            }
        }
        best
    }

    pub fn dedup(&self, records: Vec<JobRecord>) -> DedupOutcome {
        self.run(records, false)
    }

    /// Like [`DedupEngine::dedup`], but folds each discarded member into the
    /// survivor via [`merge_records`].
    pub fn dedup_merging(&self, records: Vec<JobRecord>) -> DedupOutcome {
        self.run(records, true)
    }

    fn run(&self, records: Vec<JobRecord>, merge: bool) -> DedupOutcome {
        let clusters = self.cluster(&records);
        let mut catalog = Vec::with_capacity(clusters.len());
        let mut report = DuplicateReport::default();

        for members in &clusters {
            let survivor_idx = self.select_survivor(&records, members);
            let mut survivor = records[survivor_idx].clone();
            if members.len() > 1 {
                let removed: Vec<String> = members
                    .iter()
                    .filter(|&&m| m != survivor_idx)
                    .map(|&m| records[m].id.clone())
                    .collect();
                if merge {
                    for &member in members {
                        if member != survivor_idx {
                            survivor = merge_records(survivor, &records[member]);
                        }
                    }
                }
                report.clusters.push(DuplicateCluster {
                    kept: survivor.id.clone(),
                    removed,
                });
            }
            catalog.push(survivor);
        }

        debug!(
            input = clusters.iter().map(Vec::len).sum::<usize>(),
            clusters = clusters.len(),
            removed = report.removed_count(),
            "dedup pass complete"
        );
        DedupOutcome { catalog, report }
    }
}

/// Completeness bonus used as the survivor tie-break between equal-priority
/// platforms.
pub fn completeness_bonus(record: &JobRecord) -> i64 {
    let mut bonus = 0;
    if record.salary_min.is_some() {
        bonus += 2;
    }
    if record
        .description
        .as_deref()
        .is_some_and(|d| d.len() > 200)
    {
        bonus += 1;
    }
    if record.tech_stack.len() > 2 {
        bonus += 1;
    }
    bonus
}

/// Combine a duplicate pair into a single record. Pure: both inputs stay
/// untouched and the primary never loses information. The primary's `raw`
/// payload is kept verbatim.
pub fn merge_records(primary: JobRecord, secondary: &JobRecord) -> JobRecord {
    let mut merged = primary;
    if merged.salary_min.is_none() {
        merged.salary_min = secondary.salary_min;
    }
    if merged.salary_max.is_none() {
        merged.salary_max = secondary.salary_max;
    }
    if merged.salary_currency.is_none() {
        merged.salary_currency = secondary.salary_currency.clone();
    }
    if merged.salary_type.is_none() {
        merged.salary_type = secondary.salary_type;
    }
    if merged.experience_level.is_none() {
        merged.experience_level = secondary.experience_level;
    }
    if merged.contract_type.is_none() {
        merged.contract_type = secondary.contract_type;
    }
    merged.tech_stack.extend(secondary.tech_stack.iter().cloned());
    merged.tags.extend(secondary.tags.iter().cloned());

    let primary_len = merged.description.as_deref().map_or(0, str::len);
    let secondary_len = secondary.description.as_deref().map_or(0, str::len);
    if secondary_len > primary_len {
        merged.description = secondary.description.clone();
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobdex_core::{ContractType, ExperienceLevel};

    fn record(platform: &str, external_id: &str, company: &str, title: &str) -> JobRecord {
        let mut record = JobRecord::new(platform, external_id, title, "https://example.com/job");
        record.company = Some(company.to_string());
        record
    }

    #[test]
    fn similarity_is_symmetric_and_reflexive() {
        let pairs = [
            ("backend engineer", "backend enginer"),
            ("acme", "acmelabs"),
            ("", "rust developer"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b), similarity(b, a), "{a} vs {b}");
        }
        assert_eq!(similarity("rust developer", "rust developer"), 1.0);
        assert_eq!(similarity("", "anything"), 0.0);
    }

    #[test]
    fn containment_scores_fixed_point_nine() {
        assert_eq!(similarity("senior rust engineer", "rust engineer"), 0.9);
        assert_eq!(similarity("acme", "acmecorp"), 0.9);
    }

    #[test]
    fn near_miss_uses_normalized_edit_distance() {
        // One edit over 21 chars.
        let score = similarity("senior rust engineer", "senior rust engineeer");
        assert!((score - (1.0 - 1.0 / 21.0)).abs() < 1e-9);
        assert!(score > 0.85);
    }

    #[test]
    fn identical_keys_cluster_together() {
        let records = vec![
            record("hn", "1", "Acme Inc", "Senior Rust Engineer"),
            record("wwr", "2", "Acme LLC", "Senior Rust Engineer"),
        ];
        let outcome = DedupEngine::default().dedup(records);
        assert_eq!(outcome.catalog.len(), 1);
        assert_eq!(outcome.report.clusters.len(), 1);
    }

    #[test]
    fn different_companies_never_cluster_on_title_alone() {
        let records = vec![
            record("hn", "1", "Acme Inc", "Senior Rust Engineer"),
            record("wwr", "2", "Globex Corp", "Senior Rust Engineer"),
        ];
        let outcome = DedupEngine::default().dedup(records);
        assert_eq!(outcome.catalog.len(), 2);
        assert!(outcome.report.clusters.is_empty());
    }

    #[test]
    fn base_priority_beats_completeness_bonus() {
        // hn (10) outranks wwr (8); the +2 salary bonus is only a tie-break
        // and must not overturn the base priority gap.
        let hn = record("hn", "1", "Acme", "Platform Engineer");
        let mut wwr = record("wwr", "2", "Acme", "Platform Engineer");
        wwr.salary_min = Some(120_000.0);

        let outcome = DedupEngine::default().dedup(vec![hn, wwr]);
        assert_eq!(outcome.catalog.len(), 1);
        assert_eq!(outcome.catalog[0].id, "hn:1");
        assert_eq!(outcome.report.clusters[0].kept, "hn:1");
        assert_eq!(outcome.report.clusters[0].removed, vec!["wwr:2".to_string()]);
    }

    #[test]
    fn bonus_decides_between_equal_priority_platforms() {
        let plain = record("remoteok", "1", "Acme", "Platform Engineer");
        let mut complete = record("remoteok", "2", "Acme", "Platform Engineer");
        complete.salary_min = Some(120_000.0);

        let outcome = DedupEngine::default().dedup(vec![plain, complete]);
        assert_eq!(outcome.catalog[0].id, "remoteok:2");
    }

    #[test]
    fn most_recent_posted_at_breaks_remaining_ties() {
        let mut older = record("remoteok", "1", "Acme", "Platform Engineer");
        older.posted_at = Some(Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).single().unwrap());
        let mut newer = record("remoteok", "2", "Acme", "Platform Engineer");
        newer.posted_at = Some(Utc.with_ymd_and_hms(2026, 8, 20, 0, 0, 0).single().unwrap());
        let unposted = record("remoteok", "3", "Acme", "Platform Engineer");

        let outcome = DedupEngine::default().dedup(vec![unposted, older, newer]);
        assert_eq!(outcome.catalog[0].id, "remoteok:2");
    }

    #[test]
    fn full_tie_keeps_the_seed() {
        let seed = record("remoteok", "1", "Acme", "Platform Engineer");
        let later = record("remoteok", "2", "Acme", "Platform Engineer");
        let outcome = DedupEngine::default().dedup(vec![seed, later]);
        assert_eq!(outcome.catalog[0].id, "remoteok:1");
    }

    #[test]
    fn untitled_records_stay_singletons() {
        let a = record("hn", "1", "Acme", "");
        let b = record("wwr", "2", "Acme", "");
        let outcome = DedupEngine::default().dedup(vec![a, b]);
        assert_eq!(outcome.catalog.len(), 2);
        assert!(outcome.report.clusters.is_empty());
    }

    #[test]
    fn merge_prefers_primary_and_unions_sets() {
        let mut primary = record("hn", "1", "Acme", "Senior Rust Engineer");
        primary.salary_min = Some(150_000.0);
        primary.description = Some("short".to_string());
        primary.tech_stack.insert("rust".to_string());
        primary.tags.insert("remote".to_string());
        let mut raw = serde_json::Map::new();
        raw.insert("k".to_string(), serde_json::Value::from("v"));
        primary.raw = raw.clone();

        let mut secondary = record("wwr", "2", "Acme", "Senior Rust Engineer");
        secondary.salary_min = Some(999.0);
        secondary.description = Some("a much longer description of the role and its duties".to_string());
        secondary.tech_stack.insert("kubernetes".to_string());
        secondary.tags.insert("backend".to_string());
        secondary.experience_level = Some(ExperienceLevel::Senior);
        secondary.contract_type = Some(ContractType::FullTime);

        let merged = merge_records(primary, &secondary);
        assert_eq!(merged.salary_min, Some(150_000.0));
        assert!(merged.tech_stack.contains("rust"));
        assert!(merged.tech_stack.contains("kubernetes"));
        assert!(merged.tags.contains("remote"));
        assert!(merged.tags.contains("backend"));
        assert_eq!(
            merged.description.as_deref(),
            Some("a much longer description of the role and its duties")
        );
        assert_eq!(merged.experience_level, Some(ExperienceLevel::Senior));
        assert_eq!(merged.contract_type, Some(ContractType::FullTime));
        assert_eq!(merged.raw, raw);
    }

    #[test]
    fn dedup_merging_folds_duplicate_data_into_survivor() {
        let hn = record("hn", "1", "Acme", "Senior Rust Engineer");
        let mut wwr = record("wwr", "2", "Acme Inc", "Senior Rust Engineer");
        wwr.salary_min = Some(140_000.0);
        wwr.tech_stack.insert("rust".to_string());

        let outcome = DedupEngine::default().dedup_merging(vec![hn, wwr]);
        assert_eq!(outcome.catalog.len(), 1);
        let survivor = &outcome.catalog[0];
        assert_eq!(survivor.id, "hn:1");
        assert_eq!(survivor.salary_min, Some(140_000.0));
        assert!(survivor.tech_stack.contains("rust"));
    }

    #[test]
    fn seed_only_comparison_is_not_transitive() {
        // B is similar to seed A; C is similar to B but too far from A, so C
        // opens its own cluster. Preserved behavior, not a bug.
        let a = record("hn", "1", "Acme", "platform engineer aaaa");
        let b = record("wwr", "2", "Acme", "platform engineer aabb");
        let c = record("remoteok", "3", "Acme", "platform engineer bbbb");
        let outcome = DedupEngine::default().dedup(vec![a, b, c]);
        assert_eq!(outcome.catalog.len(), 2);
    }
}
