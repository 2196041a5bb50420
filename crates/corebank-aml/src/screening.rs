use crate::AmlError;
use chrono::{DateTime, Utc};
use corebank_types::{Clock, SharedClock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

/// One listed party on a sanction list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionEntry {
    pub entry_id: String,
    pub full_name: String,
    pub national_id: Option<String>,
    pub passport_number: Option<String>,
    pub listing_source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Potential,
    Confirmed,
    FalsePositive,
}

/// Screening hit above the configured threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanctionMatch {
    pub match_id: String,
    pub entry_id: String,
    pub screened_name: String,
    pub score: u8,
    pub matched_on: String,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ScreeningConfig {
    /// Fuzzy-name score at or above which a match record is created.
    pub match_threshold: u8,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            match_threshold: 80,
        }
    }
}

/// Result of a CSV bulk ingest; each row succeeds or fails on its own.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub total_rows: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Default)]
struct SanctionIndex {
    entries: HashMap<String, SanctionEntry>,
    by_national_id: HashMap<String, String>,
    by_passport: HashMap<String, String>,
}

impl SanctionIndex {
    fn insert(&mut self, entry: SanctionEntry) {
        if let Some(id) = &entry.national_id {
            self.by_national_id
                .insert(id.clone(), entry.entry_id.clone());
        }
        if let Some(passport) = &entry.passport_number {
            self.by_passport
                .insert(passport.clone(), entry.entry_id.clone());
        }
        self.entries.insert(entry.entry_id.clone(), entry);
    }
}

/// Sanction screening: exact identifier matches plus deterministic fuzzy
/// name matching. The in-memory index is the screening cache; bulk ingest
/// replaces it wholesale, which is the invalidation.
pub struct ScreeningService {
    index: RwLock<SanctionIndex>,
    matches: RwLock<Vec<SanctionMatch>>,
    config: ScreeningConfig,
    clock: SharedClock,
}

impl ScreeningService {
    pub fn new(config: ScreeningConfig, clock: SharedClock) -> Self {
        Self {
            index: RwLock::new(SanctionIndex::default()),
            matches: RwLock::new(Vec::new()),
            config,
            clock,
        }
    }

    pub async fn add_entry(&self, entry: SanctionEntry) {
        let mut index = self.index.write().await;
        index.insert(entry);
    }

    pub async fn entry_count(&self) -> usize {
        self.index.read().await.entries.len()
    }

    /// Bulk ingest rows of `entry_id,full_name,national_id,passport,source`.
    /// Each row is committed or rejected independently; a replacement import
    /// drops the previous index first.
    pub async fn ingest_csv(&self, data: &str, replace: bool) -> Result<IngestReport, AmlError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data.as_bytes());

        let mut staged = Vec::new();
        let mut errors = Vec::new();
        let mut total_rows = 0usize;

        for (row_number, record) in reader.records().enumerate() {
            total_rows += 1;
            let line = row_number + 2;
            match record {
                Err(err) => errors.push(format!("row {line}: {err}")),
                Ok(record) => {
                    let entry_id = record.get(0).unwrap_or("").trim().to_string();
                    let full_name = record.get(1).unwrap_or("").trim().to_string();
                    if entry_id.is_empty() || full_name.is_empty() {
                        errors.push(format!("row {line}: entry id and full name are required"));
                        continue;
                    }
                    let optional = |value: Option<&str>| {
                        value
                            .map(str::trim)
                            .filter(|v| !v.is_empty())
                            .map(str::to_string)
                    };
                    staged.push(SanctionEntry {
                        entry_id,
                        full_name,
                        national_id: optional(record.get(2)),
                        passport_number: optional(record.get(3)),
                        listing_source: optional(record.get(4))
                            .unwrap_or_else(|| "UNSPECIFIED".to_string()),
                    });
                }
            }
        }

        let succeeded = staged.len();
        let mut index = self.index.write().await;
        if replace {
            *index = SanctionIndex::default();
        }
        for entry in staged {
            index.insert(entry);
        }

        let report = IngestReport {
            total_rows,
            succeeded,
            failed: errors.len(),
            errors,
        };
        tracing::info!(
            total = report.total_rows,
            succeeded = report.succeeded,
            failed = report.failed,
            "sanction list ingested"
        );
        Ok(report)
    }

    /// Screen a party. Exact identifier hits score 100; fuzzy name hits at
    /// or above the threshold become POTENTIAL match records.
    pub async fn screen_party(
        &self,
        name: &str,
        national_id: Option<&str>,
        passport_number: Option<&str>,
    ) -> Vec<SanctionMatch> {
        let now = self.clock.now();
        let index = self.index.read().await;
        let mut hits: Vec<SanctionMatch> = Vec::new();
        let mut seen_entries = BTreeSet::new();

        let mut push_hit = |entry_id: &str, score: u8, matched_on: &str,
                            seen: &mut BTreeSet<String>,
                            hits: &mut Vec<SanctionMatch>| {
            if seen.insert(entry_id.to_string()) {
                hits.push(SanctionMatch {
                    match_id: Uuid::new_v4().to_string(),
                    entry_id: entry_id.to_string(),
                    screened_name: name.to_string(),
                    score,
                    matched_on: matched_on.to_string(),
                    status: MatchStatus::Potential,
                    created_at: now,
                });
            }
        };

        if let Some(id) = national_id {
            if let Some(entry_id) = index.by_national_id.get(id) {
                push_hit(entry_id, 100, "NATIONAL_ID", &mut seen_entries, &mut hits);
            }
        }
        if let Some(passport) = passport_number {
            if let Some(entry_id) = index.by_passport.get(passport) {
                push_hit(entry_id, 100, "PASSPORT", &mut seen_entries, &mut hits);
            }
        }

        for entry in index.entries.values() {
            let score = name_similarity(name, &entry.full_name);
            if score >= self.config.match_threshold {
                push_hit(&entry.entry_id, score, "NAME", &mut seen_entries, &mut hits);
            }
        }
        drop(index);

        hits.sort_by(|a, b| b.score.cmp(&a.score).then(a.entry_id.cmp(&b.entry_id)));
        if !hits.is_empty() {
            let mut matches = self.matches.write().await;
            matches.extend(hits.iter().cloned());
            tracing::warn!(name, hits = hits.len(), "sanction screening produced matches");
        }
        hits
    }

    pub async fn update_match_status(
        &self,
        match_id: &str,
        status: MatchStatus,
    ) -> Result<SanctionMatch, AmlError> {
        let mut matches = self.matches.write().await;
        let hit = matches
            .iter_mut()
            .find(|m| m.match_id == match_id)
            .ok_or_else(|| AmlError::MatchNotFound(match_id.to_string()))?;
        hit.status = status;
        Ok(hit.clone())
    }

    pub async fn matches(&self) -> Vec<SanctionMatch> {
        self.matches.read().await.clone()
    }
}

/// Deterministic fuzzy name score 0..100: token-set overlap with order
/// ignored, plus full credit for exact normalized equality.
pub fn name_similarity(left: &str, right: &str) -> u8 {
    let left_tokens = normalize_tokens(left);
    let right_tokens = normalize_tokens(right);
    if left_tokens.is_empty() || right_tokens.is_empty() {
        return 0;
    }
    if left_tokens == right_tokens {
        return 100;
    }
    let intersection = left_tokens.intersection(&right_tokens).count();
    let total = left_tokens.len() + right_tokens.len();
    ((2 * intersection * 100) / total) as u8
}

fn normalize_tokens(name: &str) -> BTreeSet<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use corebank_types::SystemClock;
    use std::sync::Arc;

    fn service() -> ScreeningService {
        ScreeningService::new(ScreeningConfig::default(), Arc::new(SystemClock))
    }

    fn entry(entry_id: &str, name: &str, national_id: Option<&str>) -> SanctionEntry {
        SanctionEntry {
            entry_id: entry_id.to_string(),
            full_name: name.to_string(),
            national_id: national_id.map(str::to_string),
            passport_number: None,
            listing_source: "TEST".to_string(),
        }
    }

    #[test]
    fn similarity_ignores_order_and_case() {
        assert_eq!(name_similarity("John Smith", "SMITH, John"), 100);
        assert_eq!(name_similarity("John Smith", "John Smith Jr"), 80);
        assert_eq!(name_similarity("John Smith", "Maria Lopez"), 0);
    }

    #[tokio::test]
    async fn exact_identifier_match_scores_one_hundred() {
        let service = service();
        service
            .add_entry(entry("E1", "Ivan Petrov", Some("ID-123")))
            .await;

        let hits = service
            .screen_party("Completely Different", Some("ID-123"), None)
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 100);
        assert_eq!(hits[0].matched_on, "NATIONAL_ID");
        assert_eq!(hits[0].status, MatchStatus::Potential);
    }

    #[tokio::test]
    async fn fuzzy_name_match_obeys_the_threshold() {
        let service = service();
        service.add_entry(entry("E1", "Ivan Petrov", None)).await;
        service.add_entry(entry("E2", "Anna Maria Berg", None)).await;

        let hits = service.screen_party("Petrov Ivan", None, None).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entry_id, "E1");

        let misses = service.screen_party("Klaus Werner", None, None).await;
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn csv_ingest_counts_per_row() {
        let service = service();
        let csv_data = "entry_id,full_name,national_id,passport,source\n\
                        E1,Ivan Petrov,ID-1,,OFAC\n\
                        ,Missing Id,,,OFAC\n\
                        E3,Anna Berg,,P-9,EU\n";
        let report = service.ingest_csv(csv_data, false).await.unwrap();
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(service.entry_count().await, 2);
    }

    #[tokio::test]
    async fn replacement_import_invalidates_the_old_index() {
        let service = service();
        service.add_entry(entry("OLD", "Old Name", None)).await;

        let csv_data = "entry_id,full_name,national_id,passport,source\nNEW,New Name,,,EU\n";
        service.ingest_csv(csv_data, true).await.unwrap();
        assert_eq!(service.entry_count().await, 1);
        assert!(service.screen_party("Old Name", None, None).await.is_empty());
    }

    #[tokio::test]
    async fn match_status_can_be_confirmed_or_dismissed() {
        let service = service();
        service.add_entry(entry("E1", "Ivan Petrov", None)).await;
        let hits = service.screen_party("Ivan Petrov", None, None).await;

        let updated = service
            .update_match_status(&hits[0].match_id, MatchStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(updated.status, MatchStatus::Confirmed);

        let err = service
            .update_match_status("missing", MatchStatus::FalsePositive)
            .await
            .unwrap_err();
        assert!(matches!(err, AmlError::MatchNotFound(_)));
    }
}
