//! Ingestion: source gathering, reconciliation, daily snapshots and the
//! single writer path into the review store.
//!
//! Feed parsing and scraping live behind the [`Source`] trait; this module
//! only decides which sources to consult and how their entries fold into
//! the day's snapshot.

use crate::errors::{ContextError, Result};
use crate::store::{Observation, PopularityMetrics, ReviewStore, format_date};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

// ─────────────────────────────────────────────────────────────────────────────
// Entries
// ─────────────────────────────────────────────────────────────────────────────

/// One fetched announcement, keyed by `url`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub title: String,
    /// As reported by the source (ISO 8601 or RFC 2822)
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub summary: String,
    pub url: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    /// Source-specific fields carried through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Entry {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            date: String::new(),
            summary: String::new(),
            url: url.into(),
            source: String::new(),
            highlights: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.date = date.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Identity key: the trimmed url
    pub fn key(&self) -> &str {
        self.url.trim()
    }
}

/// Merge `incoming` into `existing`, one entry per key
///
/// Incoming entries replace existing ones with the same key. Output order
/// is unspecified; see [`sort_entries`].
pub fn reconcile(existing: Vec<Entry>, incoming: Vec<Entry>) -> Vec<Entry> {
    let mut by_key: HashMap<String, Entry> = HashMap::with_capacity(existing.len() + incoming.len());
    for entry in existing.into_iter().chain(incoming) {
        by_key.insert(entry.key().to_string(), entry);
    }
    by_key.into_values().collect()
}

/// Newest first, then by key
pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.key().cmp(b.key())));
}

// ─────────────────────────────────────────────────────────────────────────────
// Sources
// ─────────────────────────────────────────────────────────────────────────────

/// Anything that yields entries: a search API, a feed, a scraped page
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with `SourceUnavailable`
    async fn fetch(&self) -> Result<Vec<Entry>>;
}

/// Entries read from a JSON array on disk
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    name: String,
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl Source for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<Entry>> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ContextError::source_unavailable_with_source(
                format!("{}: cannot read {}", self.name, self.path.display()),
                e,
            )
        })?;
        serde_json::from_str(&contents).map_err(|e| {
            ContextError::source_unavailable_with_source(
                format!("{}: malformed entries in {}", self.name, self.path.display()),
                e,
            )
        })
    }
}

/// Result of [`gather_with_fallback`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gathered {
    pub entries: Vec<Entry>,
    pub used_fallback: bool,
    /// Names of sources that failed and contributed nothing
    pub failed_sources: Vec<String>,
}

async fn fetch_or_empty(source: &dyn Source, failed: &mut Vec<String>) -> Vec<Entry> {
    match source.fetch().await {
        Ok(entries) => {
            tracing::info!(source = source.name(), count = entries.len(), "Source fetched");
            entries
        }
        Err(e) => {
            tracing::warn!(
                source = source.name(),
                category = e.category().as_str(),
                error = %e,
                "Source unavailable"
            );
            failed.push(source.name().to_string());
            Vec::new()
        }
    }
}

/// Primary source first; fallbacks only when it yields fewer than `min_primary`
pub async fn gather_with_fallback(
    primary: &dyn Source,
    fallbacks: &[Box<dyn Source>],
    min_primary: usize,
) -> Gathered {
    let mut failed_sources = Vec::new();
    let mut entries = fetch_or_empty(primary, &mut failed_sources).await;

    if entries.len() >= min_primary {
        tracing::debug!(count = entries.len(), "Primary source sufficient");
        return Gathered {
            entries,
            used_fallback: false,
            failed_sources,
        };
    }

    tracing::info!(
        count = entries.len(),
        min_primary,
        fallbacks = fallbacks.len(),
        "Primary source short; consulting fallbacks"
    );
    for source in fallbacks {
        entries.extend(fetch_or_empty(source.as_ref(), &mut failed_sources).await);
    }

    Gathered {
        entries,
        used_fallback: true,
        failed_sources,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Daily snapshot
// ─────────────────────────────────────────────────────────────────────────────

/// Directory of `<YYYY-MM-DD>.json` entry arrays
#[derive(Debug, Clone)]
pub struct DailySnapshot {
    dir: PathBuf,
}

/// Counts from one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub existing: usize,
    pub incoming: usize,
    pub total: usize,
    pub written: bool,
}

impl DailySnapshot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.json", format_date(date)))
    }

    /// Entries saved for `date`; a missing file is an empty day
    pub fn load(&self, date: NaiveDate) -> Result<Vec<Entry>> {
        let path = self.path_for(date);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_error(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| {
            ContextError::internal_with_source(
                format!("snapshot {} is not an entry array", path.display()),
                e,
            )
        })
    }

    /// Overwrite the snapshot for `date` (pretty-printed, written atomically)
    pub fn save(&self, date: NaiveDate, entries: &[Entry]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;

        let path = self.path_for(date);
        let json = serde_json::to_string_pretty(entries)
            .map_err(|e| ContextError::internal_with_source("failed to encode snapshot", e))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| io_error(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_error(&path, e))?;
        Ok(path)
    }

    /// Load, reconcile with `incoming`, sort and save
    ///
    /// Nothing is written when `incoming` is empty.
    pub fn merge(&self, date: NaiveDate, incoming: Vec<Entry>) -> Result<MergeReport> {
        let existing = self.load(date)?;
        let existing_count = existing.len();
        let incoming_count = incoming.len();

        if incoming.is_empty() {
            tracing::warn!(date = %date, "No entries to save");
            return Ok(MergeReport {
                existing: existing_count,
                incoming: 0,
                total: existing_count,
                written: false,
            });
        }

        let mut merged = reconcile(existing, incoming);
        sort_entries(&mut merged);
        let path = self.save(date, &merged)?;

        tracing::info!(
            path = %path.display(),
            existing = existing_count,
            incoming = incoming_count,
            total = merged.len(),
            "Snapshot saved"
        );

        Ok(MergeReport {
            existing: existing_count,
            incoming: incoming_count,
            total: merged.len(),
            written: true,
        })
    }
}

fn io_error(path: &Path, err: std::io::Error) -> ContextError {
    ContextError::StoreUnavailable {
        message: format!("snapshot io failed at {}", path.display()),
        source: Some(Box::new(err)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Review run writer
// ─────────────────────────────────────────────────────────────────────────────

/// An observation before the run stamps its date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationDraft {
    pub entity_id: String,
    pub entity_name: String,
    #[serde(default = "default_kind")]
    pub entity_kind: String,
    #[serde(default)]
    pub popularity: PopularityMetrics,
    #[serde(default)]
    pub commentary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_kind() -> String {
    "project".to_string()
}

impl ObservationDraft {
    pub fn into_observation(self, run_date: NaiveDate) -> Observation {
        Observation {
            entity_id: self.entity_id,
            entity_name: self.entity_name,
            entity_kind: self.entity_kind,
            observed_at: run_date,
            popularity: self.popularity,
            commentary: self.commentary,
            tags: self.tags,
        }
    }
}

/// Whether a run may be dated before the newest review already stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecordMode {
    /// Runs arrive in date order; an earlier `run_date` is rejected
    #[default]
    Chronological,
    /// Importing past runs; any `run_date` is accepted
    Backfill,
}

/// Append one review run; every row carries `run_date`
///
/// In [`RecordMode::Chronological`] a `run_date` before the newest stored
/// review is a config error and nothing is written. Re-recording the
/// newest date is allowed.
pub fn record_run(
    store: &ReviewStore,
    drafts: Vec<ObservationDraft>,
    run_date: NaiveDate,
    mode: RecordMode,
) -> Result<usize> {
    if mode == RecordMode::Chronological
        && let Some(latest) = store.latest_review_date()?
        && run_date < latest
    {
        tracing::warn!(%run_date, %latest, "Rejected backdated review run");
        return Err(ContextError::config(format!(
            "run date {run_date} is before the latest recorded review {latest}; \
             record it as a backfill to import past runs"
        )));
    }

    let observations: Vec<Observation> = drafts
        .into_iter()
        .map(|d| d.into_observation(run_date))
        .collect();
    let written = store.append_batch(&observations)?;
    tracing::info!(run_date = %run_date, written, "Review run recorded");
    Ok(written)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use pretty_assertions::assert_eq;

    fn entry(url: &str, title: &str, date: &str) -> Entry {
        Entry::new(title, url).with_date(date).with_source("blog")
    }

    fn sorted(mut entries: Vec<Entry>) -> Vec<Entry> {
        sort_entries(&mut entries);
        entries
    }

    struct FixedSource {
        name: &'static str,
        entries: Vec<Entry>,
    }

    #[async_trait]
    impl Source for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self) -> Result<Vec<Entry>> {
            Ok(self.entries.clone())
        }
    }

    struct DownSource;

    #[async_trait]
    impl Source for DownSource {
        fn name(&self) -> &str {
            "down"
        }

        async fn fetch(&self) -> Result<Vec<Entry>> {
            Err(ContextError::source_unavailable("connection reset"))
        }
    }

    fn entries(n: usize, prefix: &str) -> Vec<Entry> {
        (0..n)
            .map(|i| entry(&format!("https://{prefix}/{i}"), "t", "2024-06-01"))
            .collect()
    }

    #[test]
    fn test_reconcile_incoming_wins() {
        let existing = vec![entry("https://a", "old", "2024-06-01")];
        let incoming = vec![
            entry(" https://a ", "new", "2024-06-02"),
            entry("https://b", "b", "2024-06-01"),
        ];

        let merged = sorted(reconcile(existing, incoming));
        assert_eq!(merged.len(), 2);
        let a = merged.iter().find(|e| e.key() == "https://a").expect("a");
        assert_eq!(a.title, "new");
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let a = vec![
            entry("https://a", "a", "2024-06-01"),
            entry("https://b", "b", "2024-06-01"),
        ];
        let b = vec![
            entry("https://b", "b2", "2024-06-02"),
            entry("https://c", "c", "2024-06-03"),
        ];

        let once = sorted(reconcile(a, b.clone()));
        let twice = sorted(reconcile(once.clone(), b));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sort_entries_newest_first() {
        let merged = sorted(vec![
            entry("https://b", "b", "2024-06-01"),
            entry("https://a", "a", "2024-06-01"),
            entry("https://c", "c", "2024-06-03"),
        ]);
        let keys: Vec<&str> = merged.iter().map(Entry::key).collect();
        assert_eq!(keys, vec!["https://c", "https://a", "https://b"]);
    }

    #[test]
    fn test_entry_keeps_unknown_fields() {
        let json = r#"[{"title":"t","url":"https://x","content":"body","score":3}]"#;
        let parsed: Vec<Entry> = serde_json::from_str(json).expect("parse");
        assert_eq!(parsed[0].extra.get("score"), Some(&serde_json::json!(3)));
        assert_eq!(parsed[0].summary, "");

        let back = serde_json::to_value(&parsed[0]).expect("serialize");
        assert_eq!(back["content"], "body");
    }

    #[tokio::test]
    async fn test_primary_sufficient_skips_fallbacks() {
        let primary = FixedSource {
            name: "search",
            entries: entries(5, "search"),
        };
        let fallbacks: Vec<Box<dyn Source>> = vec![Box::new(FixedSource {
            name: "rss",
            entries: entries(3, "rss"),
        })];

        let gathered = gather_with_fallback(&primary, &fallbacks, 5).await;
        assert!(!gathered.used_fallback);
        assert_eq!(gathered.entries.len(), 5);
    }

    #[tokio::test]
    async fn test_short_primary_adds_fallbacks() {
        let primary = FixedSource {
            name: "search",
            entries: entries(2, "search"),
        };
        let fallbacks: Vec<Box<dyn Source>> = vec![
            Box::new(FixedSource {
                name: "rss",
                entries: entries(3, "rss"),
            }),
            Box::new(DownSource),
        ];

        let gathered = gather_with_fallback(&primary, &fallbacks, 5).await;
        assert!(gathered.used_fallback);
        assert_eq!(gathered.entries.len(), 5);
        assert_eq!(gathered.failed_sources, vec!["down".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_primary_is_absorbed() {
        let fallbacks: Vec<Box<dyn Source>> = vec![Box::new(FixedSource {
            name: "rss",
            entries: entries(1, "rss"),
        })];
        let gathered = gather_with_fallback(&DownSource, &fallbacks, 5).await;
        assert_eq!(gathered.entries.len(), 1);
        assert_eq!(gathered.failed_sources, vec!["down".to_string()]);
    }

    #[tokio::test]
    async fn test_json_file_source() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("entries.json");
        std::fs::write(&path, r#"[{"title":"t","url":"https://x"}]"#).expect("write");

        let source = JsonFileSource::new("file", &path);
        assert_eq!(source.fetch().await.expect("fetch").len(), 1);

        let missing = JsonFileSource::new("missing", dir.path().join("nope.json"));
        let err = missing.fetch().await.expect_err("missing file");
        assert_eq!(err.category(), ErrorCategory::SourceUnavailable);
    }

    #[test]
    fn test_snapshot_merge_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshot = DailySnapshot::new(dir.path().join("official"));
        let day = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap_or_default();

        assert!(snapshot.load(day).expect("load").is_empty());
        assert!(snapshot.path_for(day).ends_with("2024-06-15.json"));

        let first = snapshot
            .merge(day, vec![entry("https://a", "a", "2024-06-15")])
            .expect("merge");
        assert_eq!(
            first,
            MergeReport {
                existing: 0,
                incoming: 1,
                total: 1,
                written: true
            }
        );

        let second = snapshot
            .merge(
                day,
                vec![
                    entry("https://a", "a2", "2024-06-15"),
                    entry("https://b", "b", "2024-06-14"),
                ],
            )
            .expect("merge");
        assert_eq!(second.total, 2);

        let saved = snapshot.load(day).expect("load");
        assert_eq!(saved[0].title, "a2");
        assert_eq!(saved[1].key(), "https://b");

        let raw = std::fs::read_to_string(snapshot.path_for(day)).expect("read");
        assert!(raw.starts_with("[\n  {"));
    }

    #[test]
    fn test_snapshot_merge_empty_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let snapshot = DailySnapshot::new(dir.path());
        let day = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap_or_default();

        let report = snapshot.merge(day, Vec::new()).expect("merge");
        assert!(!report.written);
        assert!(!snapshot.path_for(day).exists());
    }

    #[test]
    fn test_record_run_stamps_run_date() {
        let store = ReviewStore::open_in_memory().expect("open");
        let run_date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap_or_default();
        let drafts: Vec<ObservationDraft> = serde_json::from_str(
            r#"[
                {"entity_id": "gh:ollama/ollama", "entity_name": "Ollama",
                 "popularity": {"stars": 100}, "tags": ["llm"]},
                {"entity_id": "pypi:pydantic", "entity_name": "pydantic",
                 "entity_kind": "package", "commentary": "validation"}
            ]"#,
        )
        .expect("drafts");

        assert_eq!(
            record_run(&store, drafts, run_date, RecordMode::Chronological).expect("record"),
            2
        );

        let rows = store.all_observations().expect("rows");
        assert!(rows.iter().all(|o| o.observed_at == run_date));
        let pydantic = rows
            .iter()
            .find(|o| o.entity_id == "pypi:pydantic")
            .expect("pydantic");
        assert_eq!(pydantic.entity_kind, "package");
        let ollama = rows
            .iter()
            .find(|o| o.entity_id == "gh:ollama/ollama")
            .expect("ollama");
        assert_eq!(ollama.entity_kind, "project");
        assert_eq!(ollama.popularity.stars, Some(100));
    }

    #[test]
    fn test_backdated_run_needs_backfill() {
        let store = ReviewStore::open_in_memory().expect("open");
        let draft = || ObservationDraft {
            entity_id: "gh:ollama/ollama".to_string(),
            entity_name: "Ollama".to_string(),
            entity_kind: "project".to_string(),
            popularity: PopularityMetrics::default(),
            commentary: None,
            tags: Vec::new(),
        };
        let june = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap_or_default();
        let may = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap_or_default();

        record_run(&store, vec![draft()], june, RecordMode::Chronological).expect("record");

        let err = record_run(&store, vec![draft()], may, RecordMode::Chronological)
            .expect_err("backdated run");
        assert_eq!(err.category(), ErrorCategory::ConfigError);
        assert_eq!(store.observation_count().expect("count"), 1);

        // Same day again is a re-run, not a backdate.
        record_run(&store, vec![draft()], june, RecordMode::Chronological).expect("same day");

        record_run(&store, vec![draft()], may, RecordMode::Backfill).expect("backfill");
        assert_eq!(store.observation_count().expect("count"), 3);
        assert_eq!(store.latest_review_date().expect("latest"), Some(june));
    }
}
