//! Acceptance tests for the context engine
//!
//! Drives `ContextEngine` end to end over on-disk stores:
//! - aggregates, lookups and returning-entity scans
//! - the HIGH → MEDIUM → LOW/UNAVAILABLE synthesis ladder
//! - idempotent re-sync and all-or-nothing indexing
//! - lock contention surfacing as a store timeout
//!
//! Uses the hashing embedder and mock generators, so no network is needed.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use async_trait::async_trait;
use chrono::NaiveDate;
use pulse_context::{
    Confidence, ContextConfig, ContextEngine, ContextError, ContextLookup, Embedder,
    ErrorCategory, Generator, HashingEmbedder, ObservationDraft, PopularityMetrics,
    RecurrenceOutcome, ReviewStore, SqliteVectorIndex, SyncOutcome, SyncReport, VectorBackend,
};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

// ─────────────────────────────────────────────────────────────────────────────
// Mock Implementations
// ─────────────────────────────────────────────────────────────────────────────

/// Generator that answers every prompt and counts calls
struct MockGenerator {
    calls: AtomicU32,
}

impl MockGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn model(&self) -> &str {
        "mock"
    }

    async fn complete(&self, _prompt: &str) -> pulse_context::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("Local inference keeps consolidating around a few runtimes.".to_string())
    }
}

/// Generator whose backend is down
struct DownGenerator;

#[async_trait]
impl Generator for DownGenerator {
    fn model(&self) -> &str {
        "down"
    }

    async fn complete(&self, _prompt: &str) -> pulse_context::Result<String> {
        Err(ContextError::generation("connection refused"))
    }
}

/// Embedder whose backend is down
struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    fn model(&self) -> &str {
        "down"
    }

    async fn embed(&self, _texts: &[String]) -> pulse_context::Result<Vec<Vec<f32>>> {
        Err(ContextError::embedding("connection refused"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn draft(id: &str, name: &str, stars: i64, commentary: &str) -> ObservationDraft {
    ObservationDraft {
        entity_id: id.to_string(),
        entity_name: name.to_string(),
        entity_kind: "project".to_string(),
        popularity: PopularityMetrics::stars(stars),
        commentary: Some(commentary.to_string()),
        tags: vec!["llm".to_string()],
    }
}

fn config_in(dir: &Path) -> ContextConfig {
    let mut cfg = ContextConfig::default();
    cfg.db_path = dir.join("review_history.db").display().to_string();
    cfg.index.path = dir.join("vector_index.db").display().to_string();
    cfg.store.busy_timeout_ms = 200;
    cfg.synthesis.timeout_secs = 5;
    cfg
}

fn engine_with(
    dir: &Path,
    embedder: Arc<dyn Embedder>,
    generator: Option<Arc<dyn Generator>>,
) -> ContextEngine {
    let cfg = config_in(dir);
    let store = ReviewStore::open(&cfg.resolved_db_path(), cfg.store.busy_timeout()).unwrap();
    let index = SqliteVectorIndex::open(
        &cfg.resolved_index_path(),
        cfg.store.busy_timeout(),
        embedder,
    )
    .unwrap();
    ContextEngine::new(cfg, store, Box::new(index), generator)
}

fn hashing() -> Arc<dyn Embedder> {
    Arc::new(HashingEmbedder::new(256).unwrap())
}

/// Three monthly Ollama reviews plus one unrelated project, in run order
fn seed(engine: &ContextEngine) {
    let ollama = |stars| {
        draft(
            "gh:ollama/ollama",
            "Ollama",
            stars,
            "local model runtime with a growing library",
        )
    };
    let qdrant = draft(
        "gh:qdrant/qdrant",
        "Qdrant",
        5,
        "vector database written in rust",
    );

    for (day, run) in [
        (date(2024, 1, 1), ollama(10)),
        (date(2024, 2, 1), ollama(20)),
        (date(2024, 2, 15), qdrant),
        (date(2024, 3, 1), ollama(30)),
    ] {
        engine.record_run(vec![run], day).unwrap();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retrieval
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn context_lookup_reports_aggregate_history() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), hashing(), None);
    seed(&engine);

    match engine.sync_index().await {
        SyncOutcome::Synced(report) => assert_eq!(report.indexed, 4),
        other => panic!("sync degraded: {other:?}"),
    }

    let ContextLookup::Found(ctx) = engine.context_for("Ollama").await else {
        panic!("expected Ollama history");
    };
    assert_eq!(ctx.entity_id, "gh:ollama/ollama");
    assert_eq!(ctx.first_seen, date(2024, 1, 1));
    assert_eq!(ctx.last_seen, date(2024, 3, 1));
    assert_eq!(ctx.total_mentions, 3);
    assert!((ctx.avg_popularity - 20.0).abs() < 1e-9);
    assert!(ctx.similarity_score > 0.0);
}

#[tokio::test]
async fn resync_leaves_index_and_lookups_unchanged() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), hashing(), None);
    seed(&engine);

    engine.sync_index().await;
    let count_before = engine.index().count().await.unwrap();
    let lookup_before = engine.context_for("Ollama").await;

    let second = engine.sync_index().await;
    assert_eq!(
        second,
        SyncOutcome::Synced(SyncReport {
            scanned: 4,
            indexed: 0,
            skipped: 4,
        })
    );
    assert_eq!(engine.index().count().await.unwrap(), count_before);

    let lookup_after = engine.context_for("Ollama").await;
    match (lookup_before, lookup_after) {
        (ContextLookup::Found(before), ContextLookup::Found(after)) => {
            assert_eq!(before.total_mentions, after.total_mentions);
            assert_eq!(before.first_seen, after.first_seen);
            assert_eq!(before.last_seen, after.last_seen);
            assert!((before.similarity_score - after.similarity_score).abs() < 1e-6);
        }
        other => panic!("lookups diverged: {other:?}"),
    }
}

#[tokio::test]
async fn index_survives_reopen_without_reembedding() {
    let dir = TempDir::new().unwrap();
    {
        let engine = engine_with(dir.path(), hashing(), None);
        seed(&engine);
        engine.sync_index().await;
        engine.close().unwrap();
    }

    let engine = engine_with(dir.path(), hashing(), None);
    assert_eq!(engine.index().count().await.unwrap(), 4);
    assert_eq!(
        engine.sync_index().await,
        SyncOutcome::Synced(SyncReport {
            scanned: 4,
            indexed: 0,
            skipped: 4,
        })
    );
}

#[tokio::test]
async fn embedding_outage_indexes_nothing() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), Arc::new(DownEmbedder), None);
    seed(&engine);

    match engine.sync_index().await {
        SyncOutcome::Unavailable(d) => {
            assert_eq!(d.category, ErrorCategory::EmbeddingUnavailable)
        }
        other => panic!("expected degradation, got {other:?}"),
    }
    assert_eq!(engine.index().count().await.unwrap(), 0);
    // The store has Ollama, so an empty index is an outage, not an absence.
    match engine.context_for("Ollama").await {
        ContextLookup::Unavailable(d) => {
            assert_eq!(d.category, ErrorCategory::EmbeddingUnavailable);
        }
        other => panic!("expected unavailable lookup, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Recurrence
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn returning_entities_respect_the_window() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), hashing(), None);
    engine
        .record_run(vec![draft("foo", "Foo", 1, "old")], date(2024, 5, 1))
        .unwrap();
    engine
        .record_run(vec![draft("bar", "Bar", 1, "recent")], date(2024, 6, 12))
        .unwrap();

    let RecurrenceOutcome::Returning(found) = engine.returning(&["Foo", "Bar"], date(2024, 6, 15))
    else {
        panic!("scan degraded");
    };
    let names: Vec<&str> = found.iter().map(|r| r.entity_name.as_str()).collect();
    assert_eq!(names, vec!["Foo"]);
}

#[tokio::test]
async fn locked_store_times_out() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), hashing(), None);

    let blocker = rusqlite::Connection::open(dir.path().join("review_history.db")).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    let err = engine
        .record_run(vec![draft("foo", "Foo", 1, "blocked")], date(2024, 6, 1))
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::StoreTimeout);

    blocker.execute_batch("ROLLBACK").unwrap();
    engine
        .record_run(vec![draft("foo", "Foo", 1, "unblocked")], date(2024, 6, 1))
        .unwrap();
}

#[tokio::test]
async fn backdated_run_is_rejected_unless_backfilled() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), hashing(), None);
    seed(&engine);

    let err = engine
        .record_run(vec![draft("foo", "Foo", 1, "late")], date(2024, 1, 15))
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::ConfigError);
    assert_eq!(engine.store().observation_count().unwrap(), 4);

    engine
        .backfill_run(vec![draft("foo", "Foo", 1, "late")], date(2024, 1, 15))
        .unwrap();
    match engine.returning(&["Foo"], date(2024, 6, 15)) {
        RecurrenceOutcome::Returning(found) => assert_eq!(found.len(), 1),
        other => panic!("scan degraded: {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesis ladder
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn synthesis_without_generator_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), hashing(), None);

    let result = engine
        .synthesize("summary", &serde_json::json!({}), Some(true))
        .await;
    assert_eq!(result.confidence, Confidence::Unavailable);
    assert!(result.error.is_none());
}

#[tokio::test]
async fn synthesis_with_empty_index_is_medium() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(MockGenerator::new());
    let engine = engine_with(dir.path(), hashing(), Some(generator.clone()));

    let result = engine
        .synthesize("local model runtimes", &serde_json::json!({"clusters": 2}), None)
        .await;
    assert_eq!(result.confidence, Confidence::Medium);
    assert!(!result.context_used);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn synthesis_with_history_is_high() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), hashing(), Some(Arc::new(MockGenerator::new())));
    seed(&engine);
    engine.sync_index().await;

    let result = engine
        .synthesize("local model runtime", &serde_json::json!({}), None)
        .await;
    assert_eq!(result.confidence, Confidence::High);
    assert!(result.context_used);
}

#[tokio::test]
async fn synthesis_backend_failure_is_low() {
    let dir = TempDir::new().unwrap();
    let engine = engine_with(dir.path(), hashing(), Some(Arc::new(DownGenerator)));
    seed(&engine);
    engine.sync_index().await;

    let result = engine
        .synthesize("local model runtime", &serde_json::json!({}), None)
        .await;
    assert_eq!(result.confidence, Confidence::Low);
    assert!(
        result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("connection refused"))
    );
}
