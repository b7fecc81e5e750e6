//! Adaptive context engine for the ecosystem pulse
//!
//! Keeps a durable, append-only history of project reviews and answers two
//! questions about it:
//! - have we seen this entity before, and what did we say? (`context_for`,
//!   `returning`)
//! - given today's cluster, what pattern is emerging? (`synthesize`)
//!
//! Data flow: `record_run` writes the review store → `sync_index` renders
//! rows into the vector index → retrieval and recurrence read both →
//! synthesis fuses retrieved history with the caller's summary.
//!
//! Lower layers propagate [`ContextError`] with `?`. The engine methods
//! below turn failures into degraded values instead, so one bad backend
//! never takes down a run.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod dense;
pub mod embedding;
pub mod errors;
pub mod indexer;
pub mod ingest;
pub mod ollama;
pub mod recurrence;
pub mod retriever;
pub mod store;
pub mod synthesis;
pub mod tfidf;
pub mod vector;

pub use config::{ContextConfig, IndexBackendKind};
pub use dense::SqliteVectorIndex;
pub use embedding::{Embedder, HashingEmbedder};
pub use errors::{ContextError, ErrorCategory, Result};
pub use indexer::{SyncReport, compute_hash, expected_document_count, render_document};
pub use ingest::{
    DailySnapshot, Entry, Gathered, JsonFileSource, MergeReport, ObservationDraft, RecordMode,
    Source, gather_with_fallback, reconcile, record_run, sort_entries,
};
pub use ollama::OllamaClient;
pub use recurrence::{RecurrenceOptions, find_returning};
pub use retriever::{ContextResult, ContextRetriever};
pub use store::{
    EntityAggregate, EntityMatcher, MatchStrategy, Observation, PopularityMetric,
    PopularityMetrics, ReviewStore,
};
pub use synthesis::{Confidence, Generator, SynthesisResult, Synthesizer};
pub use tfidf::TfIdfBackend;
pub use vector::{DocumentMetadata, IndexStats, ScoredDocument, VectorBackend, VectorDocument};

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ─────────────────────────────────────────────────────────────────────────────
// Degraded outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Why an operation could not consult its backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Degradation {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&ContextError> for Degradation {
    fn from(err: &ContextError) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

/// Result of an entity lookup
///
/// `Absent` means the history was consulted and holds nothing;
/// `Unavailable` means it could not be consulted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContextLookup {
    Found(ContextResult),
    Absent,
    Unavailable(Degradation),
}

/// Result of a returning-entity scan
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum RecurrenceOutcome {
    Returning(Vec<ContextResult>),
    Unavailable(Degradation),
}

/// Result of an index sync
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncOutcome {
    Synced(SyncReport),
    Unavailable(Degradation),
}

fn degrade(operation: &'static str, err: &ContextError) -> Degradation {
    tracing::warn!(
        operation,
        category = err.category().as_str(),
        error = %err,
        "Context engine degraded"
    );
    Degradation::from(err)
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Main entry point for context engine operations
pub struct ContextEngine {
    cfg: ContextConfig,
    store: ReviewStore,
    index: Box<dyn VectorBackend>,
    synthesizer: Synthesizer,
}

impl std::fmt::Debug for ContextEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextEngine")
            .field("store", &self.store)
            .field("index", &self.index.name())
            .field("synthesizer", &self.synthesizer)
            .finish_non_exhaustive()
    }
}

impl ContextEngine {
    /// Assemble an engine from explicit handles
    pub fn new(
        cfg: ContextConfig,
        store: ReviewStore,
        index: Box<dyn VectorBackend>,
        generator: Option<Arc<dyn Generator>>,
    ) -> Self {
        let synthesizer = Synthesizer::new(generator, cfg.synthesis.timeout());
        Self {
            cfg,
            store,
            index,
            synthesizer,
        }
    }

    /// Open the store and build backends as configured
    pub fn from_config(cfg: ContextConfig) -> Result<Self> {
        let store = ReviewStore::open(&cfg.resolved_db_path(), cfg.store.busy_timeout())?;

        let ollama = Arc::new(OllamaClient::new(&cfg.ollama)?);
        let index: Box<dyn VectorBackend> = match cfg.index.backend {
            IndexBackendKind::Ollama => Box::new(SqliteVectorIndex::open(
                &cfg.resolved_index_path(),
                cfg.store.busy_timeout(),
                ollama.clone(),
            )?),
            IndexBackendKind::Hashing => Box::new(SqliteVectorIndex::open(
                &cfg.resolved_index_path(),
                cfg.store.busy_timeout(),
                Arc::new(HashingEmbedder::new(cfg.index.hashing_dimensions)?),
            )?),
            IndexBackendKind::Lexical => Box::new(TfIdfBackend::new()),
        };

        let generator: Option<Arc<dyn Generator>> = if cfg.synthesis.enabled {
            Some(ollama)
        } else {
            None
        };

        tracing::info!(
            version = VERSION,
            db_path = %cfg.resolved_db_path().display(),
            index = index.name(),
            synthesis = cfg.synthesis.enabled,
            "Context engine initialized"
        );

        Ok(Self::new(cfg, store, index, generator))
    }

    pub fn config(&self) -> &ContextConfig {
        &self.cfg
    }

    pub fn store(&self) -> &ReviewStore {
        &self.store
    }

    pub fn index(&self) -> &dyn VectorBackend {
        self.index.as_ref()
    }

    pub fn retriever(&self) -> ContextRetriever<'_> {
        ContextRetriever::new(&self.store, self.index.as_ref(), &self.cfg.retrieval)
            .with_metric(self.cfg.store.popularity_metric)
    }

    /// Append one review run to the store; runs must not go back in time
    pub fn record_run(&self, drafts: Vec<ObservationDraft>, run_date: NaiveDate) -> Result<usize> {
        ingest::record_run(&self.store, drafts, run_date, RecordMode::Chronological)
    }

    /// Import a past run regardless of what is already stored
    pub fn backfill_run(&self, drafts: Vec<ObservationDraft>, run_date: NaiveDate) -> Result<usize> {
        ingest::record_run(&self.store, drafts, run_date, RecordMode::Backfill)
    }

    /// Bring the vector index up to date with the store
    pub async fn sync_index(&self) -> SyncOutcome {
        match indexer::sync(&self.store, self.index.as_ref()).await {
            Ok(report) => SyncOutcome::Synced(report),
            Err(e) => SyncOutcome::Unavailable(degrade("sync_index", &e)),
        }
    }

    /// What the history says about `name`
    pub async fn context_for(&self, name: &str) -> ContextLookup {
        match self.retriever().get_context(name).await {
            Ok(Some(result)) => ContextLookup::Found(result),
            Ok(None) => ContextLookup::Absent,
            Err(e) => ContextLookup::Unavailable(degrade("context_for", &e)),
        }
    }

    /// Entities of today's batch seen before the configured window
    pub fn returning<S: AsRef<str>>(&self, entities: &[S], today: NaiveDate) -> RecurrenceOutcome {
        let options = RecurrenceOptions {
            matcher: self.cfg.recurrence.matcher(),
            metric: self.cfg.store.popularity_metric,
            require_gap: self.cfg.recurrence.require_gap,
        };
        match find_returning(
            &self.store,
            entities,
            self.cfg.recurrence.days_back,
            today,
            options,
        ) {
            Ok(found) => RecurrenceOutcome::Returning(found),
            Err(e) => RecurrenceOutcome::Unavailable(degrade("returning", &e)),
        }
    }

    /// Outlook for a cluster summary; `use_context` defaults to config
    pub async fn synthesize(
        &self,
        summary: &str,
        prior_yield: &serde_json::Value,
        use_context: Option<bool>,
    ) -> SynthesisResult {
        let use_context = use_context.unwrap_or(self.cfg.synthesis.use_context);
        self.synthesizer
            .synthesize(&self.retriever(), summary, prior_yield, use_context)
            .await
    }

    /// Close the store connection
    pub fn close(self) -> Result<()> {
        self.store.close()
    }
}
