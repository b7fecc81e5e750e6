//! VectorBackend trait and document types
//!
//! The vector index owns [`VectorDocument`]s; the review store owns the
//! observations they are rendered from. Documents carry a copy of the
//! structured fields so retrieval never needs a store round-trip.
//!
//! Backends expose exactly three operations: `upsert`, `similarity_search`
//! and `count`. Document ids are content hashes, so `upsert` skips ids it
//! already holds and a re-sync over an unchanged store is a no-op.

use crate::errors::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Structured copy of the observation a document was rendered from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub entity_id: String,
    pub entity_name: String,
    pub entity_kind: String,
    pub observed_at: NaiveDate,
    #[serde(default)]
    pub stars: i64,
    #[serde(default)]
    pub forks: i64,
    #[serde(default)]
    pub downloads: i64,
}

/// Document to be indexed in the vector backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Content hash of `text`
    pub id: String,

    /// Rendered text to be indexed/embedded
    pub text: String,

    pub metadata: DocumentMetadata,
}

/// Search hit with relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,

    /// Relevance score (higher = more relevant). Scales differ per backend:
    /// cosine similarity for dense indexes, BM25 for the lexical one.
    pub score: f64,

    pub text: String,

    pub metadata: DocumentMetadata,
}

impl ScoredDocument {
    pub fn from_document(doc: &VectorDocument, score: f64) -> Self {
        Self {
            id: doc.id.clone(),
            score,
            text: doc.text.clone(),
            metadata: doc.metadata.clone(),
        }
    }
}

/// Statistics from an upsert
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Documents newly written
    pub documents_indexed: usize,

    /// Documents whose id was already present
    pub documents_skipped: usize,

    /// Upsert duration in milliseconds
    pub duration_ms: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// VectorBackend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for pluggable vector search backends
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Short name for logs and `doctor`
    fn name(&self) -> &'static str;

    /// Index a batch of documents, skipping ids already present
    ///
    /// All-or-nothing: on error no document of the batch is visible.
    async fn upsert(&self, docs: Vec<VectorDocument>) -> Result<IndexStats>;

    /// Up to `k` documents nearest to `query`, sorted by score descending
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>>;

    /// Number of indexed documents
    async fn count(&self) -> Result<usize>;
}

/// Sort hits by score descending, ties broken by id, and cut to `k`
pub(crate) fn rank(mut hits: Vec<ScoredDocument>, k: usize) -> Vec<ScoredDocument> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
