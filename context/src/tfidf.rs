//! In-memory BM25 vector backend
//!
//! Lexical stand-in for the dense index: no embedding service, nothing on
//! disk, rebuilt from the review store on every run. Suitable for offline
//! use and tests.
//!
//! Scoring:
//! - BM25 term frequency (k1, b)
//! - IDF with smoothing: log((N + 1) / (df + 1)) + 1
//!
//! The rendered field labels ("Project:", "Stars:", ...) occur in every
//! document and are dropped at tokenization so a lookup for an unknown name
//! does not match everything through its label.

use crate::errors::{ContextError, Result};
use crate::vector::{IndexStats, ScoredDocument, VectorBackend, VectorDocument, rank};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// BM25 parameters
#[derive(Debug, Clone)]
pub struct TfIdfConfig {
    /// Term frequency saturation; typical range 1.2 - 2.0
    pub k1: f64,

    /// Length normalization: 0 = none, 1 = full
    pub b: f64,
}

impl Default for TfIdfConfig {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Types
// ─────────────────────────────────────────────────────────────────────────────

/// Indexed document with pre-computed term frequencies
#[derive(Debug, Clone)]
struct IndexedDoc {
    doc: VectorDocument,
    tf: HashMap<String, usize>,
    length: usize,
}

impl IndexedDoc {
    fn from_document(doc: VectorDocument) -> Self {
        let tokens = tokenize(&doc.text);
        let length = tokens.len();

        let mut tf = HashMap::new();
        for token in tokens {
            *tf.entry(token).or_insert(0) += 1;
        }

        Self { doc, tf, length }
    }
}

#[derive(Debug, Default)]
struct IndexState {
    documents: HashMap<String, IndexedDoc>,
    df: HashMap<String, usize>,
    avg_doc_length: f64,
}

impl IndexState {
    fn recompute_stats(&mut self) {
        let mut df: HashMap<String, usize> = HashMap::new();
        let mut total_length = 0usize;

        for indexed in self.documents.values() {
            for token in indexed.tf.keys() {
                *df.entry(token.clone()).or_insert(0) += 1;
            }
            total_length += indexed.length;
        }

        self.df = df;
        self.avg_doc_length = if self.documents.is_empty() {
            0.0
        } else {
            total_length as f64 / self.documents.len() as f64
        };
    }

    fn score(&self, config: &TfIdfConfig, indexed: &IndexedDoc, query_tokens: &[String]) -> f64 {
        let n = self.documents.len() as f64;
        if n == 0.0 || self.avg_doc_length == 0.0 {
            return 0.0;
        }

        let doc_len = indexed.length as f64;
        let mut score = 0.0;

        for token in query_tokens {
            let tf = *indexed.tf.get(token).unwrap_or(&0) as f64;
            if tf == 0.0 {
                continue;
            }

            let doc_freq = *self.df.get(token).unwrap_or(&0) as f64;
            let idf = ((n + 1.0) / (doc_freq + 1.0)).ln() + 1.0;
            let tf_norm = (tf * (config.k1 + 1.0))
                / (tf + config.k1 * (1.0 - config.b + config.b * doc_len / self.avg_doc_length));

            score += idf * tf_norm;
        }

        score
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TfIdfBackend
// ─────────────────────────────────────────────────────────────────────────────

/// In-memory BM25 backend
#[derive(Debug, Default)]
pub struct TfIdfBackend {
    config: TfIdfConfig,
    state: RwLock<IndexState>,
}

impl TfIdfBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> ContextError {
    ContextError::internal("lexical index lock poisoned")
}

#[async_trait]
impl VectorBackend for TfIdfBackend {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn upsert(&self, docs: Vec<VectorDocument>) -> Result<IndexStats> {
        let start = Instant::now();
        let mut state = self.state.write().map_err(|_| poisoned())?;

        let mut indexed = 0usize;
        let mut skipped = 0usize;
        for doc in docs {
            if state.documents.contains_key(&doc.id) {
                skipped += 1;
                continue;
            }
            state
                .documents
                .insert(doc.id.clone(), IndexedDoc::from_document(doc));
            indexed += 1;
        }

        if indexed > 0 {
            state.recompute_stats();
        }

        Ok(IndexStats {
            documents_indexed: indexed,
            documents_skipped: skipped,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let state = self.state.read().map_err(|_| poisoned())?;
        let hits = state
            .documents
            .values()
            .filter_map(|indexed| {
                let score = state.score(&self.config, indexed, &query_tokens);
                (score > 0.0).then(|| ScoredDocument::from_document(&indexed.doc, score))
            })
            .collect();

        Ok(rank(hits, k))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.read().map_err(|_| poisoned())?.documents.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tokenization
// ─────────────────────────────────────────────────────────────────────────────

/// Lowercase, split on non-alphanumeric, drop short tokens, stop words and
/// document field labels
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| s.len() >= 2)
        .filter(|s| !is_stop_word(s) && !is_field_label(s))
        .map(str::to_string)
        .collect()
}

fn is_field_label(word: &str) -> bool {
    const LABELS: &[&str] = &[
        "project",
        "type",
        "review",
        "date",
        "stars",
        "forks",
        "downloads",
        "tags",
        "commentary",
    ];
    LABELS.contains(&word)
}

fn is_stop_word(word: &str) -> bool {
    const STOP_WORDS: &[&str] = &[
        "the", "be", "to", "of", "and", "in", "that", "have", "it", "for", "not", "on", "with",
        "as", "you", "do", "at", "this", "but", "by", "from", "they", "we", "or", "an", "will",
        "all", "there", "their", "what", "so", "up", "out", "if", "about", "which", "can", "no",
        "into", "your", "some", "them", "than", "then", "now", "only", "its", "over", "also",
        "after", "how", "our", "any", "these", "most", "is", "was", "are", "been", "were", "na",
    ];

    STOP_WORDS.contains(&word)
}
