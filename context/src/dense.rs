//! Persistent dense vector index
//!
//! SQLite table of embeddings produced by an [`Embedder`]; search is a
//! brute-force cosine scan over the rows of the active model. Corpus sizes
//! here are thousands of rows, not millions.

use crate::embedding::{Embedder, cosine_similarity, validate_embeddings};
use crate::errors::{ContextError, Result};
use crate::vector::{
    DocumentMetadata, IndexStats, ScoredDocument, VectorBackend, VectorDocument, rank,
};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const SCHEMA_SQL: &str = include_str!("../VECTOR_SCHEMA.sql");

/// Dense index over an injected embedder
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for SqliteVectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorIndex")
            .field("model", &self.embedder.model())
            .finish_non_exhaustive()
    }
}

impl SqliteVectorIndex {
    pub fn open(path: &Path, busy_timeout: Duration, embedder: Arc<dyn Embedder>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ContextError::StoreUnavailable {
                    message: format!("failed to create index directory {}", parent.display()),
                    source: Some(Box::new(e)),
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            ContextError::from_sqlite(format!("failed to open index at {}", path.display()), e)
        })?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| ContextError::from_sqlite("failed to set busy timeout", e))?;

        tracing::debug!(path = %path.display(), model = embedder.model(), "Vector index opened");
        Self::from_connection(conn, embedder)
    }

    pub fn open_in_memory(embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ContextError::from_sqlite("failed to open in-memory index", e))?;
        Self::from_connection(conn, embedder)
    }

    fn from_connection(conn: Connection, embedder: Arc<dyn Embedder>) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| ContextError::from_sqlite("failed to apply index schema", e))?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| ContextError::internal("vector index lock poisoned"))?;
        f(&mut guard)
    }

    /// Documents of the batch not yet stored for the active model
    fn missing(&self, docs: Vec<VectorDocument>) -> Result<(Vec<VectorDocument>, usize)> {
        let model = self.embedder.model().to_string();
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT 1 FROM document_embeddings WHERE id = ?1 AND model = ?2")
                .map_err(|e| ContextError::from_sqlite("failed to prepare lookup", e))?;

            let mut seen = HashSet::new();
            let mut fresh = Vec::new();
            let mut skipped = 0usize;
            for doc in docs {
                let present = stmt
                    .query_row(params![doc.id, model], |_| Ok(()))
                    .optional()
                    .map_err(|e| ContextError::from_sqlite("failed to look up document", e))?
                    .is_some();
                if present || !seen.insert(doc.id.clone()) {
                    skipped += 1;
                } else {
                    fresh.push(doc);
                }
            }
            Ok((fresh, skipped))
        })
    }
}

#[async_trait]
impl VectorBackend for SqliteVectorIndex {
    fn name(&self) -> &'static str {
        "dense"
    }

    async fn upsert(&self, docs: Vec<VectorDocument>) -> Result<IndexStats> {
        let start = Instant::now();
        let (fresh, skipped) = self.missing(docs)?;

        if fresh.is_empty() {
            return Ok(IndexStats {
                documents_indexed: 0,
                documents_skipped: skipped,
                duration_ms: start.elapsed().as_millis() as u64,
            });
        }

        // Embed the whole batch before touching the table.
        let texts: Vec<String> = fresh.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed(&texts).await?;
        let dimension = validate_embeddings(fresh.len(), &vectors)?;

        let model = self.embedder.model().to_string();
        let indexed = self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| ContextError::from_sqlite("failed to begin transaction", e))?;
            {
                let mut stmt = tx
                    .prepare(
                        r#"
                        INSERT OR IGNORE INTO document_embeddings
                            (id, model, content, metadata, dimension, embedding)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        "#,
                    )
                    .map_err(|e| ContextError::from_sqlite("failed to prepare insert", e))?;

                for (doc, vector) in fresh.iter().zip(vectors.iter()) {
                    let metadata = serde_json::to_string(&doc.metadata).map_err(|e| {
                        ContextError::internal_with_source("failed to encode metadata", e)
                    })?;
                    stmt.execute(params![
                        doc.id,
                        model,
                        doc.text,
                        metadata,
                        dimension as i64,
                        encode_f32_blob(vector),
                    ])
                    .map_err(|e| ContextError::from_sqlite("failed to insert embedding", e))?;
                }
            }
            tx.commit()
                .map_err(|e| ContextError::from_sqlite("failed to commit embeddings", e))?;
            Ok(fresh.len())
        })?;

        Ok(IndexStats {
            documents_indexed: indexed,
            documents_skipped: skipped,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ScoredDocument>> {
        if k == 0 || query.trim().is_empty() || self.count().await? == 0 {
            return Ok(Vec::new());
        }

        let vectors = self.embedder.embed(&[query.to_string()]).await?;
        validate_embeddings(1, &vectors)?;
        let Some(query_vector) = vectors.into_iter().next() else {
            return Ok(Vec::new());
        };

        let model = self.embedder.model().to_string();
        let hits = self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, content, metadata, dimension, embedding
                    FROM document_embeddings
                    WHERE model = ?1
                    "#,
                )
                .map_err(|e| ContextError::from_sqlite("failed to prepare scan", e))?;

            let rows = stmt
                .query_map(params![model], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Vec<u8>>(4)?,
                    ))
                })
                .map_err(|e| ContextError::from_sqlite("failed to scan embeddings", e))?;

            let mut hits = Vec::new();
            for row in rows {
                let (id, text, metadata, dimension, blob) =
                    row.map_err(|e| ContextError::from_sqlite("failed to read embedding", e))?;
                let vector = decode_f32_blob(&blob, usize::try_from(dimension).unwrap_or(0))?;
                let Some(score) = cosine_similarity(&query_vector, &vector) else {
                    continue;
                };
                let metadata: DocumentMetadata = serde_json::from_str(&metadata).map_err(|e| {
                    ContextError::internal_with_source("failed to decode metadata", e)
                })?;
                hits.push(ScoredDocument {
                    id,
                    score,
                    text,
                    metadata,
                });
            }
            Ok(hits)
        })?;

        Ok(rank(hits, k))
    }

    async fn count(&self) -> Result<usize> {
        let model = self.embedder.model().to_string();
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM document_embeddings WHERE model = ?1",
                    params![model],
                    |row| row.get(0),
                )
                .map_err(|e| ContextError::from_sqlite("failed to count embeddings", e))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
    }
}

fn encode_f32_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_f32_blob(blob: &[u8], dimension: usize) -> Result<Vec<f32>> {
    let expected_len = dimension * std::mem::size_of::<f32>();
    if blob.len() != expected_len {
        return Err(ContextError::internal(format!(
            "invalid embedding byte length: expected {expected_len}, got {}",
            blob.len()
        )));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
