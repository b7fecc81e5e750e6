//! Semantic indexer
//!
//! Renders every review row into a [`VectorDocument`] and upserts the lot.
//! Ids are SHA-256 hashes of the rendered text, so unchanged rows map to
//! ids the backend already holds and are never embedded twice.

use crate::errors::Result;
use crate::store::{Observation, ReviewStore, format_date};
use crate::vector::{DocumentMetadata, VectorBackend, VectorDocument};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Outcome of one sync pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Rows read from the store
    pub scanned: usize,
    /// Documents newly written to the index
    pub indexed: usize,
    /// Documents the index already held
    pub skipped: usize,
}

/// Compute SHA-256 hash of content, hex encoded
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic text rendering of one observation
pub fn render_content(observation: &Observation) -> String {
    let tags = if observation.tags.is_empty() {
        "N/A".to_string()
    } else {
        observation.tags.join(", ")
    };
    let commentary = observation
        .commentary
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or("No commentary available");

    format!(
        "Project: {name}\n\
         Type: {kind}\n\
         Review Date: {date}\n\
         Stars: {stars}\n\
         Forks: {forks}\n\
         Downloads: {downloads}\n\
         Tags: {tags}\n\
         Commentary: {commentary}",
        name = observation.entity_name,
        kind = observation.entity_kind,
        date = format_date(observation.observed_at),
        stars = observation.popularity.stars.unwrap_or(0),
        forks = observation.popularity.forks.unwrap_or(0),
        downloads = observation.popularity.downloads.unwrap_or(0),
    )
}

/// Document for one observation, keyed by content hash
pub fn render_document(observation: &Observation) -> VectorDocument {
    let text = render_content(observation);
    VectorDocument {
        id: compute_hash(&text),
        metadata: DocumentMetadata {
            entity_id: observation.entity_id.clone(),
            entity_name: observation.entity_name.clone(),
            entity_kind: observation.entity_kind.clone(),
            observed_at: observation.observed_at,
            stars: observation.popularity.stars.unwrap_or(0),
            forks: observation.popularity.forks.unwrap_or(0),
            downloads: observation.popularity.downloads.unwrap_or(0),
        },
        text,
    }
}

/// Number of distinct documents a fully synced index holds
///
/// Rows that render identically share one content-hash id, so this can be
/// lower than the raw row count.
pub fn expected_document_count(store: &ReviewStore) -> Result<usize> {
    let ids: HashSet<String> = store
        .all_observations()?
        .iter()
        .map(|o| render_document(o).id)
        .collect();
    Ok(ids.len())
}

/// Bring the index up to date with the store
///
/// Reads the whole store each pass. Either every new document lands or, on
/// an embedding/storage error, none does.
pub async fn sync(store: &ReviewStore, index: &dyn VectorBackend) -> Result<SyncReport> {
    let observations = store.all_observations()?;
    let scanned = observations.len();
    if scanned == 0 {
        tracing::info!("No review history to index");
        return Ok(SyncReport::default());
    }

    let docs: Vec<VectorDocument> = observations.iter().map(render_document).collect();
    let stats = index.upsert(docs).await?;

    tracing::info!(
        backend = index.name(),
        scanned,
        indexed = stats.documents_indexed,
        skipped = stats.documents_skipped,
        duration_ms = stats.duration_ms,
        "Index sync complete"
    );

    Ok(SyncReport {
        scanned,
        indexed: stats.documents_indexed,
        skipped: stats.documents_skipped,
    })
}
