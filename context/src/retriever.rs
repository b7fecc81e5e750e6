//! Context retriever
//!
//! Nearest-neighbour lookups over the vector index, cross-referenced with
//! the review store for temporal statistics.

use crate::config::RetrievalConfig;
use crate::errors::{ContextError, Result};
use crate::store::{
    EntityAggregate, EntityMatcher, MatchStrategy, PopularityMetric, ReviewStore,
};
use crate::vector::{ScoredDocument, VectorBackend};
use chrono::NaiveDate;
use serde::Serialize;

/// What the engine knows about one entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextResult {
    pub entity_id: String,
    pub entity_name: String,
    pub entity_kind: String,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub total_mentions: u64,
    /// Mean of the configured popularity metric; 0.0 when never recorded
    pub avg_popularity: f64,
    pub last_commentary: Option<String>,
    /// Score of the nearest index hit; 0.0 for store-only lookups
    pub similarity_score: f64,
}

impl ContextResult {
    pub fn from_aggregate(aggregate: EntityAggregate, similarity_score: f64) -> Self {
        Self {
            entity_id: aggregate.entity_id,
            entity_name: aggregate.entity_name,
            entity_kind: aggregate.entity_kind,
            first_seen: aggregate.first_seen,
            last_seen: aggregate.last_seen,
            total_mentions: aggregate.total_mentions,
            avg_popularity: aggregate.avg_popularity.unwrap_or(0.0),
            last_commentary: aggregate.last_commentary,
            similarity_score,
        }
    }
}

/// Retriever over borrowed store and index handles
pub struct ContextRetriever<'a> {
    store: &'a ReviewStore,
    index: &'a dyn VectorBackend,
    config: &'a RetrievalConfig,
    metric: PopularityMetric,
}

impl<'a> ContextRetriever<'a> {
    pub fn new(
        store: &'a ReviewStore,
        index: &'a dyn VectorBackend,
        config: &'a RetrievalConfig,
    ) -> Self {
        Self {
            store,
            index,
            config,
            metric: PopularityMetric::default(),
        }
    }

    pub fn with_metric(mut self, metric: PopularityMetric) -> Self {
        self.metric = metric;
        self
    }

    /// History of the entity whose documents sit nearest to `name`
    ///
    /// The nearest hit names the canonical entity; the aggregate is computed
    /// against the store by exact match on that name. `None` when neither
    /// the index nor the store knows the entity. An index that misses an
    /// entity the store holds has not been synced, which is an
    /// [`ContextError::EmbeddingUnavailable`] rather than an absence.
    pub async fn get_context(&self, name: &str) -> Result<Option<ContextResult>> {
        let query = self.config.entity_query(name);
        let hits = self
            .index
            .similarity_search(&query, self.config.context_k)
            .await?;

        let Some(best) = hits.into_iter().next() else {
            let stored = self
                .store
                .query_by_entity(EntityMatcher::new(MatchStrategy::Exact, false), name, None)?;
            if !stored.is_empty() {
                tracing::warn!(
                    name,
                    rows = stored.len(),
                    "Index has no documents for a stored entity"
                );
                return Err(ContextError::embedding(format!(
                    "index has no documents for {name} although the store holds {} review(s); run sync",
                    stored.len()
                )));
            }
            tracing::debug!(name, "No index hit for entity");
            return Ok(None);
        };

        let canonical = best.metadata.entity_name.as_str();
        let aggregate =
            self.store
                .aggregate_by_entity(EntityMatcher::exact(), canonical, None, self.metric)?;

        if canonical != name {
            tracing::debug!(name, canonical, score = best.score, "Resolved entity by similarity");
        }

        Ok(aggregate.map(|agg| ContextResult::from_aggregate(agg, best.score)))
    }

    /// Documents most relevant to a free-text summary, nearest first
    pub async fn get_relevant_history(&self, summary: &str) -> Result<Vec<ScoredDocument>> {
        self.index
            .similarity_search(summary, self.config.history_k)
            .await
    }
}
