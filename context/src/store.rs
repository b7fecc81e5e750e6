//! Durable review store
//!
//! Append-only SQLite log of observations, one row per (entity, date):
//! - `append` / `append_batch` insert and never overwrite
//! - `query_by_entity` returns matching rows, optionally before a date
//! - `aggregate_by_entity` folds matching rows per `entity_id`
//!
//! Every statement waits at most `busy_timeout` on a locked database; lock
//! contention surfaces as `StoreTimeout`, any other failure as
//! `StoreUnavailable`.

use crate::errors::{ContextError, Result};
use chrono::NaiveDate;
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Embedded schema, applied idempotently on open
const SCHEMA_SQL: &str = include_str!("../REVIEW_SCHEMA.sql");

/// Storage format of `review_date`
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQL function registered on every connection for normalized matching
const NORMALIZE_FN: &str = "pulse_normalize";

/// Unicode lowercase; SQLite's built-in `lower()` only folds ASCII
const LOWER_FN: &str = "pulse_lower";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Popularity counters recorded with an observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopularityMetrics {
    #[serde(default)]
    pub stars: Option<i64>,
    #[serde(default)]
    pub forks: Option<i64>,
    #[serde(default)]
    pub downloads: Option<i64>,
}

impl PopularityMetrics {
    pub fn new(stars: Option<i64>, forks: Option<i64>, downloads: Option<i64>) -> Self {
        Self {
            stars,
            forks,
            downloads,
        }
    }

    /// Stars only, the common case
    pub fn stars(stars: i64) -> Self {
        Self {
            stars: Some(stars),
            ..Self::default()
        }
    }

    pub fn get(&self, metric: PopularityMetric) -> Option<i64> {
        match metric {
            PopularityMetric::Stars => self.stars,
            PopularityMetric::Forks => self.forks,
            PopularityMetric::Downloads => self.downloads,
        }
    }
}

/// Column averaged into `avg_popularity`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopularityMetric {
    #[default]
    Stars,
    Forks,
    Downloads,
}

impl PopularityMetric {
    /// Column name; a closed set, never user text
    fn column(self) -> &'static str {
        match self {
            Self::Stars => "stars",
            Self::Forks => "forks",
            Self::Downloads => "downloads",
        }
    }
}

/// One immutable sighting of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub entity_id: String,
    pub entity_name: String,
    #[serde(default = "default_entity_kind")]
    pub entity_kind: String,
    pub observed_at: NaiveDate,
    #[serde(default)]
    pub popularity: PopularityMetrics,
    #[serde(default)]
    pub commentary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_entity_kind() -> String {
    "project".to_string()
}

impl Observation {
    pub fn new(
        entity_id: impl Into<String>,
        entity_name: impl Into<String>,
        observed_at: NaiveDate,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_name: entity_name.into(),
            entity_kind: default_entity_kind(),
            observed_at,
            popularity: PopularityMetrics::default(),
            commentary: None,
            tags: Vec::new(),
        }
    }

    pub fn with_popularity(mut self, popularity: PopularityMetrics) -> Self {
        self.popularity = popularity;
        self
    }

    pub fn with_commentary(mut self, commentary: impl Into<String>) -> Self {
        self.commentary = Some(commentary.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.entity_id.trim().is_empty() {
            return Err(ContextError::internal("observation entity_id is empty"));
        }
        if self.entity_name.trim().is_empty() {
            return Err(ContextError::internal(format!(
                "observation {} has an empty entity_name",
                self.entity_id
            )));
        }
        Ok(())
    }
}

/// Aggregate history of one entity identity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityAggregate {
    pub entity_id: String,
    /// Name on the most recent matching row
    pub entity_name: String,
    pub entity_kind: String,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
    pub total_mentions: u64,
    /// Mean over rows carrying the metric; `None` when no row does
    pub avg_popularity: Option<f64>,
    /// Commentary of the latest row that has one
    pub last_commentary: Option<String>,
}

/// How a caller-supplied name is compared with `project_name`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Whole-name equality
    Exact,
    /// Name contains the query ("Ollama" matches "Ollama-turbo")
    #[default]
    Substring,
    /// Equality after case folding and dropping non-alphanumerics
    Normalized,
}

/// Matching strategy plus case sensitivity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityMatcher {
    pub strategy: MatchStrategy,
    pub case_sensitive: bool,
}

impl EntityMatcher {
    pub fn new(strategy: MatchStrategy, case_sensitive: bool) -> Self {
        Self {
            strategy,
            case_sensitive,
        }
    }

    /// Case-sensitive whole-name equality
    pub fn exact() -> Self {
        Self::new(MatchStrategy::Exact, true)
    }

    /// SQL predicate over `project_name`, bound to `?1`
    fn predicate(&self) -> &'static str {
        match (self.strategy, self.case_sensitive) {
            (MatchStrategy::Exact, true) => "project_name = ?1",
            (MatchStrategy::Exact, false) => "pulse_lower(project_name) = pulse_lower(?1)",
            (MatchStrategy::Substring, true) => "instr(project_name, ?1) > 0",
            (MatchStrategy::Substring, false) => {
                "instr(pulse_lower(project_name), pulse_lower(?1)) > 0"
            }
            (MatchStrategy::Normalized, _) => "pulse_normalize(project_name) = ?1",
        }
    }

    fn bind_value(&self, name: &str) -> String {
        match self.strategy {
            MatchStrategy::Normalized => normalize_entity_name(name),
            MatchStrategy::Exact | MatchStrategy::Substring => name.to_string(),
        }
    }

    /// Same comparison in Rust, for callers filtering in memory
    pub fn matches(&self, candidate: &str, query: &str) -> bool {
        match (self.strategy, self.case_sensitive) {
            (MatchStrategy::Exact, true) => candidate == query,
            (MatchStrategy::Exact, false) => candidate.to_lowercase() == query.to_lowercase(),
            (MatchStrategy::Substring, true) => candidate.contains(query),
            (MatchStrategy::Substring, false) => {
                candidate.to_lowercase().contains(&query.to_lowercase())
            }
            (MatchStrategy::Normalized, _) => {
                normalize_entity_name(candidate) == normalize_entity_name(query)
            }
        }
    }
}

/// Lowercase and keep only alphanumerics: "Open WebUI" == "open-webui"
pub fn normalize_entity_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// ReviewStore
// ─────────────────────────────────────────────────────────────────────────────

/// Review history database wrapper
pub struct ReviewStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl std::fmt::Debug for ReviewStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl ReviewStore {
    /// Open (creating if needed) the store at `path`
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| ContextError::StoreUnavailable {
                    message: format!("failed to create store directory {}", parent.display()),
                    source: Some(Box::new(e)),
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| {
            ContextError::from_sqlite(format!("failed to open store at {}", path.display()), e)
        })?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| ContextError::from_sqlite("failed to set busy timeout", e))?;
        // WAL lets readers proceed while the ingestion run writes.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .map_err(|e| ContextError::from_sqlite("failed to enable WAL", e))?;

        Self::prepare_connection(&conn)?;

        tracing::debug!(
            path = %path.display(),
            busy_timeout_ms = busy_timeout.as_millis() as u64,
            "Review store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ContextError::from_sqlite("failed to open in-memory store", e))?;
        Self::prepare_connection(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Flush and close the underlying connection
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .map_err(|_| ContextError::internal("review store lock poisoned"))?;
        conn.close()
            .map_err(|(_, e)| ContextError::from_sqlite("failed to close store", e))
    }

    /// Backing file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn prepare_connection(conn: &Connection) -> Result<()> {
        conn.create_scalar_function(
            NORMALIZE_FN,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let value: Option<String> = ctx.get(0)?;
                Ok(value.map(|v| normalize_entity_name(&v)))
            },
        )
        .map_err(|e| ContextError::from_sqlite("failed to register normalize function", e))?;

        conn.create_scalar_function(
            LOWER_FN,
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| {
                let value: Option<String> = ctx.get(0)?;
                Ok(value.map(|v| v.to_lowercase()))
            },
        )
        .map_err(|e| ContextError::from_sqlite("failed to register lowercase function", e))?;

        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| ContextError::from_sqlite("failed to apply schema", e))?;
        Ok(())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| ContextError::internal("review store lock poisoned"))?;
        f(&mut guard)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Append one observation, returning its row id
    pub fn append(&self, observation: &Observation) -> Result<i64> {
        observation.validate()?;
        self.with_conn(|conn| {
            insert_observation(conn, observation)?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Append a batch in one transaction; either every row lands or none does
    pub fn append_batch(&self, observations: &[Observation]) -> Result<usize> {
        for observation in observations {
            observation.validate()?;
        }

        self.with_conn(|conn| {
            let tx = conn
                .transaction()
                .map_err(|e| ContextError::from_sqlite("failed to begin transaction", e))?;
            for observation in observations {
                insert_observation(&tx, observation)?;
            }
            tx.commit()
                .map_err(|e| ContextError::from_sqlite("failed to commit observations", e))?;
            Ok(observations.len())
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Every observation, newest first
    pub fn all_observations(&self) -> Result<Vec<Observation>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT project_identifier, project_name, project_type, review_date,
                           stars, forks, downloads, generated_commentary, tags
                    FROM project_reviews
                    ORDER BY review_date DESC, id DESC
                    "#,
                )
                .map_err(|e| ContextError::from_sqlite("failed to prepare query", e))?;

            let rows = stmt
                .query_map([], observation_from_row)
                .map_err(|e| ContextError::from_sqlite("failed to query observations", e))?;

            collect_rows(rows)
        })
    }

    /// Observations whose name matches `name`, optionally strictly before a date
    pub fn query_by_entity(
        &self,
        matcher: EntityMatcher,
        name: &str,
        before: Option<NaiveDate>,
    ) -> Result<Vec<Observation>> {
        let sql = format!(
            r#"
            SELECT project_identifier, project_name, project_type, review_date,
                   stars, forks, downloads, generated_commentary, tags
            FROM project_reviews
            WHERE {predicate} AND (?2 IS NULL OR review_date < ?2)
            ORDER BY review_date DESC, id DESC
            "#,
            predicate = matcher.predicate()
        );
        let bound = matcher.bind_value(name);
        let before = before.map(format_date);

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ContextError::from_sqlite("failed to prepare query", e))?;
            let rows = stmt
                .query_map(params![bound, before], observation_from_row)
                .map_err(|e| ContextError::from_sqlite("failed to query entity rows", e))?;
            collect_rows(rows)
        })
    }

    /// Whether any matching row falls in `[from, until)`
    pub fn has_observation_between(
        &self,
        matcher: EntityMatcher,
        name: &str,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<bool> {
        let sql = format!(
            r#"
            SELECT 1 FROM project_reviews
            WHERE {predicate} AND review_date >= ?2 AND review_date < ?3
            LIMIT 1
            "#,
            predicate = matcher.predicate()
        );
        let bound = matcher.bind_value(name);

        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    &sql,
                    params![bound, format_date(from), format_date(until)],
                    |_| Ok(()),
                )
                .optional()
                .map_err(|e| ContextError::from_sqlite("failed to probe entity window", e))?;
            Ok(found.is_some())
        })
    }

    /// Per-identity aggregates for matching rows, most recently seen first
    pub fn aggregates_by_entity(
        &self,
        matcher: EntityMatcher,
        name: &str,
        before: Option<NaiveDate>,
        metric: PopularityMetric,
    ) -> Result<Vec<EntityAggregate>> {
        let sql = format!(
            r#"
            WITH matched AS (
                SELECT * FROM project_reviews
                WHERE {predicate} AND (?2 IS NULL OR review_date < ?2)
            )
            SELECT m.project_identifier,
                   MIN(m.review_date),
                   MAX(m.review_date),
                   COUNT(*),
                   AVG(m.{metric}),
                   (SELECT l.project_name FROM matched l
                     WHERE l.project_identifier = m.project_identifier
                     ORDER BY l.review_date DESC, l.id DESC LIMIT 1),
                   (SELECT l.project_type FROM matched l
                     WHERE l.project_identifier = m.project_identifier
                     ORDER BY l.review_date DESC, l.id DESC LIMIT 1),
                   (SELECT l.generated_commentary FROM matched l
                     WHERE l.project_identifier = m.project_identifier
                       AND l.generated_commentary IS NOT NULL
                       AND l.generated_commentary <> ''
                     ORDER BY l.review_date DESC, l.id DESC LIMIT 1)
            FROM matched m
            GROUP BY m.project_identifier
            ORDER BY MAX(m.review_date) DESC, m.project_identifier ASC
            "#,
            predicate = matcher.predicate(),
            metric = metric.column()
        );
        let bound = matcher.bind_value(name);
        let before = before.map(format_date);

        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| ContextError::from_sqlite("failed to prepare aggregate", e))?;
            let rows = stmt
                .query_map(params![bound, before], |row| {
                    let first_seen: String = row.get(1)?;
                    let last_seen: String = row.get(2)?;
                    let count: i64 = row.get(3)?;
                    Ok(EntityAggregate {
                        entity_id: row.get(0)?,
                        first_seen: parse_date(1, &first_seen)?,
                        last_seen: parse_date(2, &last_seen)?,
                        total_mentions: u64::try_from(count).unwrap_or_default(),
                        avg_popularity: row.get(4)?,
                        entity_name: row.get(5)?,
                        entity_kind: row.get(6)?,
                        last_commentary: row.get(7)?,
                    })
                })
                .map_err(|e| ContextError::from_sqlite("failed to aggregate entity rows", e))?;
            collect_rows(rows)
        })
    }

    /// Aggregate for the most recently seen identity matching `name`
    pub fn aggregate_by_entity(
        &self,
        matcher: EntityMatcher,
        name: &str,
        before: Option<NaiveDate>,
        metric: PopularityMetric,
    ) -> Result<Option<EntityAggregate>> {
        let mut groups = self.aggregates_by_entity(matcher, name, before, metric)?;
        if groups.len() > 1 {
            tracing::debug!(
                name,
                identities = groups.len(),
                "Several identities match; using the most recently seen"
            );
        }
        Ok(if groups.is_empty() {
            None
        } else {
            Some(groups.swap_remove(0))
        })
    }

    /// Row count (for metrics/debugging)
    /// Most recent `review_date` in the store, `None` when empty
    pub fn latest_review_date(&self) -> Result<Option<NaiveDate>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT MAX(review_date) FROM project_reviews",
                [],
                |row| {
                    let raw: Option<String> = row.get(0)?;
                    raw.map(|r| parse_date(0, &r)).transpose()
                },
            )
            .map_err(|e| ContextError::from_sqlite("failed to read latest review date", e))
        })
    }

    pub fn observation_count(&self) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM project_reviews", [], |row| row.get(0))
                .map_err(|e| ContextError::from_sqlite("failed to count observations", e))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn insert_observation(conn: &Connection, observation: &Observation) -> Result<()> {
    let tags = encode_tags(&observation.tags)?;
    conn.execute(
        r#"
        INSERT INTO project_reviews
            (project_identifier, project_name, project_type, review_date,
             stars, forks, downloads, generated_commentary, tags)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            observation.entity_id,
            observation.entity_name,
            observation.entity_kind,
            format_date(observation.observed_at),
            observation.popularity.stars,
            observation.popularity.forks,
            observation.popularity.downloads,
            observation.commentary,
            tags,
        ],
    )
    .map_err(|e| ContextError::from_sqlite("failed to append observation", e))?;
    Ok(())
}

fn observation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Observation> {
    let review_date: String = row.get(3)?;
    let tags: Option<String> = row.get(8)?;
    Ok(Observation {
        entity_id: row.get(0)?,
        entity_name: row.get(1)?,
        entity_kind: row.get(2)?,
        observed_at: parse_date(3, &review_date)?,
        popularity: PopularityMetrics::new(row.get(4)?, row.get(5)?, row.get(6)?),
        commentary: row.get(7)?,
        tags: decode_tags(tags.as_deref()),
    })
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(|e| ContextError::from_sqlite("failed to read row", e))?);
    }
    Ok(out)
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Accepts `YYYY-MM-DD` and anything prefixed by it (RFC 3339 timestamps)
fn parse_date(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, DATE_FORMAT).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn encode_tags(tags: &[String]) -> Result<Option<String>> {
    if tags.is_empty() {
        return Ok(None);
    }
    serde_json::to_string(tags)
        .map(Some)
        .map_err(|e| ContextError::internal_with_source("failed to encode tags", e))
}

/// Tags column holds a JSON array, or free text from older writers
fn decode_tags(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Vec::new();
    };
    if let Ok(tags) = serde_json::from_str::<Vec<String>>(raw) {
        return tags;
    }
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
