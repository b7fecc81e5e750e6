//! Context engine configuration loading
//!
//! Loads configuration from `~/.config/pulse/context.toml` (or the
//! `PULSE_CONTEXT_CONFIG` env var). Every field has a default, so a missing
//! file yields a working offline setup.

use crate::errors::{ContextError, Result};
use crate::store::{EntityMatcher, MatchStrategy, PopularityMetric};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the context engine
#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    /// Path to the review history SQLite database
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Durable review store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Vector index settings
    #[serde(default)]
    pub index: IndexConfig,

    /// Ollama endpoint used for embeddings and completions
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// Context retrieval settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Returning-entity detection settings
    #[serde(default)]
    pub recurrence: RecurrenceConfig,

    /// Synthesis stage settings
    #[serde(default)]
    pub synthesis: SynthesisConfig,

    /// Snapshot ingestion settings
    #[serde(default)]
    pub ingest: IngestConfig,
}

fn default_db_path() -> String {
    "data/review_history.db".to_string()
}

/// Durable review store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// How long a statement may wait on a locked database
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Which popularity column feeds `avg_popularity`
    #[serde(default)]
    pub popularity_metric: PopularityMetric,
}

fn default_busy_timeout_ms() -> u64 {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            popularity_metric: PopularityMetric::default(),
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Which vector backend to build
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexBackendKind {
    /// Persistent dense index, embeddings from Ollama
    #[default]
    Ollama,
    /// Persistent dense index, local feature-hashing embeddings
    Hashing,
    /// In-memory BM25 index, rebuilt on every run
    Lexical,
}

/// Vector index configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default)]
    pub backend: IndexBackendKind,

    /// SQLite file holding the dense index
    #[serde(default = "default_index_path")]
    pub path: String,

    /// Dimensions used by the hashing embedder
    #[serde(default = "default_hashing_dimensions")]
    pub hashing_dimensions: usize,
}

fn default_index_path() -> String {
    "data/vector_index.db".to_string()
}

fn default_hashing_dimensions() -> usize {
    256
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackendKind::default(),
            path: default_index_path(),
            hashing_dimensions: default_hashing_dimensions(),
        }
    }
}

/// Ollama endpoint configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Completion model
    #[serde(default = "default_model")]
    pub model: String,

    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// HTTP request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_ollama_url() -> String {
    "http://127.0.0.1:11434".to_string()
}
fn default_model() -> String {
    "llama3.2".to_string()
}
fn default_embedding_model() -> String {
    "mxbai-embed-large".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            model: default_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl OllamaConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Context retrieval configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Nearest neighbours fetched for an entity lookup
    #[serde(default = "default_context_k")]
    pub context_k: usize,

    /// Documents injected into synthesis prompts
    #[serde(default = "default_history_k")]
    pub history_k: usize,

    /// Query rendered for entity lookups; `{name}` is substituted
    #[serde(default = "default_query_template")]
    pub query_template: String,
}

fn default_context_k() -> usize {
    3
}
fn default_history_k() -> usize {
    5
}
fn default_query_template() -> String {
    "Project: {name}".to_string()
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            context_k: default_context_k(),
            history_k: default_history_k(),
            query_template: default_query_template(),
        }
    }
}

impl RetrievalConfig {
    /// Render the entity lookup query
    pub fn entity_query(&self, name: &str) -> String {
        self.query_template.replace("{name}", name)
    }
}

/// Returning-entity detection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RecurrenceConfig {
    #[serde(default = "default_days_back")]
    pub days_back: u32,

    #[serde(default)]
    pub match_strategy: MatchStrategy,

    #[serde(default)]
    pub case_sensitive: bool,

    /// Also require silence between the cutoff and today
    #[serde(default)]
    pub require_gap: bool,
}

fn default_days_back() -> u32 {
    7
}

/// Upper bound on `recurrence.days_back` (about a century)
pub const MAX_DAYS_BACK: u32 = 36_500;

impl Default for RecurrenceConfig {
    fn default() -> Self {
        Self {
            days_back: default_days_back(),
            match_strategy: MatchStrategy::default(),
            case_sensitive: false,
            require_gap: false,
        }
    }
}

impl RecurrenceConfig {
    pub fn matcher(&self) -> EntityMatcher {
        EntityMatcher::new(self.match_strategy, self.case_sensitive)
    }
}

/// Synthesis stage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    /// Build a generator at all; when false synthesis reports UNAVAILABLE
    #[serde(default = "default_synthesis_enabled")]
    pub enabled: bool,

    /// Inject retrieved history into prompts by default
    #[serde(default = "default_use_context")]
    pub use_context: bool,

    /// Upper bound on a single completion call
    #[serde(default = "default_synthesis_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_synthesis_enabled() -> bool {
    true
}
fn default_use_context() -> bool {
    true
}
fn default_synthesis_timeout_secs() -> u64 {
    120
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: default_synthesis_enabled(),
            use_context: default_use_context(),
            timeout_secs: default_synthesis_timeout_secs(),
        }
    }
}

impl SynthesisConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Snapshot ingestion configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Directory of `<date>.json` snapshots
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: String,

    /// Below this many primary results the fallback sources are consulted
    #[serde(default = "default_min_primary_entries")]
    pub min_primary_entries: usize,
}

fn default_snapshot_dir() -> String {
    "data/official".to_string()
}
fn default_min_primary_entries() -> usize {
    5
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: default_snapshot_dir(),
            min_primary_entries: default_min_primary_entries(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            store: StoreConfig::default(),
            index: IndexConfig::default(),
            ollama: OllamaConfig::default(),
            retrieval: RetrievalConfig::default(),
            recurrence: RecurrenceConfig::default(),
            synthesis: SynthesisConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl ContextConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "PULSE_CONTEXT_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "context.toml";

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `PULSE_CONTEXT_CONFIG` environment variable
    /// 2. `~/.config/pulse/context.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "Context config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ContextError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: ContextConfig = toml::from_str(contents)
            .map_err(|e| ContextError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Where `load` looks for the config file
    pub fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("pulse")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    fn validate(&self) -> Result<()> {
        if self.retrieval.context_k == 0 || self.retrieval.history_k == 0 {
            return Err(ContextError::config(
                "retrieval.context_k and retrieval.history_k must be at least 1",
            ));
        }

        if !self.retrieval.query_template.contains("{name}") {
            tracing::warn!(
                template = %self.retrieval.query_template,
                "retrieval.query_template has no {{name}} placeholder; every lookup will run the same query"
            );
        }

        if self.recurrence.days_back > MAX_DAYS_BACK {
            return Err(ContextError::config(format!(
                "recurrence.days_back must be at most {MAX_DAYS_BACK}, got {}",
                self.recurrence.days_back
            )));
        }

        if self.index.backend == IndexBackendKind::Hashing && self.index.hashing_dimensions == 0 {
            return Err(ContextError::config("index.hashing_dimensions must be positive"));
        }

        if self.store.busy_timeout_ms == 0 {
            tracing::warn!("store.busy_timeout_ms is 0; locked reads will fail immediately");
        }

        Ok(())
    }

    /// Get the resolved database path (expanding ~ if needed)
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_home(&self.db_path)
    }

    pub fn resolved_index_path(&self) -> PathBuf {
        expand_home(&self.index.path)
    }

    pub fn resolved_snapshot_dir(&self) -> PathBuf {
        expand_home(&self.ingest.snapshot_dir)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ContextConfig::default();
        assert_eq!(cfg.store.busy_timeout_ms, 10_000);
        assert_eq!(cfg.retrieval.context_k, 3);
        assert_eq!(cfg.retrieval.history_k, 5);
        assert_eq!(cfg.recurrence.days_back, 7);
        assert_eq!(cfg.recurrence.match_strategy, MatchStrategy::Substring);
        assert_eq!(cfg.index.backend, IndexBackendKind::Ollama);
        assert!(cfg.synthesis.use_context);
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
            db_path = "/tmp/reviews.db"
        "#;

        let cfg = ContextConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.db_path, "/tmp/reviews.db");
        assert_eq!(cfg.ollama.model, "llama3.2");
        assert_eq!(cfg.ingest.min_primary_entries, 5);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            db_path = "~/pulse/reviews.db"

            [store]
            busy_timeout_ms = 2500
            popularity_metric = "downloads"

            [index]
            backend = "hashing"
            path = "/tmp/index.db"
            hashing_dimensions = 64

            [ollama]
            base_url = "http://ollama.internal:11434"
            model = "qwen2.5"
            embedding_model = "nomic-embed-text"
            temperature = 0.2
            request_timeout_secs = 30

            [retrieval]
            context_k = 4
            history_k = 8
            query_template = "Entity: {name}"

            [recurrence]
            days_back = 14
            match_strategy = "normalized"
            case_sensitive = true
            require_gap = true

            [synthesis]
            enabled = false
            use_context = false
            timeout_secs = 15

            [ingest]
            snapshot_dir = "/var/pulse/official"
            min_primary_entries = 3
        "#;

        let cfg = ContextConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.store.busy_timeout(), Duration::from_millis(2500));
        assert_eq!(cfg.store.popularity_metric, PopularityMetric::Downloads);
        assert_eq!(cfg.index.backend, IndexBackendKind::Hashing);
        assert_eq!(cfg.index.hashing_dimensions, 64);
        assert_eq!(cfg.ollama.embedding_model, "nomic-embed-text");
        assert_eq!(cfg.retrieval.entity_query("Ollama"), "Entity: Ollama");
        assert_eq!(cfg.recurrence.match_strategy, MatchStrategy::Normalized);
        assert!(cfg.recurrence.require_gap);
        assert!(!cfg.synthesis.enabled);
        assert_eq!(cfg.synthesis.timeout(), Duration::from_secs(15));
        assert_eq!(cfg.resolved_snapshot_dir(), PathBuf::from("/var/pulse/official"));
    }

    #[test]
    fn test_zero_k_rejected() {
        let toml = r#"
            [retrieval]
            context_k = 0
        "#;
        let err = ContextConfig::parse(toml).expect_err("k=0 is invalid");
        assert_eq!(err.category(), crate::ErrorCategory::ConfigError);
    }

    #[test]
    fn test_days_back_bounded() {
        let toml = r#"
            [recurrence]
            days_back = 200000000
        "#;
        let err = ContextConfig::parse(toml).expect_err("window too large");
        assert_eq!(err.category(), crate::ErrorCategory::ConfigError);

        let at_limit = format!("[recurrence]\ndays_back = {MAX_DAYS_BACK}\n");
        let cfg = ContextConfig::parse(&at_limit).expect("limit is accepted");
        assert_eq!(cfg.recurrence.days_back, MAX_DAYS_BACK);
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let toml = r#"
            [recurrence]
            match_strategy = "phonetic"
        "#;
        assert!(ContextConfig::parse(toml).is_err());
    }
}
