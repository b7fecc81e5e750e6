//! Error taxonomy for the context engine
//!
//! Every failure the engine can observe maps onto one [`ErrorCategory`].
//! Public engine operations never surface these as panics: the engine
//! boundary turns them into degraded values (see `ContextLookup`,
//! `SynthesisResult`), while the lower layers propagate them with `?`.

use serde::Serialize;
use thiserror::Error;

/// Error category for structured logging and degradation decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// A source collaborator could not be fetched
    SourceUnavailable,
    /// The review store could not be opened or queried
    StoreUnavailable,
    /// The review store stayed locked past the busy timeout
    StoreTimeout,
    /// The embedding backend is unreachable or returned garbage
    EmbeddingUnavailable,
    /// The completion backend errored or timed out
    GenerationFailure,
    /// `context.toml` or env misconfigured
    ConfigError,
    /// Unexpected logic bugs, poisoned locks, bad rows
    InternalError,
}

impl ErrorCategory {
    /// Machine-readable code for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceUnavailable => "SOURCE_UNAVAILABLE",
            Self::StoreUnavailable => "STORE_UNAVAILABLE",
            Self::StoreTimeout => "STORE_TIMEOUT",
            Self::EmbeddingUnavailable => "EMBEDDING_UNAVAILABLE",
            Self::GenerationFailure => "GENERATION_FAILURE",
            Self::ConfigError => "CONFIG_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Whether the failure means "history could not be consulted" rather
    /// than "there is no history".
    pub fn is_store_failure(&self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::StoreTimeout)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Context engine error with category and context
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("source unavailable: {message}")]
    SourceUnavailable {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("review store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("review store timed out: {message}")]
    StoreTimeout {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("embedding backend unavailable: {message}")]
    EmbeddingUnavailable {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("generation failed: {message}")]
    GenerationFailure {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl ContextError {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::SourceUnavailable { .. } => ErrorCategory::SourceUnavailable,
            Self::StoreUnavailable { .. } => ErrorCategory::StoreUnavailable,
            Self::StoreTimeout { .. } => ErrorCategory::StoreTimeout,
            Self::EmbeddingUnavailable { .. } => ErrorCategory::EmbeddingUnavailable,
            Self::GenerationFailure { .. } => ErrorCategory::GenerationFailure,
            Self::Config { .. } => ErrorCategory::ConfigError,
            Self::Internal { .. } => ErrorCategory::InternalError,
        }
    }

    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn source_unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a SQLite failure, classifying lock contention as a timeout.
    pub fn from_sqlite(message: impl Into<String>, err: rusqlite::Error) -> Self {
        let message = message.into();
        let busy = matches!(
            err.sqlite_error_code(),
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
        );
        if busy {
            Self::StoreTimeout {
                message,
                source: Some(Box::new(err)),
            }
        } else {
            Self::StoreUnavailable {
                message,
                source: Some(Box::new(err)),
            }
        }
    }

    pub fn embedding(message: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn embedding_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::EmbeddingUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn generation(message: impl Into<String>) -> Self {
        Self::GenerationFailure {
            message: message.into(),
            source: None,
        }
    }

    pub fn generation_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::GenerationFailure {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Result type for context engine operations
pub type Result<T> = std::result::Result<T, ContextError>;
