//! Synthesis stage
//!
//! Fuses a fresh cluster summary, the caller's prior-yield statistics and
//! retrieved history into one generated outlook. Never fails: the
//! confidence ladder reports how much context backed the text.
//!
//! | situation                                   | confidence    |
//! |---------------------------------------------|---------------|
//! | no generator configured                     | `UNAVAILABLE` |
//! | generated with ≥ 1 retrieved document       | `HIGH`        |
//! | generated without retrieved documents       | `MEDIUM`      |
//! | generator errored or timed out              | `LOW`         |

use crate::errors::{ContextError, Result};
use crate::retriever::ContextRetriever;
use crate::vector::ScoredDocument;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Text returned when no generator is configured
pub const UNAVAILABLE_TEXT: &str = "Synthesis backend not initialized";

/// Text returned when the generator fails
pub const FAILURE_TEXT: &str = "Outlook unavailable: the generation backend did not respond.";

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Black-box text completion service
#[async_trait]
pub trait Generator: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// How much context backed a synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unavailable,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final scored artifact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisResult {
    pub text: String,
    pub confidence: Confidence,
    /// Whether retrieved history was injected into the prompt
    pub context_used: bool,
    /// Captured generator failure, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SynthesisResult {
    pub fn unavailable() -> Self {
        Self {
            text: UNAVAILABLE_TEXT.to_string(),
            confidence: Confidence::Unavailable,
            context_used: false,
            error: None,
        }
    }

    fn failed(error: &ContextError) -> Self {
        Self {
            text: FAILURE_TEXT.to_string(),
            confidence: Confidence::Low,
            context_used: false,
            error: Some(error.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompt
// ─────────────────────────────────────────────────────────────────────────────

/// Numbered block of retrieved documents; empty when there are none
pub fn render_history_block(history: &[ScoredDocument]) -> String {
    if history.is_empty() {
        return String::new();
    }

    let mut block = String::from("**Historical Context:**\n");
    for (i, doc) in history.iter().enumerate() {
        block.push_str(&format!("\n{}. {}\n", i + 1, doc.text.trim()));
    }
    block
}

/// Assemble the completion prompt
pub fn build_prompt(summary: &str, prior_yield: &serde_json::Value, history_block: &str) -> String {
    let prior = serde_json::to_string_pretty(prior_yield).unwrap_or_else(|_| "{}".to_string());
    format!(
        r#"You are an analyst tracking an open-source project ecosystem.

Based on the cluster analysis and historical context below, write a brief outlook on where the ecosystem is heading.

**Current Cluster Summary:**
{summary}

**Prior Yield:**
{prior}

{history_block}

Answer in 2-3 sentences. Focus on concrete, checkable predictions and emerging patterns.

Outlook:"#
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Synthesizer
// ─────────────────────────────────────────────────────────────────────────────

/// Synthesis stage over an optional generator
#[derive(Clone)]
pub struct Synthesizer {
    generator: Option<Arc<dyn Generator>>,
    timeout: Duration,
}

impl std::fmt::Debug for Synthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Synthesizer")
            .field("model", &self.generator.as_ref().map(|g| g.model().to_string()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Synthesizer {
    pub fn new(generator: Option<Arc<dyn Generator>>, timeout: Duration) -> Self {
        Self { generator, timeout }
    }

    /// Generate an outlook; never returns an error
    pub async fn synthesize(
        &self,
        retriever: &ContextRetriever<'_>,
        summary: &str,
        prior_yield: &serde_json::Value,
        use_context: bool,
    ) -> SynthesisResult {
        let Some(generator) = self.generator.as_ref() else {
            tracing::debug!("No generator configured; synthesis unavailable");
            return SynthesisResult::unavailable();
        };

        let history = if use_context {
            match retriever.get_relevant_history(summary).await {
                Ok(history) => history,
                Err(e) => {
                    tracing::warn!(
                        category = e.category().as_str(),
                        error = %e,
                        "History lookup failed; synthesizing without context"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let history_block = render_history_block(&history);
        let context_used = !history.is_empty();
        let prompt = build_prompt(summary, prior_yield, &history_block);

        let completion = match tokio::time::timeout(self.timeout, generator.complete(&prompt)).await
        {
            Ok(result) => result,
            Err(_) => Err(ContextError::generation(format!(
                "completion timed out after {}s",
                self.timeout.as_secs()
            ))),
        };

        match completion {
            Ok(text) => {
                let confidence = if context_used {
                    Confidence::High
                } else {
                    Confidence::Medium
                };
                tracing::info!(
                    confidence = confidence.as_str(),
                    documents = history.len(),
                    "Synthesis complete"
                );
                SynthesisResult {
                    text: text.trim().to_string(),
                    confidence,
                    context_used,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    category = e.category().as_str(),
                    error = %e,
                    "Generation failed"
                );
                SynthesisResult::failed(&e)
            }
        }
    }
}
