//! Embedding boundary
//!
//! [`Embedder`] turns text into dense vectors for the persistent index.
//! [`HashingEmbedder`] is the offline implementation (signed feature hashing
//! over word tokens); the Ollama client in `ollama.rs` is the networked one.

use crate::errors::{ContextError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Text → vector service
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier; vectors from different models are never compared
    fn model(&self) -> &str;

    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic feature-hashing embedder
///
/// Each lowercase alphanumeric token is hashed into one of `dimensions`
/// buckets with a hash-derived sign; the result is L2-normalized. Stable
/// across runs and platforms, so persisted vectors stay comparable.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(ContextError::config("hashing embedder needs at least one dimension"));
        }
        Ok(Self {
            dimensions,
            model: format!("hashing-{dimensions}"),
        })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Scale to unit length; zero vectors stay zero
pub(crate) fn l2_normalize(vector: &mut [f32]) {
    let norm = vector
        .iter()
        .map(|v| f64::from(*v) * f64::from(*v))
        .sum::<f64>()
        .sqrt();
    if norm > f64::EPSILON {
        for v in vector.iter_mut() {
            *v = (f64::from(*v) / norm) as f32;
        }
    }
}

/// Cosine similarity; `None` for mismatched lengths or zero vectors
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let x64 = f64::from(x);
        let y64 = f64::from(y);
        dot += x64 * y64;
        norm_a += x64 * x64;
        norm_b += y64 * y64;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

/// Reject empty, ragged or non-finite embedder output
pub(crate) fn validate_embeddings(expected: usize, vectors: &[Vec<f32>]) -> Result<usize> {
    if vectors.len() != expected {
        return Err(ContextError::embedding(format!(
            "expected {expected} embeddings, got {}",
            vectors.len()
        )));
    }
    let Some(first) = vectors.first() else {
        return Ok(0);
    };
    let dimension = first.len();
    if dimension == 0 {
        return Err(ContextError::embedding("embedding is empty"));
    }
    for vector in vectors {
        if vector.len() != dimension {
            return Err(ContextError::embedding(format!(
                "ragged embeddings: expected {dimension} dimensions, got {}",
                vector.len()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(ContextError::embedding("embedding contains non-finite values"));
        }
    }
    Ok(dimension)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64).expect("dims");
        let texts = vec!["Project: Ollama".to_string(), "Project: Ollama".to_string()];
        let vectors = embedder.embed(&texts).await.expect("embed");

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vectors[1]);
        assert_eq!(vectors[0].len(), 64);
        let norm: f64 = vectors[0].iter().map(|v| f64::from(*v).powi(2)).sum();
        assert!((norm - 1.0).abs() < 1e-5);
        assert_eq!(embedder.model(), "hashing-64");
    }

    #[tokio::test]
    async fn test_hashing_embedder_prefers_shared_tokens() {
        let embedder = HashingEmbedder::new(256).expect("dims");
        let texts = vec![
            "ollama local models".to_string(),
            "Ollama runs local models".to_string(),
            "postgres relational database".to_string(),
        ];
        let v = embedder.embed(&texts).await.expect("embed");

        let near = cosine_similarity(&v[0], &v[1]).expect("similar");
        let far = cosine_similarity(&v[0], &v[2]).unwrap_or(0.0);
        assert!(near > far, "near={near} far={far}");
    }

    #[tokio::test]
    async fn test_empty_text_embeds_to_zero() {
        let embedder = HashingEmbedder::new(8).expect("dims");
        let v = embedder.embed(&[String::new()]).await.expect("embed");
        assert!(v[0].iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&v[0], &v[0]), None);
    }

    #[test]
    fn test_zero_dimensions_rejected() {
        let err = HashingEmbedder::new(0).expect_err("zero dims");
        assert_eq!(err.category(), ErrorCategory::ConfigError);
    }

    #[test]
    fn test_cosine_similarity() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
    }

    #[test]
    fn test_validate_embeddings() {
        assert_eq!(validate_embeddings(0, &[]).expect("empty ok"), 0);
        assert_eq!(
            validate_embeddings(2, &[vec![1.0, 0.0], vec![0.0, 1.0]]).expect("ok"),
            2
        );

        let cases: Vec<(usize, Vec<Vec<f32>>)> = vec![
            (2, vec![vec![1.0]]),
            (1, vec![vec![]]),
            (2, vec![vec![1.0, 0.0], vec![1.0]]),
            (1, vec![vec![f32::NAN]]),
        ];
        for (expected, vectors) in cases {
            let err = validate_embeddings(expected, &vectors).expect_err("invalid");
            assert_eq!(err.category(), ErrorCategory::EmbeddingUnavailable);
        }
    }
}
