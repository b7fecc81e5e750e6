//! Ollama HTTP client
//!
//! One client serves both engine boundaries:
//! - [`Embedder`] via `POST /api/embed`
//! - [`Generator`] via `POST /api/generate` with `stream: false`
//!
//! `GET /api/tags` backs the CLI health check.

use crate::config::OllamaConfig;
use crate::embedding::Embedder;
use crate::errors::{ContextError, Result};
use crate::synthesis::Generator;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Client for a local or remote Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    embedding_model: String,
    temperature: f32,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ContextError::config_with_source("failed to build HTTP client", e))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of the models the server has pulled
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.http.get(&url).send().await.map_err(|e| {
            ContextError::embedding_with_source(format!("Ollama unreachable at {}", self.base_url), e)
        })?;

        if !response.status().is_success() {
            return Err(ContextError::embedding(format!(
                "Ollama tags request failed ({})",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| ContextError::embedding_with_source("malformed tags response", e))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

/// Status plus body of a failed response, for error messages
async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    fn model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        tracing::debug!(model = %self.embedding_model, count = texts.len(), "Ollama embed request");

        let response = self
            .http
            .post(&url)
            .json(&EmbedRequest {
                model: &self.embedding_model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| ContextError::embedding_with_source("Ollama embed request failed", e))?;

        if !response.status().is_success() {
            return Err(ContextError::embedding(format!(
                "Ollama embed error ({})",
                describe_failure(response).await
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ContextError::embedding_with_source("malformed embed response", e))?;
        Ok(body.embeddings)
    }
}

#[async_trait]
impl Generator for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "Ollama generate request");

        let response = self
            .http
            .post(&url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
                options: GenerateOptions {
                    temperature: self.temperature,
                },
            })
            .send()
            .await
            .map_err(|e| ContextError::generation_with_source("Ollama generate request failed", e))?;

        if !response.status().is_success() {
            return Err(ContextError::generation(format!(
                "Ollama generate error ({})",
                describe_failure(response).await
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ContextError::generation_with_source("malformed generate response", e))?;
        Ok(body.response)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::ErrorCategory;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OllamaClient {
        let config = OllamaConfig {
            base_url: format!("{}/", server.uri()),
            request_timeout_secs: 5,
            ..OllamaConfig::default()
        };
        OllamaClient::new(&config).expect("client")
    }

    #[tokio::test]
    async fn test_embed_posts_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .and(body_partial_json(json!({
                "model": "mxbai-embed-large",
                "input": ["a", "b"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "mxbai-embed-large",
                "embeddings": [[0.1, 0.2], [0.3, 0.4]]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let vectors = client
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .expect("embed");
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn test_embed_empty_input_skips_request() {
        let server = MockServer::start().await;
        let client = client_for(&server);
        assert!(client.embed(&[]).await.expect("embed").is_empty());
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_embed_server_error_is_embedding_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .embed(&["a".to_string()])
            .await
            .expect_err("404");
        assert_eq!(err.category(), ErrorCategory::EmbeddingUnavailable);
        assert!(err.to_string().contains("model not found"));
    }

    #[tokio::test]
    async fn test_generate_non_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "llama3.2",
                "prompt": "hello",
                "stream": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.2",
                "response": "Local runtimes keep growing.",
                "done": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server).complete("hello").await.expect("complete");
        assert_eq!(text, "Local runtimes keep growing.");
    }

    #[tokio::test]
    async fn test_generate_failure_is_generation_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client_for(&server).complete("hello").await.expect_err("500");
        assert_eq!(err.category(), ErrorCategory::GenerationFailure);
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let config = OllamaConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            request_timeout_secs: 2,
            ..OllamaConfig::default()
        };
        let client = OllamaClient::new(&config).expect("client");
        let err = client.complete("hello").await.expect_err("unreachable");
        assert_eq!(err.category(), ErrorCategory::GenerationFailure);
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3.2:latest"}, {"name": "mxbai-embed-large:latest"}]
            })))
            .mount(&server)
            .await;

        let models = client_for(&server).list_models().await.expect("tags");
        assert_eq!(models, vec!["llama3.2:latest", "mxbai-embed-large:latest"]);
    }
}
