//! OpenAI-compatible and Ollama embedding endpoints.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{classify_status, classify_transport, http_client, parse_vector, EmbedError, EmbeddingProvider, InputKind};
use crate::config::EmbeddingConfig;

/// Calls `POST <url>/v1/embeddings` (default `https://api.openai.com`).
/// Requires `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    api_key: String,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) => key,
            Err(_) => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }

    fn body(&self, text: &str) -> Value {
        // Only the v3 models accept a target dimensionality.
        if self.model.starts_with("text-embedding-3") {
            json!({ "model": self.model, "input": [text], "dimensions": self.dims })
        } else {
            json!({ "model": self.model, "input": [text] })
        }
    }
}

fn parse_openai_response(json: &Value) -> Result<Vec<f32>, EmbedError> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| EmbedError::Rejected("invalid OpenAI response: missing data array".into()))?;
    parse_vector(first.get("embedding"), "data[0].embedding")
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    async fn embed_input(&self, text: &str, _kind: InputKind) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.body(text))
            .send()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("OpenAI", status, &body));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| classify_transport("OpenAI", e))?;
        parse_openai_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Calls `POST <url>/api/embed` on an Ollama instance (default
/// `http://localhost:11434`).
pub struct OllamaProvider {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<f32>, EmbedError> {
    parse_vector(
        json.get("embeddings").and_then(|e| e.get(0)),
        "embeddings[0]",
    )
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed_input(&self, text: &str, _kind: InputKind) -> Result<Vec<f32>, EmbedError> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&json!({ "model": self.model, "input": [text] }))
            .send()
            .await
            .map_err(|e| match classify_transport("Ollama", e) {
                EmbedError::Unavailable(msg) => EmbedError::Unavailable(format!(
                    "{} (is Ollama running at {}?)",
                    msg, self.url
                )),
                other => other,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status("Ollama", status, &body));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| classify_transport("Ollama", e))?;
        parse_ollama_response(&json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}
