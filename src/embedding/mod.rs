//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`BedrockProvider`]**: Amazon Bedrock `InvokeModel` (Titan and Cohere body shapes), SigV4-signed.
//! - **[`OpenAIProvider`]**: OpenAI-compatible `POST /v1/embeddings`.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//!
//! Providers make exactly one call per [`EmbeddingProvider::embed_input`] and
//! classify failures as [`EmbedError::Unavailable`] (transient) or
//! [`EmbedError::Rejected`] (permanent). Retrying is layered on top by
//! [`embed_with_retry`] and the [`EmbedLimiter`], which also caps the number of
//! calls in flight.
//!
//! # Failure classification
//!
//! - HTTP 429, 5xx, timeouts, connection errors → `Unavailable`
//! - Bedrock `ThrottlingException`, `ServiceUnavailableException`, `ModelNotReadyException` → `Unavailable`
//! - Other HTTP 4xx, malformed responses, empty input → `Rejected`
//!
//! Also provides the vector utilities used by the stores and the ingestor:
//! [`cosine_similarity`], [`vec_to_blob`] / [`blob_to_vec`], [`mean_normalized`].

mod bedrock;
mod http;

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::error::Error;
use crate::retry::RetryPolicy;

pub use bedrock::BedrockProvider;
pub use http::{OllamaProvider, OpenAIProvider};

/// Failure of a single embedding call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmbedError {
    /// Timeout, throttling, or server-side failure. Safe to retry.
    #[error("{0}")]
    Unavailable(String),
    /// The provider refused the input. Retrying will not help.
    #[error("{0}")]
    Rejected(String),
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EmbedError::Unavailable(_))
    }
}

impl From<EmbedError> for Error {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::Unavailable(msg) => Error::EmbeddingUnavailable(msg),
            EmbedError::Rejected(msg) => Error::EmbeddingRejected(msg),
        }
    }
}

/// What the text is used for. Some models (Cohere) embed queries and
/// documents differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Document,
    Query,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text. One network call, no retries.
    async fn embed_input(&self, text: &str, kind: InputKind) -> Result<Vec<f32>, EmbedError>;

    /// Embed document text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed_input(text, InputKind::Document).await
    }

    /// Returns the model identifier (e.g. `"amazon.titan-embed-text-v2:0"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality. Fixed per deployment.
    fn dims(&self) -> usize;
}

async fn embed_kind_with_retry(
    provider: &dyn EmbeddingProvider,
    policy: &RetryPolicy,
    text: &str,
    kind: InputKind,
) -> Result<Vec<f32>, EmbedError> {
    if text.trim().is_empty() {
        return Err(EmbedError::Rejected("input text is empty".into()));
    }
    policy
        .run(|| provider.embed_input(text, kind), EmbedError::is_retryable)
        .await
}

/// Embed document text, retrying transient failures per `policy`.
pub async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    policy: &RetryPolicy,
    text: &str,
) -> Result<Vec<f32>, EmbedError> {
    embed_kind_with_retry(provider, policy, text, InputKind::Document).await
}

/// Embed a search query, retrying transient failures per `policy`.
pub async fn embed_query(
    provider: &dyn EmbeddingProvider,
    policy: &RetryPolicy,
    text: &str,
) -> Result<Vec<f32>, EmbedError> {
    embed_kind_with_retry(provider, policy, text, InputKind::Query).await
}

/// Shared gate around a provider: bounds concurrent calls and applies the
/// retry policy. A permit is held only while a call is in flight, not
/// during backoff.
#[derive(Clone)]
pub struct EmbedLimiter {
    provider: Arc<dyn EmbeddingProvider>,
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl EmbedLimiter {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, max_in_flight: usize, policy: RetryPolicy) -> Self {
        Self {
            provider,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            policy,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        if text.trim().is_empty() {
            return Err(EmbedError::Rejected("input text is empty".into()));
        }
        self.policy
            .run(
                || async {
                    let _permit = match self.permits.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return Err(EmbedError::Unavailable("embedding limiter closed".into()))
                        }
                    };
                    self.provider.embed_input(text, InputKind::Document).await
                },
                EmbedError::is_retryable,
            )
            .await
    }
}

/// Create the provider named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"bedrock"` | [`BedrockProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "bedrock" => Ok(Arc::new(BedrockProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Map a non-success HTTP status to an [`EmbedError`].
pub(crate) fn classify_status(provider: &str, status: reqwest::StatusCode, body: &str) -> EmbedError {
    let msg = format!(
        "{} API error {}: {}",
        provider,
        status,
        body.chars().take(500).collect::<String>()
    );
    if status.as_u16() == 429 || status.is_server_error() {
        EmbedError::Unavailable(msg)
    } else {
        EmbedError::Rejected(msg)
    }
}

/// Transport errors (timeouts, refused connections, resets) are transient.
pub(crate) fn classify_transport(provider: &str, e: reqwest::Error) -> EmbedError {
    if e.is_decode() {
        EmbedError::Rejected(format!("{} response could not be decoded: {}", provider, e))
    } else {
        EmbedError::Unavailable(format!("{} request failed: {}", provider, e))
    }
}

/// Read a JSON array of numbers.
pub(crate) fn parse_vector(value: Option<&serde_json::Value>, what: &str) -> Result<Vec<f32>, EmbedError> {
    let arr = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| EmbedError::Rejected(format!("invalid response: missing {}", what)))?;
    arr.iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbedError::Rejected(format!("invalid response: non-numeric value in {}", what)))
        })
        .collect()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty, zero, or
/// mismatched-length vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// L2-normalized element-wise mean. Used for document-level entries.
/// Returns `None` when there are no vectors or their lengths differ.
pub fn mean_normalized(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let dims = first.len();
    if vectors.iter().any(|v| v.len() != dims) {
        return None;
    }

    let mut mean = vec![0.0f32; dims];
    for v in vectors {
        for (m, x) in mean.iter_mut().zip(v) {
            *m += x;
        }
    }
    let n = vectors.len() as f32;
    for m in mean.iter_mut() {
        *m /= n;
    }

    let norm = mean.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for m in mean.iter_mut() {
            *m /= norm;
        }
    }
    Some(mean)
}
