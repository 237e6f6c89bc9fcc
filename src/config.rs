//! TOML configuration.
//!
//! Every section has serde defaults, so an empty file is a valid
//! configuration. Values from the deployment environment
//! (`OPENSEARCH_INDEX_NAME`, `EMBED_DIMENSION`, `EMBED_MODEL_ID`,
//! `DOCUMENT_S3_URI`, `BEDROCK_REGION`) override the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
        }
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}
fn default_store_path() -> PathBuf {
    PathBuf::from("./data/hsearch.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    400
}
fn default_min_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// AWS region for the Bedrock provider.
    #[serde(default = "default_region")]
    pub region: String,
    /// Base URL override (OpenAI-compatible endpoints, Ollama, Bedrock VPC endpoints).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            region: default_region(),
            url: None,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

fn default_provider() -> String {
    "bedrock".to_string()
}
fn default_model() -> String {
    "amazon.titan-embed-text-v2:0".to_string()
}
fn default_dims() -> usize {
    1024
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    20_000
}
fn default_max_in_flight() -> usize {
    8
}

/// Whether ingestion also writes one whole-document entry per document.
/// Fixed per index once it holds entries.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentEntries {
    #[default]
    None,
    /// L2-normalized mean of the chunk embeddings.
    Mean,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default)]
    pub index_name: Option<String>,
    /// `s3://bucket/prefix` or a local directory (`file:///path` or a plain path).
    #[serde(default)]
    pub docs_url: Option<String>,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default)]
    pub document_entries: DocumentEntries,
    #[serde(default = "default_true")]
    pub create_index: bool,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            index_name: None,
            docs_url: None,
            workers: default_workers(),
            document_entries: DocumentEntries::default(),
            create_index: true,
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_workers() -> usize {
    8
}
fn default_true() -> bool {
    true
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: default_hybrid_alpha(),
            candidate_k: default_candidate_k(),
            final_limit: default_final_limit(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_hybrid_alpha() -> f64 {
    0.5
}
fn default_candidate_k() -> usize {
    80
}
fn default_final_limit() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Apply deployment environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OPENSEARCH_INDEX_NAME") {
            self.ingest.index_name = Some(v);
        }
        if let Some(v) = lookup("EMBED_DIMENSION") {
            self.embedding.dims = v
                .trim()
                .parse()
                .with_context(|| format!("EMBED_DIMENSION is not an integer: {}", v))?;
        }
        if let Some(v) = lookup("EMBED_MODEL_ID") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("DOCUMENT_S3_URI") {
            self.ingest.docs_url = Some(v);
        }
        if let Some(v) = lookup("BEDROCK_REGION") {
            self.embedding.region = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        // Chunking
        if self.chunking.max_chars == 0 {
            anyhow::bail!("chunking.max_chars must be > 0");
        }
        if self.chunking.min_chars > self.chunking.max_chars {
            anyhow::bail!(
                "chunking.min_chars ({}) must be <= chunking.max_chars ({})",
                self.chunking.min_chars,
                self.chunking.max_chars
            );
        }

        // Embedding
        match self.embedding.provider.as_str() {
            "bedrock" | "openai" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be bedrock, openai, or ollama.",
                other
            ),
        }
        if self.embedding.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }
        if self.embedding.model.trim().is_empty() {
            anyhow::bail!("embedding.model must not be empty");
        }
        if self.embedding.max_attempts == 0 {
            anyhow::bail!("embedding.max_attempts must be >= 1");
        }
        if self.embedding.max_in_flight == 0 {
            anyhow::bail!("embedding.max_in_flight must be >= 1");
        }
        if self.embedding.base_delay_ms > self.embedding.max_delay_ms {
            anyhow::bail!("embedding.base_delay_ms must be <= embedding.max_delay_ms");
        }

        // Ingest
        if self.ingest.workers == 0 {
            anyhow::bail!("ingest.workers must be >= 1");
        }

        // Retrieval
        if self.retrieval.final_limit < 1 {
            anyhow::bail!("retrieval.final_limit must be >= 1");
        }
        if self.retrieval.candidate_k < self.retrieval.final_limit {
            anyhow::bail!("retrieval.candidate_k must be >= retrieval.final_limit");
        }
        if !(0.0..=1.0).contains(&self.retrieval.hybrid_alpha) {
            anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
        }
        if self.retrieval.timeout_secs == 0 {
            anyhow::bail!("retrieval.timeout_secs must be > 0");
        }

        Ok(())
    }
}

/// Read, parse, apply environment overrides, validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = Config::from_toml_str(&content)?;
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.max_chars, 400);
        assert_eq!(config.embedding.dims, 1024);
        assert_eq!(config.embedding.model, "amazon.titan-embed-text-v2:0");
        assert_eq!(config.retrieval.final_limit, 5);
        assert_eq!(config.retrieval.hybrid_alpha, 0.5);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.ingest.document_entries, DocumentEntries::None);
        assert!(config.ingest.create_index);
    }

    #[test]
    fn sections_parse() {
        let config = Config::from_toml_str(
            r#"
            [store]
            backend = "memory"

            [chunking]
            max_chars = 200
            min_chars = 20

            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            dims = 768

            [ingest]
            index_name = "docs-2024"
            docs_url = "s3://bucket/prefix"
            document_entries = "mean"

            [server]
            bind = "0.0.0.0:9000"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.embedding.dims, 768);
        assert_eq!(config.ingest.index_name.as_deref(), Some("docs-2024"));
        assert_eq!(config.ingest.document_entries, DocumentEntries::Mean);
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::from_toml_str("[ingest]\nindex_name = \"a\"").unwrap();
        let env: HashMap<&str, &str> = [
            ("OPENSEARCH_INDEX_NAME", "b"),
            ("EMBED_DIMENSION", "512"),
            ("EMBED_MODEL_ID", "cohere.embed-multilingual-v3"),
            ("BEDROCK_REGION", "ap-northeast-1"),
        ]
        .into_iter()
        .collect();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.ingest.index_name.as_deref(), Some("b"));
        assert_eq!(config.embedding.dims, 512);
        assert_eq!(config.embedding.model, "cohere.embed-multilingual-v3");
        assert_eq!(config.embedding.region, "ap-northeast-1");
    }

    #[test]
    fn bad_dimension_env_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|k| (k == "EMBED_DIMENSION").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("EMBED_DIMENSION"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let cases = [
            "[chunking]\nmax_chars = 0",
            "[chunking]\nmax_chars = 10\nmin_chars = 11",
            "[embedding]\nprovider = \"local\"",
            "[embedding]\nmax_attempts = 0",
            "[retrieval]\nhybrid_alpha = 1.5",
            "[retrieval]\nfinal_limit = 0",
            "[ingest]\nworkers = 0",
        ];
        for case in cases {
            let config = Config::from_toml_str(case).unwrap();
            assert!(config.validate().is_err(), "expected rejection: {}", case);
        }
    }

    #[test]
    fn unknown_backend_fails_to_parse() {
        assert!(Config::from_toml_str("[store]\nbackend = \"opensearch\"").is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hsearch.toml");
        std::fs::write(&path, "[retrieval]\nfinal_limit = 3\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.retrieval.final_limit, 3);
    }
}
