#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;

use hybrid_search::app::Services;
use hybrid_search::config::{Config, StoreBackend};
use hybrid_search::embedding::{EmbedError, EmbeddingProvider, InputKind};
use hybrid_search::models::Document;
use hybrid_search::source::{service_for_key, DocumentSource, SourceObject};
use hybrid_search::store::{IndexStore, InMemoryStore};

pub const DIMS: usize = 3;

/// Embeds text onto three axes: refund mentions, shipping mentions, and a
/// constant so no vector is zero.
pub struct TopicProvider {
    calls: AtomicUsize,
    /// Number of initial calls answered with a throttling error.
    throttle_first: usize,
    /// Texts containing this marker are always throttled.
    always_throttle: Option<&'static str>,
}

impl TopicProvider {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            throttle_first: 0,
            always_throttle: None,
        }
    }

    pub fn throttling_first(n: usize) -> Self {
        Self {
            throttle_first: n,
            ..Self::new()
        }
    }

    pub fn always_throttling(marker: &'static str) -> Self {
        Self {
            always_throttle: Some(marker),
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn topic_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    vec![
        lower.matches("refund").count() as f32,
        lower.matches("shipping").count() as f32,
        0.1,
    ]
}

#[async_trait]
impl EmbeddingProvider for TopicProvider {
    async fn embed_input(&self, text: &str, _kind: InputKind) -> Result<Vec<f32>, EmbedError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.throttle_first {
            return Err(EmbedError::Unavailable("ThrottlingException".into()));
        }
        if let Some(marker) = self.always_throttle {
            if text.contains(marker) {
                return Err(EmbedError::Unavailable("ThrottlingException".into()));
            }
        }
        Ok(topic_vector(text))
    }

    fn model_name(&self) -> &str {
        "topic-test"
    }

    fn dims(&self) -> usize {
        DIMS
    }
}

/// In-memory document source rooted at `s3://bucket`. Keys containing
/// `broken` fail to fetch.
pub struct StaticSource {
    docs: Vec<(String, String)>,
}

impl StaticSource {
    pub fn new(docs: &[(&str, &str)]) -> Self {
        Self {
            docs: docs
                .iter()
                .map(|(k, t)| (k.to_string(), t.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl DocumentSource for StaticSource {
    fn docs_root(&self) -> &str {
        "s3://bucket"
    }

    async fn list(&self) -> anyhow::Result<Vec<SourceObject>> {
        Ok(self
            .docs
            .iter()
            .map(|(key, text)| SourceObject {
                key: key.clone(),
                size: text.len() as u64,
            })
            .collect())
    }

    async fn fetch(&self, object: &SourceObject) -> anyhow::Result<Document> {
        if object.key.contains("broken") {
            bail!("GetObject failed for {}", object.key);
        }
        let Some((_, text)) = self.docs.iter().find(|(k, _)| *k == object.key) else {
            bail!("no such key: {}", object.key);
        };
        Ok(Document::new(
            "s3://bucket",
            object.key.clone(),
            service_for_key("s3://bucket", &object.key),
            text.clone(),
        ))
    }
}

/// Config tuned for tests: in-memory store, no real backoff sleeps.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.store.backend = StoreBackend::Memory;
    config.embedding.dims = DIMS;
    config.embedding.base_delay_ms = 1;
    config.embedding.max_delay_ms = 5;
    config.chunking.max_chars = 80;
    config.chunking.min_chars = 10;
    config.ingest.workers = 4;
    config
}

pub fn services_with(store: Arc<dyn IndexStore>, provider: Arc<dyn EmbeddingProvider>) -> Services {
    Services::new(test_config(), store, provider).unwrap()
}

/// In-memory services over a caller-adjusted [`test_config`].
pub fn services_from_config(config: Config, provider: TopicProvider) -> Services {
    Services::new(config, Arc::new(InMemoryStore::new()), Arc::new(provider)).unwrap()
}

pub fn memory_services(provider: TopicProvider) -> Services {
    services_with(Arc::new(InMemoryStore::new()), Arc::new(provider))
}

pub const POLICY_TEXT: &str = "Refund policy. Customers may request a refund within 30 days of purchase. \
Refunds are paid to the original payment method.\n\
Shipping is handled by our logistics partner and usually takes five days.";

pub const SHIPPING_TEXT: &str = "Shipping guide. Orders ship within two business days. \
Tracking numbers are sent by email once the parcel leaves the warehouse.";
