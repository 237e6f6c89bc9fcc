//! Component wiring shared by the CLI and the HTTP server.
//!
//! [`Services`] owns one store handle and one embedding provider and builds
//! the index manager, ingestor, and search engine on top of them, so every
//! frontend shares the same configuration-derived behavior.

use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_provider, EmbedLimiter, EmbeddingProvider};
use crate::error::Result;
use crate::index::IndexManager;
use crate::ingest::Ingestor;
use crate::search::{SearchEngine, SearchParams};
use crate::store::{open_store, IndexStore};

#[derive(Clone)]
pub struct Services {
    pub config: Arc<Config>,
    pub store: Arc<dyn IndexStore>,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub indices: IndexManager,
    pub ingestor: Ingestor,
    pub search: SearchEngine,
}

impl Services {
    /// Open the configured store and embedding provider.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let store = open_store(&config.store).await?;
        let provider = create_provider(&config.embedding)?;
        Ok(Self::new(config, store, provider)?)
    }

    /// Assemble the components from explicit parts.
    pub fn new(
        config: Config,
        store: Arc<dyn IndexStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        let policy = config.embedding.retry_policy();
        let limiter = EmbedLimiter::new(provider.clone(), config.embedding.max_in_flight, policy);
        let ingestor = Ingestor::from_config(store.clone(), limiter, &config)?;
        let indices = IndexManager::new(store.clone(), Some(provider.model_name().to_string()));
        let search = SearchEngine::new(
            store.clone(),
            provider.clone(),
            policy,
            SearchParams::from(&config.retrieval),
        );
        Ok(Self {
            config: Arc::new(config),
            store,
            provider,
            indices,
            ingestor,
            search,
        })
    }
}
