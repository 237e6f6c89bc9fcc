//! Index lifecycle: create, delete, list, describe.
//!
//! Names follow the substrate's rules: non-empty, at most 255 characters of
//! lowercase ASCII letters, digits, `-`, `_` and `.`, not starting with `.`,
//! `-` or `_`. Dot-prefixed names are treated as hidden and never listed.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::models::{EntryUnit, IndexInfo};
use crate::store::IndexStore;

const MAX_NAME_LEN: usize = 255;

/// Index metadata plus entry counts.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDescription {
    #[serde(flatten)]
    pub info: IndexInfo,
    pub chunk_entries: usize,
    pub document_entries: usize,
}

#[derive(Clone)]
pub struct IndexManager {
    store: Arc<dyn IndexStore>,
    model_id: Option<String>,
}

impl IndexManager {
    /// `model_id` is recorded on indices this manager creates.
    pub fn new(store: Arc<dyn IndexStore>, model_id: Option<String>) -> Self {
        Self { store, model_id }
    }

    pub fn store(&self) -> &Arc<dyn IndexStore> {
        &self.store
    }

    /// Create `name` with vectors of `dimension`. Succeeds without change when
    /// the index already exists with the same dimension.
    pub async fn create_index(&self, name: &str, dimension: usize) -> Result<IndexInfo> {
        validate_name(name)?;
        if dimension == 0 {
            return Err(Error::InvalidRequest("dimension must be greater than 0".into()));
        }

        let requested = IndexInfo {
            name: name.to_string(),
            dimension,
            model_id: self.model_id.clone(),
            created_at: Utc::now(),
        };
        let stored = self.store.create_index(&requested).await?;

        if stored.dimension != dimension {
            return Err(Error::SchemaConflict {
                name: name.to_string(),
                existing: stored.dimension,
                requested: dimension,
            });
        }
        if stored.created_at == requested.created_at {
            info!(index = name, dimension, "created index");
        } else {
            info!(index = name, "index already exists");
        }
        Ok(stored)
    }

    /// Delete `name` if present. Returns whether anything was removed.
    pub async fn delete_index(&self, name: &str) -> Result<bool> {
        let deleted = self.store.delete_index(name).await?;
        if deleted {
            info!(index = name, "deleted index");
        } else {
            info!(index = name, "index not found, nothing to delete");
        }
        Ok(deleted)
    }

    pub async fn list_indices(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .store
            .list_indices()
            .await?
            .into_iter()
            .map(|i| i.name)
            .filter(|n| !n.starts_with('.'))
            .collect())
    }

    pub async fn describe_index(&self, name: &str) -> Result<IndexDescription> {
        let info = self
            .store
            .get_index(name)
            .await?
            .ok_or_else(|| Error::IndexNotFound(name.to_string()))?;
        let chunk_entries = self.store.count_entries(name, Some(EntryUnit::Chunk)).await?;
        let document_entries = self.store.count_entries(name, Some(EntryUnit::Document)).await?;
        Ok(IndexDescription {
            info,
            chunk_entries,
            document_entries,
        })
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidRequest("index name is empty".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidRequest(format!(
            "index name longer than {} characters",
            MAX_NAME_LEN
        )));
    }
    if name.starts_with(['.', '-', '_']) {
        return Err(Error::InvalidRequest(format!(
            "index name must not start with '.', '-' or '_': {}",
            name
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.')))
    {
        return Err(Error::InvalidRequest(format!(
            "index name contains invalid character '{}': {}",
            bad, name
        )));
    }
    Ok(())
}
