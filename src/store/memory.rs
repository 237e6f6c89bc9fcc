//! In-memory [`IndexStore`] for tests and ephemeral runs.
//!
//! Entries live in a `HashMap` per index behind a `std::sync::RwLock`.
//! Keyword search scores with Okapi BM25 (`k1 = 1.2`, `b = 0.75`) over
//! [`analyze`](super::analyze) terms; vector search is brute-force cosine similarity.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{analyze, check_dimensions, query_terms, sort_candidates, Candidate, IndexStore};
use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{EntryUnit, IndexEntry, IndexInfo};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

struct StoredIndex {
    info: IndexInfo,
    /// Keyed by entry id.
    entries: HashMap<String, IndexEntry>,
}

#[derive(Default)]
pub struct InMemoryStore {
    indices: RwLock<BTreeMap<String, StoredIndex>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, StoredIndex>>> {
        self.indices
            .read()
            .map_err(|_| Error::Store(anyhow::anyhow!("in-memory store lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, StoredIndex>>> {
        self.indices
            .write()
            .map_err(|_| Error::Store(anyhow::anyhow!("in-memory store lock poisoned")))
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn create_index(&self, info: &IndexInfo) -> Result<IndexInfo> {
        let mut indices = self.write()?;
        let stored = indices.entry(info.name.clone()).or_insert_with(|| StoredIndex {
            info: info.clone(),
            entries: HashMap::new(),
        });
        Ok(stored.info.clone())
    }

    async fn get_index(&self, name: &str) -> Result<Option<IndexInfo>> {
        Ok(self.read()?.get(name).map(|s| s.info.clone()))
    }

    async fn delete_index(&self, name: &str) -> Result<bool> {
        Ok(self.write()?.remove(name).is_some())
    }

    async fn list_indices(&self) -> Result<Vec<IndexInfo>> {
        Ok(self.read()?.values().map(|s| s.info.clone()).collect())
    }

    async fn replace_document(
        &self,
        index: &str,
        docs_root: &str,
        doc_name: &str,
        entries: &[IndexEntry],
    ) -> Result<()> {
        let mut indices = self.write()?;
        let stored = indices
            .get_mut(index)
            .ok_or_else(|| Error::IndexNotFound(index.to_string()))?;
        check_dimensions(stored.info.dimension, entries)?;

        stored
            .entries
            .retain(|_, e| !(e.docs_root == docs_root && e.doc_name == doc_name));
        for entry in entries {
            stored.entries.insert(entry.id.clone(), entry.clone());
        }
        Ok(())
    }

    async fn count_entries(&self, index: &str, unit: Option<EntryUnit>) -> Result<usize> {
        let indices = self.read()?;
        let stored = indices
            .get(index)
            .ok_or_else(|| Error::IndexNotFound(index.to_string()))?;
        Ok(stored
            .entries
            .values()
            .filter(|e| unit.map_or(true, |u| e.unit == u))
            .count())
    }

    async fn keyword_search(
        &self,
        index: &str,
        query: &str,
        unit: EntryUnit,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let indices = self.read()?;
        let stored = indices
            .get(index)
            .ok_or_else(|| Error::IndexNotFound(index.to_string()))?;

        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let docs: Vec<(&IndexEntry, Vec<String>)> = stored
            .entries
            .values()
            .filter(|e| e.unit == unit)
            .map(|e| (e, analyze(&e.text)))
            .collect();
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let n = docs.len() as f64;
        let avgdl = docs.iter().map(|(_, t)| t.len() as f64).sum::<f64>() / n;
        let doc_freq: HashMap<&str, f64> = terms
            .iter()
            .map(|term| {
                let df = docs.iter().filter(|(_, t)| t.contains(term)).count() as f64;
                (term.as_str(), df)
            })
            .collect();

        let mut candidates: Vec<Candidate> = docs
            .iter()
            .filter_map(|(entry, toks)| {
                let dl = toks.len() as f64;
                let mut score = 0.0;
                for term in &terms {
                    let tf = toks.iter().filter(|t| *t == term).count() as f64;
                    if tf == 0.0 {
                        continue;
                    }
                    let df = doc_freq.get(term.as_str()).copied().unwrap_or(0.0);
                    let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
                    let norm = if avgdl > 0.0 { dl / avgdl } else { 1.0 };
                    score += idf * tf * (BM25_K1 + 1.0)
                        / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * norm));
                }
                (score > 0.0).then(|| Candidate::from_entry(entry, score))
            })
            .collect();

        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn vector_search(
        &self,
        index: &str,
        vector: &[f32],
        unit: EntryUnit,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let indices = self.read()?;
        let stored = indices
            .get(index)
            .ok_or_else(|| Error::IndexNotFound(index.to_string()))?;

        let mut candidates: Vec<Candidate> = stored
            .entries
            .values()
            .filter(|e| e.unit == unit)
            .map(|e| Candidate::from_entry(e, cosine_similarity(vector, &e.embedding) as f64))
            .collect();

        sort_candidates(&mut candidates);
        candidates.truncate(limit);
        Ok(candidates)
    }
}
