//! Hybrid search engine with keyword, vector, and hybrid retrieval modes.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. Fetch `candidate_k` keyword candidates (BM25) and `candidate_k` vector
//!    candidates (cosine similarity), concurrently.
//! 2. Normalize each set to `[0, 1]` with min-max normalization.
//! 3. Merge by entry: `score = (1 - α) × keyword + α × vector`; a signal the
//!    entry is missing from counts as `0`.
//! 4. For document results without document-level entries, keep the best
//!    chunk per `(docs_root, doc_name)`.
//! 5. Sort by score (desc), `doc_name` (asc), `chunk_index` (asc).
//! 6. Truncate to `final_limit`.
//!
//! In hybrid mode a failed sub-query is logged and the other signal is used
//! alone; if both fail the search fails with
//! [`Error::SearchUnavailable`].
//!
//! Vector retrieval requires the provider to match the index: same dimension,
//! and the same model when the index recorded one. An index holds document
//! entries for all of its documents or for none (the ingestor refuses to mix
//! modes), so document results use one unit for the whole index.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{EntryUnit, ResultUnit, SearchRequest, SearchResultItem};
use crate::retry::RetryPolicy;
use crate::store::{Candidate, IndexStore};

/// Retrieval tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// Weight of the vector signal: `hybrid = (1-α)*keyword + α*vector`.
    pub hybrid_alpha: f64,
    /// Candidates fetched per sub-query.
    pub candidate_k: usize,
    pub final_limit: usize,
    /// Deadline for the whole request.
    pub timeout: Duration,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for SearchParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            hybrid_alpha: config.hybrid_alpha,
            candidate_k: config.candidate_k,
            final_limit: config.final_limit,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[derive(Clone)]
pub struct SearchEngine {
    store: Arc<dyn IndexStore>,
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    params: SearchParams,
}

struct Scored {
    candidate: Candidate,
    score: f64,
}

impl SearchEngine {
    pub fn new(
        store: Arc<dyn IndexStore>,
        provider: Arc<dyn EmbeddingProvider>,
        policy: RetryPolicy,
        params: SearchParams,
    ) -> Self {
        Self {
            store,
            provider,
            policy,
            params,
        }
    }

    /// Run one search request under the configured deadline.
    pub async fn search(&self, req: &SearchRequest) -> Result<Vec<SearchResultItem>> {
        if req.query_text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let deadline = self.params.timeout;
        match tokio::time::timeout(deadline, self.run(req)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(index = %req.index_name, "search timed out");
                Err(Error::Timeout(deadline))
            }
        }
    }

    async fn run(&self, req: &SearchRequest) -> Result<Vec<SearchResultItem>> {
        let index = req.index_name.as_str();
        let info = self
            .store
            .get_index(index)
            .await?
            .ok_or_else(|| Error::IndexNotFound(index.to_string()))?;

        let method = req.search_method;
        if method.uses_vector() && self.provider.dims() != info.dimension {
            return Err(Error::Config(format!(
                "embedding model '{}' produces {} dimensions but index '{}' expects {}",
                self.provider.model_name(),
                self.provider.dims(),
                index,
                info.dimension
            )));
        }
        if let Some(recorded) = info.model_id.as_deref() {
            if method.uses_vector() && recorded != self.provider.model_name() {
                return Err(Error::Config(format!(
                    "index '{}' was built with embedding model '{}' but the provider is '{}'",
                    index,
                    recorded,
                    self.provider.model_name()
                )));
            }
        }

        // Document results come from document-level entries when the index
        // has them, otherwise from chunk hits grouped per document.
        let (unit, aggregate) = match req.result_unit {
            ResultUnit::Chunk => (EntryUnit::Chunk, false),
            ResultUnit::Document => {
                if self.store.count_entries(index, Some(EntryUnit::Document)).await? > 0 {
                    (EntryUnit::Document, false)
                } else {
                    (EntryUnit::Chunk, true)
                }
            }
        };

        let k = self.params.candidate_k;
        let query = req.query_text.as_str();
        let keyword = async {
            if method.uses_keyword() {
                Some(self.store.keyword_search(index, query, unit, k).await)
            } else {
                None
            }
        };
        let vector = async {
            if method.uses_vector() {
                Some(self.vector_candidates(index, query, unit, k).await)
            } else {
                None
            }
        };
        let (keyword, vector) = tokio::join!(keyword, vector);

        let (keyword, vector, alpha) = match (keyword, vector) {
            (Some(kw), None) => (kw?, Vec::new(), 0.0),
            (None, Some(vec)) => (Vec::new(), vec?, 1.0),
            (Some(Ok(kw)), Some(Ok(vec))) => (kw, vec, self.params.hybrid_alpha),
            (Some(Ok(kw)), Some(Err(e))) => {
                warn!(index, error = %e, "vector sub-query failed, using keyword results only");
                (kw, Vec::new(), 0.0)
            }
            (Some(Err(e)), Some(Ok(vec))) => {
                warn!(index, error = %e, "keyword sub-query failed, using vector results only");
                (Vec::new(), vec, 1.0)
            }
            (Some(Err(kw)), Some(Err(vec))) => {
                return Err(Error::SearchUnavailable {
                    keyword: kw.to_string(),
                    vector: vec.to_string(),
                })
            }
            (None, None) => (Vec::new(), Vec::new(), 0.0),
        };
        debug!(
            index,
            method = %method,
            keyword_candidates = keyword.len(),
            vector_candidates = vector.len(),
            "candidates fetched"
        );

        let mut scored = fuse_candidates(&keyword, &vector, alpha);
        if aggregate {
            scored = best_per_document(scored);
        }
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.candidate.doc_name.cmp(&b.candidate.doc_name))
                .then_with(|| a.candidate.chunk_index.cmp(&b.candidate.chunk_index))
                .then_with(|| a.candidate.docs_root.cmp(&b.candidate.docs_root))
        });
        scored.truncate(self.params.final_limit);

        Ok(scored
            .into_iter()
            .map(|s| SearchResultItem {
                text: s.candidate.text,
                score: s.score,
                service: s.candidate.service,
                docs_root: s.candidate.docs_root,
                doc_name: s.candidate.doc_name,
            })
            .collect())
    }

    async fn vector_candidates(
        &self,
        index: &str,
        query: &str,
        unit: EntryUnit,
        k: usize,
    ) -> Result<Vec<Candidate>> {
        let vector = embed_query(self.provider.as_ref(), &self.policy, query).await?;
        if vector.len() != self.provider.dims() {
            return Err(Error::DimensionMismatch {
                expected: self.provider.dims(),
                actual: vector.len(),
            });
        }
        self.store.vector_search(index, &vector, unit, k).await
    }
}

/// Weighted fusion of two normalized signals. Non-decreasing in both.
pub fn fuse_scores(keyword: f64, vector: f64, alpha: f64) -> f64 {
    (1.0 - alpha) * keyword + alpha * vector
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalized to `1.0`.
pub fn normalize_scores(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

fn fuse_candidates(keyword: &[Candidate], vector: &[Candidate], alpha: f64) -> Vec<Scored> {
    let mut merged: HashMap<&str, (&Candidate, f64, f64)> = HashMap::new();
    for (c, s) in normalize_scores(keyword) {
        merged.entry(c.entry_id.as_str()).or_insert((c, 0.0, 0.0)).1 = s;
    }
    for (c, s) in normalize_scores(vector) {
        merged.entry(c.entry_id.as_str()).or_insert((c, 0.0, 0.0)).2 = s;
    }

    merged
        .into_values()
        .map(|(c, k, v)| Scored {
            candidate: c.clone(),
            score: fuse_scores(k, v, alpha),
        })
        .collect()
}

/// Keep the highest-scoring chunk per document (earliest chunk on ties).
fn best_per_document(scored: Vec<Scored>) -> Vec<Scored> {
    let mut best: HashMap<(String, String), Scored> = HashMap::new();
    for s in scored {
        let key = (s.candidate.docs_root.clone(), s.candidate.doc_name.clone());
        match best.get(&key) {
            Some(current)
                if current.score > s.score
                    || (current.score == s.score
                        && current.candidate.chunk_index <= s.candidate.chunk_index) => {}
            _ => {
                best.insert(key, s);
            }
        }
    }
    best.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbedError, InputKind};
    use crate::models::{Chunk, IndexEntry, IndexInfo, SearchMethod};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Embeds onto two axes: "refund" and everything else.
    struct Axis {
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingProvider for Axis {
        async fn embed_input(&self, text: &str, _kind: InputKind) -> std::result::Result<Vec<f32>, EmbedError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(EmbedError::Unavailable("throttled".into()));
            }
            if text.to_lowercase().contains("refund") {
                Ok(vec![1.0, 0.0])
            } else {
                Ok(vec![0.0, 1.0])
            }
        }

        fn model_name(&self) -> &str {
            "axis"
        }

        fn dims(&self) -> usize {
            2
        }
    }

    fn candidate(id: &str, doc: &str, idx: usize, score: f64) -> Candidate {
        Candidate {
            entry_id: id.into(),
            unit: EntryUnit::Chunk,
            docs_root: "s3://b".into(),
            doc_name: doc.into(),
            service: "svc".into(),
            chunk_index: idx,
            text: format!("{} #{}", doc, idx),
            raw_score: score,
        }
    }

    /// Delegates to an in-memory store but fails every keyword query.
    struct KeywordDown(Arc<dyn IndexStore>);

    #[async_trait]
    impl IndexStore for KeywordDown {
        async fn create_index(&self, info: &IndexInfo) -> Result<IndexInfo> {
            self.0.create_index(info).await
        }

        async fn get_index(&self, name: &str) -> Result<Option<IndexInfo>> {
            self.0.get_index(name).await
        }

        async fn delete_index(&self, name: &str) -> Result<bool> {
            self.0.delete_index(name).await
        }

        async fn list_indices(&self) -> Result<Vec<IndexInfo>> {
            self.0.list_indices().await
        }

        async fn replace_document(
            &self,
            index: &str,
            docs_root: &str,
            doc_name: &str,
            entries: &[IndexEntry],
        ) -> Result<()> {
            self.0.replace_document(index, docs_root, doc_name, entries).await
        }

        async fn count_entries(&self, index: &str, unit: Option<EntryUnit>) -> Result<usize> {
            self.0.count_entries(index, unit).await
        }

        async fn keyword_search(
            &self,
            _index: &str,
            _query: &str,
            _unit: EntryUnit,
            _limit: usize,
        ) -> Result<Vec<Candidate>> {
            Err(Error::Store(anyhow::anyhow!("fts unavailable")))
        }

        async fn vector_search(
            &self,
            index: &str,
            vector: &[f32],
            unit: EntryUnit,
            limit: usize,
        ) -> Result<Vec<Candidate>> {
            self.0.vector_search(index, vector, unit, limit).await
        }
    }

    async fn seeded_store() -> Arc<dyn IndexStore> {
        seeded_store_for(None).await
    }

    async fn seeded_store_for(model_id: Option<&str>) -> Arc<dyn IndexStore> {
        let store = InMemoryStore::new();
        store
            .create_index(&IndexInfo {
                name: "docs-2024".into(),
                dimension: 2,
                model_id: model_id.map(str::to_string),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let docs = [
            ("policy.pdf", vec!["Our refund policy: refunds within 30 days.", "Contact billing for help."]),
            ("shipping.pdf", vec!["Shipping takes five days.", "Tracking numbers are emailed."]),
        ];
        for (name, chunks) in docs {
            let entries: Vec<IndexEntry> = chunks
                .iter()
                .enumerate()
                .map(|(i, text)| {
                    let v = if text.to_lowercase().contains("refund") {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    };
                    let chunk = Chunk {
                        docs_root: "s3://bucket".into(),
                        doc_name: name.into(),
                        chunk_index: i,
                        text: text.to_string(),
                    };
                    IndexEntry::for_chunk(&chunk, "manuals", v)
                })
                .collect();
            store
                .replace_document("docs-2024", "s3://bucket", name, &entries)
                .await
                .unwrap();
        }
        Arc::new(store)
    }

    fn engine(store: Arc<dyn IndexStore>, provider: Axis) -> SearchEngine {
        SearchEngine::new(
            store,
            Arc::new(provider),
            RetryPolicy::immediate(1),
            SearchParams::default(),
        )
    }

    fn ok_provider() -> Axis {
        Axis {
            fail: false,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn normalize_handles_empty_single_and_range() {
        assert!(normalize_scores(&[]).is_empty());
        let single = vec![candidate("a", "d", 0, 5.0)];
        assert_eq!(normalize_scores(&single)[0].1, 1.0);

        let range = vec![
            candidate("a", "d", 0, 10.0),
            candidate("b", "d", 1, 5.0),
            candidate("c", "d", 2, 0.0),
        ];
        let norm: Vec<f64> = normalize_scores(&range).iter().map(|(_, s)| *s).collect();
        assert_eq!(norm, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn fusion_is_monotonic_in_each_signal() {
        let steps: Vec<f64> = (0..=10).map(|i| i as f64 / 10.0).collect();
        for alpha in [0.0, 0.3, 0.5, 1.0] {
            for &k in &steps {
                for w in steps.windows(2) {
                    assert!(fuse_scores(k, w[1], alpha) >= fuse_scores(k, w[0], alpha));
                    assert!(fuse_scores(w[1], k, alpha) >= fuse_scores(w[0], k, alpha));
                }
            }
        }
        assert!((fuse_scores(0.8, 0.4, 0.5) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn missing_signal_contributes_zero() {
        let kw = vec![candidate("a", "d", 0, 2.0), candidate("b", "d", 1, 1.0)];
        let vec = vec![candidate("b", "d", 1, 0.9)];
        let fused = fuse_candidates(&kw, &vec, 0.5);
        let a = fused.iter().find(|s| s.candidate.entry_id == "a").unwrap();
        let b = fused.iter().find(|s| s.candidate.entry_id == "b").unwrap();
        assert_eq!(a.score, 0.5);
        assert_eq!(b.score, 0.5);
    }

    #[test]
    fn aggregation_keeps_best_chunk_per_document() {
        let scored = vec![
            Scored { candidate: candidate("a", "x", 0, 0.0), score: 0.2 },
            Scored { candidate: candidate("b", "x", 3, 0.0), score: 0.9 },
            Scored { candidate: candidate("c", "y", 1, 0.0), score: 0.5 },
            Scored { candidate: candidate("d", "y", 0, 0.0), score: 0.5 },
        ];
        let mut best = best_per_document(scored);
        best.sort_by(|a, b| a.candidate.doc_name.cmp(&b.candidate.doc_name));
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].candidate.entry_id, "b");
        assert_eq!(best[1].candidate.entry_id, "d");
    }

    #[tokio::test]
    async fn keyword_chunk_search_finds_refund_policy() {
        let engine = engine(seeded_store().await, ok_provider());
        let req = SearchRequest::new("docs-2024", "refund policy", SearchMethod::Keyword, ResultUnit::Chunk);
        let results = engine.search(&req).await.unwrap();
        assert_eq!(results[0].doc_name, "policy.pdf");
        assert!(results[0].text.contains("refund"));
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[tokio::test]
    async fn document_unit_returns_each_document_once() {
        let engine = engine(seeded_store().await, ok_provider());
        let req = SearchRequest::new("docs-2024", "refund shipping", SearchMethod::Hybrid, ResultUnit::Document);
        let results = engine.search(&req).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_ne!(results[0].doc_name, results[1].doc_name);
    }

    #[tokio::test]
    async fn empty_query_returns_nothing_before_index_lookup() {
        let engine = engine(Arc::new(InMemoryStore::new()), ok_provider());
        let req = SearchRequest::new("missing", "   ", SearchMethod::Hybrid, ResultUnit::Chunk);
        assert!(engine.search(&req).await.unwrap().is_empty());

        let req = SearchRequest::new("missing", "refund", SearchMethod::Hybrid, ResultUnit::Chunk);
        assert!(matches!(engine.search(&req).await.unwrap_err(), Error::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn hybrid_degrades_to_keyword_when_embedding_fails() {
        let failing = Axis {
            fail: true,
            delay: Duration::ZERO,
        };
        let engine = engine(seeded_store().await, failing);
        let hybrid = SearchRequest::new("docs-2024", "refund", SearchMethod::Hybrid, ResultUnit::Chunk);
        let results = engine.search(&hybrid).await.unwrap();
        assert_eq!(results[0].doc_name, "policy.pdf");

        let vector = SearchRequest::new("docs-2024", "refund", SearchMethod::Vector, ResultUnit::Chunk);
        assert!(matches!(
            engine.search(&vector).await.unwrap_err(),
            Error::EmbeddingUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn hybrid_degrades_to_vector_when_keyword_fails() {
        let store: Arc<dyn IndexStore> = Arc::new(KeywordDown(seeded_store().await));
        let engine = engine(store, ok_provider());
        let hybrid = SearchRequest::new("docs-2024", "refund", SearchMethod::Hybrid, ResultUnit::Chunk);
        let results = engine.search(&hybrid).await.unwrap();
        assert_eq!(results[0].doc_name, "policy.pdf");
        assert_eq!(results[0].score, 1.0);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));

        let keyword = SearchRequest::new("docs-2024", "refund", SearchMethod::Keyword, ResultUnit::Chunk);
        assert!(matches!(engine.search(&keyword).await.unwrap_err(), Error::Store(_)));
    }

    #[tokio::test]
    async fn hybrid_fails_when_both_signals_fail() {
        let store: Arc<dyn IndexStore> = Arc::new(KeywordDown(seeded_store().await));
        let failing = Axis {
            fail: true,
            delay: Duration::ZERO,
        };
        let engine = engine(store, failing);
        let hybrid = SearchRequest::new("docs-2024", "refund", SearchMethod::Hybrid, ResultUnit::Document);
        let err = engine.search(&hybrid).await.unwrap_err();
        assert_eq!(err.code(), "search_unavailable");
        match err {
            Error::SearchUnavailable { keyword, vector } => {
                assert!(keyword.contains("fts unavailable"));
                assert!(vector.contains("throttled"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn vector_search_requires_the_recording_model() {
        let eng = engine(seeded_store_for(Some("other-model")).await, ok_provider());
        let vector = SearchRequest::new("docs-2024", "refund", SearchMethod::Vector, ResultUnit::Chunk);
        assert!(matches!(
            eng.search(&vector).await.unwrap_err(),
            Error::Config(ref m) if m.contains("other-model")
        ));

        let keyword = SearchRequest::new("docs-2024", "refund", SearchMethod::Keyword, ResultUnit::Chunk);
        assert_eq!(eng.search(&keyword).await.unwrap()[0].doc_name, "policy.pdf");

        let matching = engine(seeded_store_for(Some("axis")).await, ok_provider());
        assert!(!matching.search(&vector).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_search_times_out() {
        let slow = Axis {
            fail: false,
            delay: Duration::from_secs(5),
        };
        let params = SearchParams {
            timeout: Duration::from_millis(50),
            ..SearchParams::default()
        };
        let engine = SearchEngine::new(seeded_store().await, Arc::new(slow), RetryPolicy::immediate(1), params);
        let req = SearchRequest::new("docs-2024", "refund", SearchMethod::Vector, ResultUnit::Chunk);
        assert!(matches!(engine.search(&req).await.unwrap_err(), Error::Timeout(_)));
    }
}
