//! Storage abstraction for named indices.
//!
//! The [`IndexStore`] trait is the search substrate: it holds index metadata
//! and entries, and answers keyword (BM25) and vector (cosine) queries over
//! one index at a time. Two backends ship:
//!
//! - [`SqliteStore`]: WAL-mode SQLite with an FTS5 table for keyword search
//!   and brute-force cosine similarity over stored embeddings.
//! - [`InMemoryStore`]: `RwLock`-guarded maps with an in-process BM25 scorer;
//!   used for tests and `store.backend = "memory"`.
//!
//! Implementations must be `Send + Sync`; components share one store through
//! an `Arc<dyn IndexStore>`.

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::models::{EntryUnit, IndexEntry, IndexInfo};

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

/// A hit returned from keyword or vector search.
///
/// Carries everything needed for normalization, fusion, and document
/// aggregation without another round-trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entry_id: String,
    pub unit: EntryUnit,
    pub docs_root: String,
    pub doc_name: String,
    pub service: String,
    pub chunk_index: usize,
    pub text: String,
    /// Backend score, higher is better (BM25 or cosine similarity).
    pub raw_score: f64,
}

impl Candidate {
    pub fn from_entry(entry: &IndexEntry, raw_score: f64) -> Self {
        Self {
            entry_id: entry.id.clone(),
            unit: entry.unit,
            docs_root: entry.docs_root.clone(),
            doc_name: entry.doc_name.clone(),
            service: entry.service.clone(),
            chunk_index: entry.chunk_index,
            text: entry.text.clone(),
            raw_score,
        }
    }
}

/// Abstract search substrate.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_index`](IndexStore::create_index) | Insert index metadata unless the name exists |
/// | [`get_index`](IndexStore::get_index) | Look up index metadata |
/// | [`delete_index`](IndexStore::delete_index) | Drop an index and all its entries |
/// | [`list_indices`](IndexStore::list_indices) | All indices |
/// | [`replace_document`](IndexStore::replace_document) | Atomically swap one document's entries |
/// | [`count_entries`](IndexStore::count_entries) | Entry count, optionally per unit |
/// | [`keyword_search`](IndexStore::keyword_search) | BM25 over entry text, terms OR-ed |
/// | [`vector_search`](IndexStore::vector_search) | Cosine similarity over embeddings |
///
/// Operations on an index that does not exist fail with
/// [`Error::IndexNotFound`](crate::error::Error::IndexNotFound).
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Create the index unless one with this name exists. Returns the stored
    /// metadata, which is the pre-existing one when the name was taken.
    async fn create_index(&self, info: &IndexInfo) -> Result<IndexInfo>;

    async fn get_index(&self, name: &str) -> Result<Option<IndexInfo>>;

    /// Returns `true` when an index was removed.
    async fn delete_index(&self, name: &str) -> Result<bool>;

    async fn list_indices(&self) -> Result<Vec<IndexInfo>>;

    /// Remove every entry of `(docs_root, doc_name)` and write `entries` in
    /// their place, all or nothing. Every embedding must match the index
    /// dimension ([`Error::DimensionMismatch`](crate::error::Error::DimensionMismatch)).
    async fn replace_document(
        &self,
        index: &str,
        docs_root: &str,
        doc_name: &str,
        entries: &[IndexEntry],
    ) -> Result<()>;

    async fn count_entries(&self, index: &str, unit: Option<EntryUnit>) -> Result<usize>;

    /// BM25 keyword search; an entry matches when it contains any query term.
    async fn keyword_search(
        &self,
        index: &str,
        query: &str,
        unit: EntryUnit,
        limit: usize,
    ) -> Result<Vec<Candidate>>;

    async fn vector_search(
        &self,
        index: &str,
        vector: &[f32],
        unit: EntryUnit,
        limit: usize,
    ) -> Result<Vec<Candidate>>;
}

/// Open the configured backend. SQLite migrations run here.
pub async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn IndexStore>> {
    match config.backend {
        StoreBackend::Sqlite => Ok(Arc::new(SqliteStore::open(&config.path).await?)),
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
    }
}

/// Index terms for `text`, in order.
///
/// Runs of letters and digits become lowercased word terms. Han, kana and
/// Hangul are written without spaces, so runs of those become overlapping
/// character bigrams (a lone character stays a unigram). Both stores index
/// and query with the same terms.
pub fn analyze(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut word = String::new();
    let mut cjk: Vec<char> = Vec::new();

    for c in text.chars() {
        if is_cjk(c) {
            flush_word(&mut word, &mut terms);
            cjk.push(c);
        } else if c.is_alphanumeric() {
            flush_cjk(&mut cjk, &mut terms);
            word.extend(c.to_lowercase());
        } else {
            flush_word(&mut word, &mut terms);
            flush_cjk(&mut cjk, &mut terms);
        }
    }
    flush_word(&mut word, &mut terms);
    flush_cjk(&mut cjk, &mut terms);
    terms
}

fn flush_word(word: &mut String, terms: &mut Vec<String>) {
    if !word.is_empty() {
        terms.push(std::mem::take(word));
    }
}

fn flush_cjk(run: &mut Vec<char>, terms: &mut Vec<String>) {
    match run.len() {
        0 => {}
        1 => terms.push(run[0].to_string()),
        _ => terms.extend(run.windows(2).map(|w| w.iter().collect::<String>())),
    }
    run.clear();
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'   // hiragana, katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{F900}'..='\u{FAFF}' // compatibility ideographs
        | '\u{AC00}'..='\u{D7AF}' // hangul syllables
        | '\u{FF66}'..='\u{FF9F}' // halfwidth katakana
        | '\u{3005}'               // 々
    )
}

/// De-duplicated [`analyze`] terms of a query.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in analyze(text) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Check an entry batch against the index dimension.
pub(crate) fn check_dimensions(expected: usize, entries: &[IndexEntry]) -> Result<()> {
    match entries.iter().find(|e| e.embedding.len() != expected) {
        Some(bad) => Err(crate::error::Error::DimensionMismatch {
            expected,
            actual: bad.embedding.len(),
        }),
        None => Ok(()),
    }
}

/// Highest score first, then document order.
pub(crate) fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_name.cmp(&b.doc_name))
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
}
