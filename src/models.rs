//! Core data models used throughout the ingestion and retrieval pipeline.
//!
//! Documents come out of a [`DocumentSource`](crate::source::DocumentSource),
//! are split into [`Chunk`]s, become [`IndexEntry`] records in an index, and
//! come back out of the search engine as [`SearchResultItem`]s.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Error;

/// A raw document pulled from blob storage, after text extraction.
///
/// Identified by `(docs_root, doc_name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path within `docs_root` (for S3: the object key).
    pub doc_name: String,
    /// Storage prefix the document lives under (e.g. `s3://bucket`).
    pub docs_root: String,
    /// Extracted plain text.
    pub raw_text: String,
    /// Source system tag (the parent folder of the object).
    pub service: String,
}

impl Document {
    pub fn new(
        docs_root: impl Into<String>,
        doc_name: impl Into<String>,
        service: impl Into<String>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            docs_root: docs_root.into(),
            doc_name: doc_name.into(),
            service: service.into(),
            raw_text: raw_text.into(),
        }
    }

    /// `docs_root/doc_name`, used in logs and failure reports.
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.docs_root.trim_end_matches('/'), self.doc_name)
    }
}

/// A contiguous span of a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub docs_root: String,
    pub doc_name: String,
    /// 0-based position; defines reconstruction order.
    pub chunk_index: usize,
    pub text: String,
}

/// Granularity of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryUnit {
    Chunk,
    Document,
}

impl EntryUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryUnit::Chunk => "chunk",
            EntryUnit::Document => "document",
        }
    }
}

impl FromStr for EntryUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chunk" => Ok(EntryUnit::Chunk),
            "document" => Ok(EntryUnit::Document),
            other => Err(Error::InvalidRequest(format!("unknown entry unit: {}", other))),
        }
    }
}

/// The persisted record written to an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// Deterministic id, see [`IndexEntry::make_id`].
    pub id: String,
    pub unit: EntryUnit,
    pub docs_root: String,
    pub doc_name: String,
    pub service: String,
    /// Chunk position; `0` for document-level entries.
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

impl IndexEntry {
    /// Build a chunk-level entry from a chunk and its embedding.
    pub fn for_chunk(chunk: &Chunk, service: &str, embedding: Vec<f32>) -> Self {
        Self {
            id: Self::make_id(
                &chunk.docs_root,
                &chunk.doc_name,
                EntryUnit::Chunk,
                chunk.chunk_index,
            ),
            unit: EntryUnit::Chunk,
            docs_root: chunk.docs_root.clone(),
            doc_name: chunk.doc_name.clone(),
            service: service.to_string(),
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
            embedding,
        }
    }

    /// Build the document-level entry for a whole document.
    pub fn for_document(doc: &Document, embedding: Vec<f32>) -> Self {
        Self {
            id: Self::make_id(&doc.docs_root, &doc.doc_name, EntryUnit::Document, 0),
            unit: EntryUnit::Document,
            docs_root: doc.docs_root.clone(),
            doc_name: doc.doc_name.clone(),
            service: doc.service.clone(),
            chunk_index: 0,
            text: doc.raw_text.clone(),
            embedding,
        }
    }

    /// Hex SHA-256 of `docs_root \0 doc_name \0 unit \0 chunk_index`.
    ///
    /// Re-ingesting the same document produces the same ids, so writes
    /// overwrite instead of duplicating.
    pub fn make_id(docs_root: &str, doc_name: &str, unit: EntryUnit, chunk_index: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(docs_root.as_bytes());
        hasher.update([0u8]);
        hasher.update(doc_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(unit.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(chunk_index.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }
}

/// Metadata of a named index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub dimension: usize,
    /// Embedding model the index was created for.
    pub model_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Retrieval strategy requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Hybrid,
    Keyword,
    Vector,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Hybrid => "hybrid",
            SearchMethod::Keyword => "keyword",
            SearchMethod::Vector => "vector",
        }
    }

    pub fn uses_keyword(&self) -> bool {
        matches!(self, SearchMethod::Hybrid | SearchMethod::Keyword)
    }

    pub fn uses_vector(&self) -> bool {
        matches!(self, SearchMethod::Hybrid | SearchMethod::Vector)
    }
}

impl FromStr for SearchMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hybrid" => Ok(SearchMethod::Hybrid),
            "keyword" => Ok(SearchMethod::Keyword),
            "vector" => Ok(SearchMethod::Vector),
            other => Err(Error::InvalidRequest(format!(
                "unknown search method: {}. Use hybrid, keyword, or vector.",
                other
            ))),
        }
    }
}

impl fmt::Display for SearchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Granularity at which results are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultUnit {
    Document,
    Chunk,
}

impl ResultUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultUnit::Document => "document",
            ResultUnit::Chunk => "chunk",
        }
    }
}

impl FromStr for ResultUnit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document" => Ok(ResultUnit::Document),
            "chunk" => Ok(ResultUnit::Chunk),
            other => Err(Error::InvalidRequest(format!(
                "unknown search result unit: {}. Use document or chunk.",
                other
            ))),
        }
    }
}

impl fmt::Display for ResultUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A search request, in wire shape.
///
/// ```json
/// { "indexName": "docs", "text": "refund policy",
///   "searchMethod": "hybrid", "searchResultUnit": "document" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(rename = "indexName")]
    pub index_name: String,
    #[serde(rename = "text")]
    pub query_text: String,
    #[serde(rename = "searchMethod")]
    pub search_method: SearchMethod,
    #[serde(rename = "searchResultUnit")]
    pub result_unit: ResultUnit,
}

impl SearchRequest {
    pub fn new(
        index_name: impl Into<String>,
        query_text: impl Into<String>,
        search_method: SearchMethod,
        result_unit: ResultUnit,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            query_text: query_text.into(),
            search_method,
            result_unit,
        }
    }

    /// Build a request from loosely-typed strings (CLI flags, query params).
    ///
    /// Unknown method or unit values fail here, before any index access.
    pub fn parse(
        index_name: &str,
        query_text: &str,
        search_method: &str,
        result_unit: &str,
    ) -> Result<Self, Error> {
        Ok(Self::new(
            index_name,
            query_text,
            search_method.parse()?,
            result_unit.parse()?,
        ))
    }
}

/// A single ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub text: String,
    pub score: f64,
    pub service: String,
    pub docs_root: String,
    pub doc_name: String,
}
