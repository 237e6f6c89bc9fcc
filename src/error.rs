//! Error taxonomy for ingestion and retrieval.
//!
//! [`Error`] carries the structured failures that callers (CLI, HTTP server,
//! library users) need to distinguish. Glue code that only needs to report a
//! failure keeps using `anyhow`; anything crossing the store boundary is
//! wrapped in [`Error::Store`].
//!
//! | Variant | Retryable | HTTP |
//! |---------|-----------|------|
//! | `EmbeddingUnavailable` | yes (by the embedding client) | 503 |
//! | `EmbeddingRejected` | no | 422 |
//! | `DimensionMismatch` | no | 400 |
//! | `SchemaConflict` | no | 409 |
//! | `IndexNotFound` | no | 404 |
//! | `InvalidRequest` | no | 400 |
//! | `SearchUnavailable` | no | 503 |
//! | `Timeout` | no | 408 |
//! | `IngestionPartialFailure` | no | 207 |

use std::time::Duration;

use crate::ingest::IngestReport;

/// Structured failure returned by the core components.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transient provider failure (timeout, throttling, 5xx). Retried with backoff.
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Permanent provider failure (input too long, invalid encoding, 4xx).
    #[error("embedding rejected: {0}")]
    EmbeddingRejected(String),

    /// A vector whose length differs from the index schema.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("index '{name}' already exists with dimension {existing} (requested {requested})")]
    SchemaConflict {
        name: String,
        existing: usize,
        requested: usize,
    },

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Both hybrid sub-queries failed.
    #[error("search unavailable: keyword: {keyword}; vector: {vector}")]
    SearchUnavailable { keyword: String, vector: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("ingestion finished with {} failed document(s)", .0.failed.len())]
    IngestionPartialFailure(IngestReport),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::EmbeddingUnavailable(_) => "embedding_unavailable",
            Error::EmbeddingRejected(_) => "embedding_rejected",
            Error::DimensionMismatch { .. } => "dimension_mismatch",
            Error::SchemaConflict { .. } => "schema_conflict",
            Error::IndexNotFound(_) => "index_not_found",
            Error::InvalidRequest(_) => "invalid_request",
            Error::SearchUnavailable { .. } => "search_unavailable",
            Error::Timeout(_) => "timeout",
            Error::IngestionPartialFailure(_) => "ingestion_partial_failure",
            Error::Config(_) => "config",
            Error::Store(_) => "internal",
        }
    }

    /// Only transient provider failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::EmbeddingUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(Error::EmbeddingUnavailable("throttled".into()).is_retryable());
        assert!(!Error::EmbeddingRejected("too long".into()).is_retryable());
        assert!(!Error::IndexNotFound("x".into()).is_retryable());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::IndexNotFound("x".into()).code(), "index_not_found");
        assert_eq!(
            Error::SchemaConflict {
                name: "x".into(),
                existing: 3,
                requested: 4
            }
            .code(),
            "schema_conflict"
        );
        assert_eq!(Error::Store(anyhow::anyhow!("boom")).code(), "internal");
    }

    #[test]
    fn schema_conflict_message_names_both_dimensions() {
        let msg = Error::SchemaConflict {
            name: "docs".into(),
            existing: 1024,
            requested: 512,
        }
        .to_string();
        assert!(msg.contains("1024"));
        assert!(msg.contains("512"));
    }
}
