//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow for each document: fetch and extract → chunk →
//! embed → replace the document's entries in the index. Documents are
//! processed in parallel (`ingest.workers`), embedding calls go through a
//! shared [`EmbedLimiter`], and a failure only affects its own document.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use futures::future;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk::Chunker;
use crate::config::{Config, DocumentEntries};
use crate::embedding::{mean_normalized, EmbedLimiter};
use crate::error::{Error, Result};
use crate::index::IndexManager;
use crate::models::{Document, EntryUnit, IndexEntry, IndexInfo};
use crate::source::{DocumentSource, SourceObject};
use crate::store::IndexStore;

/// A document that could not be ingested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentFailure {
    pub doc_name: String,
    /// Error code, see [`Error::code`]; `fetch_failed` for source errors.
    pub code: String,
    pub message: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<DocumentFailure>,
    pub chunks_written: usize,
    pub entries_written: usize,
}

impl IngestReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// `Err(IngestionPartialFailure)` when any document failed.
    pub fn into_result(self) -> Result<IngestReport> {
        if self.is_complete() {
            Ok(self)
        } else {
            Err(Error::IngestionPartialFailure(self))
        }
    }

    fn record(&mut self, outcome: DocOutcome) {
        match outcome {
            DocOutcome::Written {
                doc_name,
                chunks,
                entries,
            } => {
                self.succeeded.push(doc_name);
                self.chunks_written += chunks;
                self.entries_written += entries;
            }
            DocOutcome::Failed(failure) => self.failed.push(failure),
        }
    }
}

enum DocOutcome {
    Written {
        doc_name: String,
        chunks: usize,
        entries: usize,
    },
    Failed(DocumentFailure),
}

#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn IndexStore>,
    indices: IndexManager,
    limiter: EmbedLimiter,
    chunker: Chunker,
    workers: usize,
    document_entries: DocumentEntries,
    create_index: bool,
}

impl Ingestor {
    pub fn new(store: Arc<dyn IndexStore>, limiter: EmbedLimiter, chunker: Chunker) -> Self {
        let model_id = Some(limiter.provider().model_name().to_string());
        Self {
            indices: IndexManager::new(store.clone(), model_id),
            store,
            limiter,
            chunker,
            workers: 8,
            document_entries: DocumentEntries::None,
            create_index: false,
        }
    }

    pub fn from_config(
        store: Arc<dyn IndexStore>,
        limiter: EmbedLimiter,
        config: &Config,
    ) -> Result<Self> {
        let chunker = Chunker::from_config(&config.chunking)?;
        Ok(Self::new(store, limiter, chunker)
            .with_workers(config.ingest.workers)
            .with_document_entries(config.ingest.document_entries)
            .with_create_index(config.ingest.create_index))
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_document_entries(mut self, mode: DocumentEntries) -> Self {
        self.document_entries = mode;
        self
    }

    /// Create a missing target index with the provider's dimension.
    pub fn with_create_index(mut self, create: bool) -> Self {
        self.create_index = create;
        self
    }

    /// List `source` and ingest every object into `index`.
    pub async fn ingest(&self, index: &str, source: &dyn DocumentSource) -> Result<IngestReport> {
        let info = self.prepare(index).await?;
        let objects = source.list().await?;
        info!(
            index,
            docs_root = source.docs_root(),
            documents = objects.len(),
            workers = self.workers,
            "starting ingestion"
        );

        let outcomes: Vec<DocOutcome> = stream::iter(objects)
            .map(|object| {
                let info = &info;
                async move {
                    debug!(key = %object.key, bytes = object.size, "fetching document");
                    match source.fetch(&object).await {
                        Ok(doc) => self.ingest_one(info, doc).await,
                        Err(e) => fetch_failure(&object, e),
                    }
                }
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        Ok(self.finish(index, outcomes))
    }

    /// Ingest already-extracted documents into `index`.
    pub async fn ingest_documents(&self, index: &str, documents: Vec<Document>) -> Result<IngestReport> {
        let info = self.prepare(index).await?;
        info!(index, documents = documents.len(), "starting ingestion");

        let outcomes: Vec<DocOutcome> = stream::iter(documents)
            .map(|doc| self.ingest_one(&info, doc))
            .buffer_unordered(self.workers)
            .collect()
            .await;

        Ok(self.finish(index, outcomes))
    }

    /// Resolve the target index and check it against the provider.
    async fn prepare(&self, index: &str) -> Result<IndexInfo> {
        let dims = self.limiter.dims();
        let info = match self.store.get_index(index).await? {
            Some(info) => info,
            None if self.create_index => self.indices.create_index(index, dims).await?,
            None => return Err(Error::IndexNotFound(index.to_string())),
        };
        if info.dimension != dims {
            return Err(Error::Config(format!(
                "embedding model '{}' produces {} dimensions but index '{}' expects {}",
                self.limiter.provider().model_name(),
                dims,
                index,
                info.dimension
            )));
        }
        let model = self.limiter.provider().model_name();
        if let Some(recorded) = info.model_id.as_deref() {
            if recorded != model {
                return Err(Error::Config(format!(
                    "index '{}' was built with embedding model '{}' but the provider is '{}'",
                    index, recorded, model
                )));
            }
        }
        self.check_document_entries(&info).await?;
        Ok(info)
    }

    /// An index holds document entries for every document or for none, so
    /// the entry mode must agree with what the index already holds.
    async fn check_document_entries(&self, info: &IndexInfo) -> Result<()> {
        let documents = self
            .store
            .count_entries(&info.name, Some(EntryUnit::Document))
            .await?;
        let conflict = match self.document_entries {
            DocumentEntries::None => documents > 0,
            DocumentEntries::Mean => {
                documents == 0 && self.store.count_entries(&info.name, Some(EntryUnit::Chunk)).await? > 0
            }
        };
        if conflict {
            return Err(Error::Config(format!(
                "index '{}' {} document entries; set ingest.document_entries = \"{}\" or rebuild the index",
                info.name,
                if documents > 0 { "holds" } else { "holds no" },
                if documents > 0 { "mean" } else { "none" },
            )));
        }
        Ok(())
    }

    async fn ingest_one(&self, info: &IndexInfo, doc: Document) -> DocOutcome {
        let doc_name = doc.doc_name.clone();
        match self.write_document(info, &doc).await {
            Ok((chunks, entries)) => {
                debug!(doc = %doc_name, chunks, entries, "document indexed");
                DocOutcome::Written {
                    doc_name,
                    chunks,
                    entries,
                }
            }
            Err(e) => {
                warn!(doc = %doc_name, error = %e, "document failed");
                DocOutcome::Failed(DocumentFailure {
                    doc_name,
                    code: e.code().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Chunk, embed, and store one document. Returns `(chunks, entries)` written.
    async fn write_document(&self, info: &IndexInfo, doc: &Document) -> Result<(usize, usize)> {
        let chunks: Vec<_> = self
            .chunker
            .chunk(doc)
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .enumerate()
            .map(|(i, mut c)| {
                c.chunk_index = i;
                c
            })
            .collect();

        let vectors = future::try_join_all(chunks.iter().map(|c| self.limiter.embed(&c.text))).await?;
        if let Some(bad) = vectors.iter().find(|v| v.len() != info.dimension) {
            return Err(Error::DimensionMismatch {
                expected: info.dimension,
                actual: bad.len(),
            });
        }

        let doc_vector = match self.document_entries {
            DocumentEntries::Mean => mean_normalized(&vectors),
            DocumentEntries::None => None,
        };

        let mut entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry::for_chunk(chunk, &doc.service, vector))
            .collect();
        if let Some(vector) = doc_vector {
            entries.push(IndexEntry::for_document(doc, vector));
        }

        self.store
            .replace_document(&info.name, &doc.docs_root, &doc.doc_name, &entries)
            .await?;
        Ok((chunks.len(), entries.len()))
    }

    fn finish(&self, index: &str, outcomes: Vec<DocOutcome>) -> IngestReport {
        let mut report = IngestReport::default();
        for outcome in outcomes {
            report.record(outcome);
        }
        report.succeeded.sort();
        report.failed.sort_by(|a, b| a.doc_name.cmp(&b.doc_name));

        info!(
            index,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            chunks = report.chunks_written,
            entries = report.entries_written,
            "ingestion finished"
        );
        report
    }
}

fn fetch_failure(object: &SourceObject, e: anyhow::Error) -> DocOutcome {
    warn!(key = %object.key, error = %e, "failed to fetch document");
    DocOutcome::Failed(DocumentFailure {
        doc_name: object.key.clone(),
        code: "fetch_failed".to_string(),
        message: format!("{:#}", e),
    })
}
