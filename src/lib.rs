//! # hybrid-search
//!
//! Document ingestion and hybrid keyword + vector retrieval.
//!
//! Documents are read from a source (S3 bucket or local directory), split into
//! sentence-aware chunks, embedded with a remote model (Bedrock, OpenAI,
//! Ollama), and written to a named index. Queries run BM25 keyword search,
//! cosine vector search, or a min-max normalized weighted fusion of both, and
//! return chunks or whole documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │   Sources   │──▶│    Ingestor      │──▶│ IndexStore  │
//! │  S3 / FS    │   │ chunk + embed    │   │ SQLite/mem  │
//! └─────────────┘   └──────────────────┘   └──────┬──────┘
//!                                                 │
//!                                          ┌──────┴──────┐
//!                                          │ SearchEngine│
//!                                          └──────┬──────┘
//!                                     ┌───────────┴──────────┐
//!                                     ▼                      ▼
//!                               ┌──────────┐           ┌──────────┐
//!                               │   CLI    │           │   HTTP   │
//!                               │ (hsearch)│           │  (axum)  │
//!                               └──────────┘           └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`models`] | Core data types |
//! | [`error`] | Structured error taxonomy |
//! | [`chunk`] | Sentence-aware chunker |
//! | [`embedding`] | Embedding providers, retry, concurrency limiting |
//! | [`retry`] | Jittered exponential backoff |
//! | [`aws`] | SigV4 request signing |
//! | [`extract`] | Text extraction (HTML, PDF, DOCX, PPTX) |
//! | [`source`], [`source_s3`], [`source_fs`] | Document sources |
//! | [`store`] | Index storage backends |
//! | [`index`] | Index lifecycle |
//! | [`ingest`] | Ingestion pipeline |
//! | [`search`] | Keyword, vector, and hybrid search |
//! | [`app`] | Component wiring |
//! | [`server`] | HTTP API |

pub mod app;
pub mod aws;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod models;
pub mod retry;
pub mod search;
pub mod server;
pub mod source;
pub mod source_fs;
pub mod source_s3;
pub mod store;
