//! # hsearch CLI
//!
//! ```bash
//! hsearch --config ./config/hsearch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hsearch index create <name>` | Create an index (idempotent for the same dimension) |
//! | `hsearch index delete <name>` | Delete an index (succeeds when absent) |
//! | `hsearch index list` | List index names |
//! | `hsearch index describe <name>` | Show index metadata and entry counts |
//! | `hsearch ingest` | Chunk, embed, and index a document source |
//! | `hsearch search "<query>"` | Search an index |
//! | `hsearch serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! hsearch index create docs-2024 --dimension 1024
//! hsearch ingest --index docs-2024 --docs-url s3://manuals/2024/
//! hsearch search "refund policy" --index docs-2024 --method keyword --unit chunk
//! RUST_LOG=hybrid_search=debug hsearch serve
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use hybrid_search::app::Services;
use hybrid_search::config::{self, Config};
use hybrid_search::embedding::create_provider;
use hybrid_search::index::IndexManager;
use hybrid_search::ingest::IngestReport;
use hybrid_search::models::SearchRequest;
use hybrid_search::server;
use hybrid_search::source::open_source;
use hybrid_search::store::{open_store, IndexStore};

/// Document ingestion and hybrid keyword + vector search.
#[derive(Parser)]
#[command(name = "hsearch", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hsearch.toml")]
    config: PathBuf,

    /// Debug-level logging for this crate.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage indices.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Ingest a document source into an index.
    ///
    /// Lists the source, extracts text, chunks, embeds, and replaces each
    /// document's entries. Exits non-zero when any document failed.
    Ingest {
        /// Target index (defaults to `[ingest].index_name`).
        #[arg(long, env = "OPENSEARCH_INDEX_NAME")]
        index: Option<String>,

        /// `s3://bucket/prefix` or a local directory (defaults to `[ingest].docs_url`).
        #[arg(long, env = "DOCUMENT_S3_URI")]
        docs_url: Option<String>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Search an index.
    Search {
        query: String,

        /// Index to search (defaults to `[ingest].index_name`).
        #[arg(long, env = "OPENSEARCH_INDEX_NAME")]
        index: Option<String>,

        /// `hybrid`, `keyword`, or `vector`.
        #[arg(long, default_value = "hybrid")]
        method: String,

        /// `document` or `chunk`.
        #[arg(long, default_value = "document")]
        unit: String,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum IndexAction {
    Create {
        name: String,
        /// Vector dimension (defaults to `[embedding].dims`).
        #[arg(long)]
        dimension: Option<usize>,
    },
    Delete {
        name: String,
    },
    List,
    Describe {
        name: String,
    },
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("hybrid_search=debug,info")
        } else {
            EnvFilter::new("warn")
        }
    });
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { action } => run_index(&cfg, action).await?,
        Commands::Ingest {
            index,
            docs_url,
            json,
        } => run_ingest(cfg, index, docs_url, json).await?,
        Commands::Search {
            query,
            index,
            method,
            unit,
            json,
        } => {
            let index = resolve_index(&cfg, index)?;
            let req = SearchRequest::parse(&index, &query, &method, &unit)?;
            let services = Services::open(cfg).await?;
            let results = services.search.search(&req).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for (i, r) in results.iter().enumerate() {
                    println!(
                        "{}. [{:.2}] {} ({}) {}",
                        i + 1,
                        r.score,
                        r.doc_name,
                        r.service,
                        r.docs_root
                    );
                    println!("    {}", r.text.replace('\n', " "));
                }
            }
        }
        Commands::Serve => server::run_server(&cfg).await?,
    }

    Ok(())
}

async fn run_index(cfg: &Config, action: IndexAction) -> anyhow::Result<()> {
    let store: Arc<dyn IndexStore> = open_store(&cfg.store).await?;
    let indices = IndexManager::new(store, Some(cfg.embedding.model.clone()));

    match action {
        IndexAction::Create { name, dimension } => {
            let info = indices
                .create_index(&name, dimension.unwrap_or(cfg.embedding.dims))
                .await?;
            println!("index {} (dimension {})", info.name, info.dimension);
        }
        IndexAction::Delete { name } => {
            if indices.delete_index(&name).await? {
                println!("deleted {}", name);
            } else {
                println!("{} not found, nothing to delete", name);
            }
        }
        IndexAction::List => {
            for name in indices.list_indices().await? {
                println!("{}", name);
            }
        }
        IndexAction::Describe { name } => {
            let d = indices.describe_index(&name).await?;
            println!("index {}", d.info.name);
            println!("  dimension: {}", d.info.dimension);
            println!("  model: {}", d.info.model_id.as_deref().unwrap_or("-"));
            println!("  created: {}", d.info.created_at.to_rfc3339());
            println!("  chunk entries: {}", d.chunk_entries);
            println!("  document entries: {}", d.document_entries);
        }
    }
    Ok(())
}

async fn run_ingest(
    cfg: Config,
    index: Option<String>,
    docs_url: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let index = resolve_index(&cfg, index)?;
    let docs_url = docs_url
        .or_else(|| cfg.ingest.docs_url.clone())
        .context("no document source: pass --docs-url or set [ingest].docs_url")?;

    let source = open_source(&docs_url, &cfg.ingest)?;
    let store = open_store(&cfg.store).await?;
    let provider = create_provider(&cfg.embedding)?;
    let services = Services::new(cfg, store, provider)?;

    let report = services.ingestor.ingest(&index, source.as_ref()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&index, &docs_url, &report);
    }
    report.into_result()?;
    Ok(())
}

fn print_report(index: &str, docs_url: &str, report: &IngestReport) {
    println!("ingest {} from {}", index, docs_url);
    println!("  succeeded: {}", report.succeeded.len());
    println!("  failed: {}", report.failed.len());
    println!("  chunks written: {}", report.chunks_written);
    println!("  entries written: {}", report.entries_written);
    for f in &report.failed {
        println!("  ! {} [{}] {}", f.doc_name, f.code, f.message);
    }
    if report.is_complete() {
        println!("ok");
    }
}

fn resolve_index(cfg: &Config, index: Option<String>) -> anyhow::Result<String> {
    index
        .or_else(|| cfg.ingest.index_name.clone())
        .context("no index: pass --index or set [ingest].index_name")
}
