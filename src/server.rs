//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Run a search request |
//! | `GET`  | `/indices` | List index names |
//! | `POST` | `/indices` | Create an index |
//! | `GET`  | `/indices/{name}` | Index metadata and entry counts |
//! | `DELETE` | `/indices/{name}` | Delete an index (idempotent) |
//! | `POST` | `/ingest` | Ingest `s3://` or the configured `ingest.docs_url` into an index |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "index_not_found", "message": "index not found: docs" } }
//! ```
//!
//! Codes and statuses: `invalid_request` / `dimension_mismatch` (400),
//! `index_not_found` (404), `timeout` (408), `schema_conflict` (409),
//! `embedding_rejected` (422), `embedding_unavailable` /
//! `search_unavailable` (503), `config` / `internal` (500). A partially
//! failed ingestion answers 207 with the report next to the error.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::app::Services;
use crate::config::Config;
use crate::error::Error;
use crate::index::IndexDescription;
use crate::ingest::IngestReport;
use crate::models::{IndexInfo, SearchRequest, SearchResultItem};
use crate::source::{open_source, DocsUrl};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    services: Arc<Services>,
}

/// Open the configured services and serve on `[server].bind` until the
/// process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let services = Services::open(config.clone()).await?;
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "listening");
    serve(listener, Arc::new(services)).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, services: Arc<Services>) -> anyhow::Result<()> {
    axum::serve(listener, router(services)).await?;
    Ok(())
}

pub fn router(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", post(handle_search))
        .route("/indices", get(handle_list_indices).post(handle_create_index))
        .route(
            "/indices/{name}",
            get(handle_describe_index).delete(handle_delete_index),
        )
        .route("/ingest", post(handle_ingest))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { services })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<IngestReport>,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    report: Option<IngestReport>,
}

impl AppError {
    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "invalid_request".to_string(),
            message: message.into(),
            report: None,
        }
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidRequest(_) | Error::DimensionMismatch { .. } => StatusCode::BAD_REQUEST,
            Error::IndexNotFound(_) => StatusCode::NOT_FOUND,
            Error::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            Error::SchemaConflict { .. } => StatusCode::CONFLICT,
            Error::EmbeddingRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::EmbeddingUnavailable(_) | Error::SearchUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Error::IngestionPartialFailure(_) => StatusCode::MULTI_STATUS,
            Error::Config(_) | Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(code = err.code(), error = %err, "request failed");
        }
        let code = err.code().to_string();
        let message = err.to_string();
        let report = match err {
            Error::IngestionPartialFailure(report) => Some(report),
            _ => None,
        };
        Self {
            status,
            code,
            message,
            report,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_request(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
            report: self.report,
        };
        (self.status, Json(body)).into_response()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search ============

/// Unknown `searchMethod` / `searchResultUnit` values fail JSON decoding
/// and surface as `invalid_request`.
async fn handle_search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Vec<SearchResultItem>>, AppError> {
    let Json(req) = payload?;
    let results = state.services.search.search(&req).await?;
    Ok(Json(results))
}

// ============ /indices ============

#[derive(Serialize)]
struct IndexListResponse {
    indices: Vec<String>,
}

async fn handle_list_indices(State(state): State<AppState>) -> Result<Json<IndexListResponse>, AppError> {
    let indices = state.services.indices.list_indices().await?;
    Ok(Json(IndexListResponse {
        indices: indices.into_iter().collect(),
    }))
}

#[derive(Deserialize)]
struct CreateIndexBody {
    #[serde(rename = "indexName")]
    index_name: String,
    /// Defaults to the configured embedding dimension.
    dimension: Option<usize>,
}

async fn handle_create_index(
    State(state): State<AppState>,
    payload: Result<Json<CreateIndexBody>, JsonRejection>,
) -> Result<Json<IndexInfo>, AppError> {
    let Json(body) = payload?;
    let dimension = body.dimension.unwrap_or_else(|| state.services.provider.dims());
    let info = state
        .services
        .indices
        .create_index(&body.index_name, dimension)
        .await?;
    Ok(Json(info))
}

async fn handle_describe_index(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<IndexDescription>, AppError> {
    Ok(Json(state.services.indices.describe_index(&name).await?))
}

#[derive(Serialize)]
struct DeleteResponse {
    deleted: bool,
}

async fn handle_delete_index(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let deleted = state.services.indices.delete_index(&name).await?;
    Ok(Json(DeleteResponse { deleted }))
}

// ============ POST /ingest ============

#[derive(Deserialize, Default)]
struct IngestBody {
    #[serde(rename = "indexName")]
    index_name: Option<String>,
    #[serde(rename = "docsUrl")]
    docs_url: Option<String>,
}

/// Ingest `docsUrl` (default `[ingest].docs_url`) into `indexName`
/// (default `[ingest].index_name`).
/// Requests may name any `s3://` location; local directories are only read
/// when they are the configured `ingest.docs_url`.
fn requested_docs_url(url: String, configured: Option<&str>) -> Result<String, AppError> {
    if configured.is_some_and(|c| c.trim() == url.trim()) {
        return Ok(url);
    }
    match DocsUrl::parse(&url) {
        Ok(DocsUrl::S3(_)) => Ok(url),
        Ok(DocsUrl::Local(_)) => Err(AppError::invalid_request(
            "docsUrl must be an s3:// URL; local directories are limited to the configured ingest.docs_url",
        )),
        Err(e) => Err(AppError::invalid_request(format!("{:#}", e))),
    }
}

async fn handle_ingest(
    State(state): State<AppState>,
    payload: Result<Json<IngestBody>, JsonRejection>,
) -> Result<Json<IngestReport>, AppError> {
    let Json(body) = payload?;
    let config = &state.services.config;

    let index = body
        .index_name
        .or_else(|| config.ingest.index_name.clone())
        .ok_or_else(|| AppError::invalid_request("indexName is required"))?;
    let docs_url = match body.docs_url {
        Some(url) => requested_docs_url(url, config.ingest.docs_url.as_deref())?,
        None => config
            .ingest
            .docs_url
            .clone()
            .ok_or_else(|| AppError::invalid_request("docsUrl is required"))?,
    };

    let source = open_source(&docs_url, &config.ingest)
        .map_err(|e| AppError::invalid_request(format!("{:#}", e)))?;
    let report = state
        .services
        .ingestor
        .ingest(&index, source.as_ref())
        .await?
        .into_result()?;
    Ok(Json(report))
}
