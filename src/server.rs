//! HTTP server.
//!
//! Exposes ingestion, export and snapshot replay as a JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/uploads?filename=..` | Ingest a CSV/XLSX file sent as the raw body |
//! | `GET`  | `/uploads/{id}` | Upload report by id |
//! | `GET`  | `/exports` | Filtered export; the file is the response body |
//! | `GET`  | `/snapshots` | Snapshot listing, newest first |
//! | `GET`  | `/snapshots/{id}` | Snapshot metadata |
//! | `GET`  | `/snapshots/{id}/items` | Paginated, redacted snapshot replay |
//!
//! The caller identifies itself with the `x-actor` (username) and
//! `x-actor-id` headers; both are optional.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "page must be >= 1" } }
//! ```
//!
//! Error codes: `bad_request` (400), `parse_error` (400), `not_found` (404),
//! `unsupported_format` (415), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use contact_ledger_core::error::LedgerError;
use contact_ledger_core::ingest::IngestSummary;
use contact_ledger_core::models::{Actor, ExportSnapshot, UploadReport};
use contact_ledger_core::report::get_report;
use contact_ledger_core::schema::split_field_list;
use contact_ledger_core::snapshot::{
    get_snapshot, list_snapshots, replay_snapshot, PageRequest, SnapshotList, SnapshotPage,
};
use contact_ledger_core::store::RecordStore;

use crate::config::Config;
use crate::db;
use crate::export::{export_records, ExportRequest};
use crate::sqlite_store::SqliteStore;
use crate::upload::ingest_upload;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn RecordStore>,
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let pool = db::connect(config).await?;
    let state = AppState {
        config: Arc::new(config.clone()),
        store: Arc::new(SqliteStore::new(pool)),
    };

    let app = router(state);

    tracing::info!(bind = %bind_addr, "server listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    let body_limit = usize::try_from(state.config.ingest.max_upload_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(handle_health))
        .route("/uploads", post(handle_upload))
        .route("/uploads/{id}", get(handle_get_report))
        .route("/exports", get(handle_export))
        .route("/snapshots", get(handle_list_snapshots))
        .route("/snapshots/{id}", get(handle_get_snapshot))
        .route("/snapshots/{id}/items", get(handle_snapshot_items))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"not_found"`).
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let status = match &err {
            LedgerError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            LedgerError::SnapshotNotFound(_) | LedgerError::ReportNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            LedgerError::InvalidRequest(_) | LedgerError::Parse(_) => StatusCode::BAD_REQUEST,
            LedgerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ Request helpers ============

fn actor_from_headers(headers: &HeaderMap) -> Actor {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    match value("x-actor") {
        Some(username) => Actor::new(value("x-actor-id"), username),
        None => Actor {
            id: value("x-actor-id"),
            ..Actor::anonymous()
        },
    }
}

/// Parse an optional positive integer query parameter. Values below 1 are
/// passed through as 0 so paging validation can reject them.
fn page_param(params: &HashMap<String, String>, name: &str, default: u64) -> Result<u64, AppError> {
    match params.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<i64>()
            .map(|n| n.max(0) as u64)
            .map_err(|_| bad_request(format!("{} must be an integer", name))),
    }
}

fn page_request(params: &HashMap<String, String>, config: &Config) -> Result<PageRequest, AppError> {
    Ok(PageRequest {
        page: page_param(params, "page", 1)?,
        limit: page_param(params, "limit", config.export.default_page_size)?,
    })
}

// ============ Handlers ============

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

async fn handle_upload(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestSummary>, AppError> {
    let filename = params
        .get("filename")
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .ok_or_else(|| bad_request("filename query parameter is required"))?;
    let actor = actor_from_headers(&headers);

    let summary = ingest_upload(
        state.store.as_ref(),
        &state.config.ingest,
        filename,
        &body,
        actor,
    )
    .await?;
    Ok(Json(summary))
}

async fn handle_get_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UploadReport>, AppError> {
    Ok(Json(get_report(state.store.as_ref(), &id).await?))
}

async fn handle_export(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let mut request = ExportRequest::default();
    for (key, value) in params {
        match key.as_str() {
            "search" => request.search = Some(value),
            "format" => request.format = Some(value),
            "fields" => request.fields = Some(split_field_list(&value)),
            _ => request.filters.push((key, value)),
        }
    }

    let out = export_records(state.store.as_ref(), &request, actor_from_headers(&headers)).await?;

    let mut response = out.bytes.into_response();
    let h = response.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static(out.content_type));
    if let Ok(v) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", out.filename)) {
        h.insert(header::CONTENT_DISPOSITION, v);
    }
    h.insert("x-total-count", HeaderValue::from(out.total));
    if let Some(id) = out.snapshot_id.as_deref() {
        if let Ok(v) = HeaderValue::from_str(id) {
            h.insert("x-snapshot-id", v);
        }
    }
    Ok(response)
}

async fn handle_list_snapshots(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SnapshotList>, AppError> {
    let request = page_request(&params, &state.config)?;
    let list = list_snapshots(
        state.store.as_ref(),
        params.get("username").map(String::as_str),
        request,
        state.config.export.max_page_size,
    )
    .await?;
    Ok(Json(list))
}

async fn handle_get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExportSnapshot>, AppError> {
    Ok(Json(get_snapshot(state.store.as_ref(), &id).await?))
}

async fn handle_snapshot_items(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SnapshotPage>, AppError> {
    let request = page_request(&params, &state.config)?;
    let page = replay_snapshot(
        state.store.as_ref(),
        &id,
        request,
        state.config.export.max_page_size,
    )
    .await?;
    Ok(Json(page))
}
