//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/forms` | Template names (filled outputs excluded) |
//! | `POST` | `/upload` | Multipart upload, field `file` |
//! | `POST` | `/fill` | Fill a template: `{"filename": "...", "data": {...}}` |
//! | `GET`  | `/filled` | Fill records, newest first |
//! | `GET`  | `/uploads/{name}` | Raw template or filled output |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "template not found: a.xlsx" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unsupported_format` (400),
//! `not_found` (404), `invalid_template` (422), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::db;
use crate::error::FormError;
use crate::fetch::HttpImageFetcher;
use crate::migrate;
use crate::models::FillRecord;
use crate::service::{parse_fill_request, FormService};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    service: Arc<FormService>,
}

impl AppState {
    pub fn new(service: Arc<FormService>) -> Self {
        Self { service }
    }
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl+C or
/// SIGTERM.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let config = Arc::new(config.clone());

    let pool = db::connect(&config).await?;
    migrate::run_migrations(&pool).await?;

    let fetcher = Arc::new(HttpImageFetcher::new(&config.fetch)?);
    let service = FormService::new(config.clone(), pool, fetcher).await?;

    let app = build_router(&config, AppState::new(Arc::new(service)));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(
        bind = %config.server.bind,
        upload_dir = %config.storage.upload_dir.display(),
        db = %config.db.path.display(),
        "server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Builds the router; separate from [`run_server`] so tests can drive it
/// in-process.
pub fn build_router(config: &Config, state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let files = ServeDir::new(state.service.templates().dir());
    let base_path = config.server.public_base_path.trim_end_matches('/').to_string();

    Router::new()
        .route("/forms", get(handle_forms))
        .route("/upload", post(handle_upload))
        .route("/fill", post(handle_fill))
        .route("/filled", get(handle_filled))
        .route("/health", get(handle_health))
        .nest_service(&base_path, files)
        .layer(DefaultBodyLimit::max(config.server.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<FormError> for AppError {
    fn from(err: FormError) -> Self {
        let (status, code) = match &err {
            FormError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            FormError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            FormError::UnsupportedFormat(_) => (StatusCode::BAD_REQUEST, "unsupported_format"),
            FormError::InvalidTemplate { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_template")
            }
            FormError::Storage(_) | FormError::RemoteFetch { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
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

// ============ GET /forms ============

#[derive(Serialize)]
struct FormsResponse {
    forms: Vec<String>,
}

async fn handle_forms(State(state): State<AppState>) -> Result<Json<FormsResponse>, AppError> {
    let forms = state.service.list_templates().await?;
    Ok(Json(FormsResponse { forms }))
}

// ============ POST /upload ============

#[derive(Serialize)]
struct UploadResponse {
    message: String,
    filename: String,
    url: String,
}

/// Stores the multipart field `file` under its original file name,
/// replacing any template with the same name.
async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.body_text()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("uploaded file has no file name"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(e.body_text()))?;

        let outcome = state.service.upload(&filename, &bytes).await?;
        return Ok(Json(UploadResponse {
            message: "Uploaded".to_string(),
            filename: outcome.filename,
            url: outcome.url,
        }));
    }
    Err(bad_request("No file uploaded"))
}

// ============ POST /fill ============

#[derive(Serialize)]
struct FillResponse {
    message: String,
    url: String,
}

/// The body is parsed by hand so malformed JSON gets the same 400 error
/// body as a well-formed request with missing fields.
async fn handle_fill(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<FillResponse>, AppError> {
    let value: serde_json::Value =
        serde_json::from_slice(&body).map_err(|_| bad_request("Invalid input"))?;
    let request = parse_fill_request(&value)?;
    let outcome = state.service.fill(&request).await?;
    Ok(Json(FillResponse {
        message: "Form filled".to_string(),
        url: outcome.url,
    }))
}

// ============ GET /filled ============

#[derive(Serialize)]
struct FilledResponse {
    filled: Vec<FillRecord>,
}

async fn handle_filled(State(state): State<AppState>) -> Result<Json<FilledResponse>, AppError> {
    let filled = state.service.filled().await?;
    Ok(Json(FilledResponse { filled }))
}
