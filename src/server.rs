//! Web UI and JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Single-page UI |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/models` | Locally available chat models |
//! | `GET`  | `/api/session` | Loaded file, processing state, transcript |
//! | `POST` | `/api/documents` | Upload (multipart field `file`), extract and index |
//! | `POST` | `/api/chat` | Ask a question about the indexed document |
//! | `POST` | `/api/clear` | Empty the vector store and reset the session |
//! | `GET`  | `/api/retrieve?q=&k=` | Inspect raw retrieval results |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `no_content` (400), `no_model` (400),
//! `no_document` (409), `too_large` (413), `answer_failed` (502),
//! `internal` (500).

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::extract::{extract_file_blocking, is_effectively_empty};
use crate::models::{ChatMessage, DocumentKind, UploadedFile};
use crate::pipeline::QaPipeline;
use crate::session::{Session, SessionSnapshot};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Results returned by `/api/retrieve` when `k` is not given.
const DEFAULT_DEBUG_K: usize = 20;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<QaPipeline>,
    pub session: Arc<Session>,
}

impl AppState {
    /// A collection left over from a previous run is adopted as processed.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pipeline = Arc::new(QaPipeline::from_config(config).await?);

        let session = if pipeline.is_ready().await? {
            info!(collection = pipeline.collection(), "loaded existing vector database");
            Session::resumed()
        } else {
            Session::new()
        };

        Ok(Self {
            config: Arc::new(config.clone()),
            pipeline,
            session: Arc::new(session),
        })
    }
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Multipart framing adds a little on top of the file itself.
    let body_limit = state.config.extraction.max_upload_bytes + 64 * 1024;

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/models", get(handle_models))
        .route("/api/session", get(handle_session))
        .route("/api/documents", post(handle_upload))
        .route("/api/chat", post(handle_chat))
        .route("/api/clear", post(handle_clear))
        .route("/api/retrieve", get(handle_retrieve))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Serve the UI on `[server].bind` until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    let app = router(state);

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "server listening");
    println!("docqa listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
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

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
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
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %format!("{:#}", err), "request failed");
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{:#}", err))
}

// ============ GET / and /health ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

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

// ============ GET /api/models ============

#[derive(Serialize)]
struct ModelsResponse {
    models: Vec<String>,
    default_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

async fn handle_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let default_model = state.config.llm.default_model.clone();
    match state.pipeline.list_models().await {
        Ok(models) => Json(ModelsResponse {
            warning: models
                .is_empty()
                .then(|| "No local models detected.".to_string()),
            models,
            default_model,
        }),
        Err(e) => {
            warn!(error = %e, "could not list models");
            Json(ModelsResponse {
                models: Vec::new(),
                default_model,
                warning: Some(format!("No local models detected: {}", e)),
            })
        }
    }
}

// ============ GET /api/session ============

async fn handle_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(state.session.snapshot().await)
}

// ============ POST /api/documents ============

#[derive(Serialize)]
struct UploadResponse {
    file_name: String,
    file_hash: String,
    new_file: bool,
    documents: usize,
    chunks: usize,
    by_kind: BTreeMap<String, usize>,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {}", e)))?;
        upload = Some(UploadedFile::new(name, bytes.to_vec()));
        break;
    }

    let file = upload.ok_or_else(|| bad_request("missing multipart field 'file'"))?;
    let limit = state.config.extraction.max_upload_bytes;
    if file.bytes.len() > limit {
        return Err(AppError::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "too_large",
            format!("file is {} bytes; limit is {}", file.bytes.len(), limit),
        ));
    }

    let file_hash = file.content_hash();
    let new_file = state.session.observe_upload(&file.name, &file_hash).await;
    info!(file = %file.name, bytes = file.bytes.len(), new_file, "upload received");

    let (file, docs) = extract_file_blocking(file, state.config.extraction.clone())
        .await
        .map_err(internal)?;

    if is_effectively_empty(&docs) {
        let reason = docs
            .iter()
            .find(|d| d.metadata.kind == DocumentKind::Error)
            .map(|d| d.content.clone())
            .unwrap_or_else(|| "No data extracted from the file".to_string());
        return Err(AppError::new(StatusCode::BAD_REQUEST, "no_content", reason));
    }

    let report = state.pipeline.create_index(&docs).await.map_err(internal)?;
    state.session.mark_processed(report.clone()).await;

    Ok(Json(UploadResponse {
        file_name: file.name,
        file_hash,
        new_file,
        documents: report.documents,
        chunks: report.chunks,
        by_kind: report.by_kind,
    }))
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    question: String,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(bad_request("question must not be empty"));
    }

    if !state.session.is_processed().await {
        return Err(AppError::new(
            StatusCode::CONFLICT,
            "no_document",
            "Please upload and process a document first.",
        ));
    }

    let model = req
        .model
        .filter(|m| !m.trim().is_empty())
        .or_else(|| state.config.llm.default_model.clone())
        .ok_or_else(|| {
            AppError::new(
                StatusCode::BAD_REQUEST,
                "no_model",
                "No model selected and llm.default_model is not set.",
            )
        })?;

    state.session.push_message(ChatMessage::user(question)).await;

    match state.pipeline.answer(question, &model).await {
        Ok(answer) => {
            state
                .session
                .push_message(ChatMessage::assistant(answer.clone()))
                .await;
            Ok(Json(ChatResponse { answer }))
        }
        Err(e) => {
            error!(error = %format!("{:#}", e), "question answering failed");
            let message = format!("Error: {:#}. Please try rephrasing your question.", e);
            state
                .session
                .push_message(ChatMessage::assistant(message.clone()))
                .await;
            Err(AppError::new(StatusCode::BAD_GATEWAY, "answer_failed", message))
        }
    }
}

// ============ POST /api/clear ============

async fn handle_clear(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.pipeline.clear().await.map_err(internal)?;
    state.session.clear().await;
    Ok(Json(serde_json::json!({ "status": "cleared" })))
}

// ============ GET /api/retrieve ============

#[derive(Deserialize)]
struct RetrieveParams {
    q: String,
    k: Option<usize>,
}

#[derive(Serialize)]
struct RetrievedItem {
    score: f32,
    priority: String,
    kind: String,
    source: String,
    chunk_index: i64,
    text: String,
}

async fn handle_retrieve(
    State(state): State<AppState>,
    Query(params): Query<RetrieveParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    if params.q.trim().is_empty() {
        return Err(bad_request("q must not be empty"));
    }
    let k = params.k.unwrap_or(DEFAULT_DEBUG_K).max(1);
    let hits = state
        .pipeline
        .debug_retrieval(&params.q, k)
        .await
        .map_err(internal)?;

    let results: Vec<RetrievedItem> = hits
        .into_iter()
        .map(|h| RetrievedItem {
            score: h.score,
            priority: h.chunk.priority.to_string(),
            kind: h.chunk.metadata.kind.to_string(),
            source: h.chunk.metadata.source,
            chunk_index: h.chunk.chunk_index,
            text: h.chunk.text,
        })
        .collect();
    Ok(Json(serde_json::json!({ "results": results })))
}
