use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    response::{IntoResponse, Response},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use simcore::{Config, Engine, IndexReport, SearchError, Stats};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

#[derive(Deserialize)]
pub struct SearchParams {
    pub k: Option<usize>,
    pub min_score: Option<u32>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub took_s: f64,
    pub query_descriptors: usize,
    pub scanned: usize,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub identity: String,
    pub score: u32,
    /// False when the image was removed from the corpus after indexing.
    pub exists: bool,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub corpus_root: PathBuf,
    pub admin_token: Option<String>,
}

/// Error body returned by every handler: `{"error": "..."}` with a matching status.
pub struct AppError(StatusCode, String);

impl AppError {
    fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        AppError(status, msg.into())
    }

    fn internal(e: impl std::fmt::Display) -> Self {
        AppError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

impl From<SearchError> for AppError {
    fn from(e: SearchError) -> Self {
        let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        AppError(status, e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

/// The store must already exist; build it with the `indexer` binary first.
pub fn build_app(store_dir: String, corpus_dir: String, config: Config) -> Result<Router> {
    let engine = Engine::open_existing(&store_dir, config)?;
    let admin_token = std::env::var("ADMIN_TOKEN").ok();
    let state = AppState { engine: Arc::new(engine), corpus_root: PathBuf::from(corpus_dir), admin_token };
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new().allow_origin(AllowOrigin::list(origins)).allow_methods(Any).allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/stats", get(stats_handler))
        .route("/search", post(search_handler))
        .route("/index/rebuild", post(rebuild_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Body is the raw query image; `k` and `min_score` default to the configured values.
pub async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
    body: Bytes,
) -> Result<Json<SearchResponse>, AppError> {
    let start = std::time::Instant::now();
    if body.is_empty() {
        return Err(AppError::new(StatusCode::BAD_REQUEST, "request body must contain an image"));
    }
    let search_cfg = &state.engine.config().search;
    let k = params.k.unwrap_or(search_cfg.top_n).clamp(1, 100);
    let min_score = params.min_score.unwrap_or(search_cfg.min_score);

    let engine = state.engine.clone();
    let outcome = tokio::task::spawn_blocking(move || engine.search_bytes(&body, k, min_score))
        .await
        .map_err(AppError::internal)??;

    let results = outcome
        .results
        .into_iter()
        .map(|r| {
            let exists = state.corpus_root.join(&r.identity).is_file();
            SearchHit { identity: r.identity, score: r.score, exists }
        })
        .collect();
    tracing::info!(k, min_score, total_hits = outcome.total_hits, "search served");
    Ok(Json(SearchResponse {
        took_s: start.elapsed().as_secs_f64(),
        query_descriptors: outcome.query_descriptors,
        scanned: outcome.scanned,
        total_hits: outcome.total_hits,
        results,
    }))
}

pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<Stats>, AppError> {
    let engine = state.engine.clone();
    let root = state.corpus_root.clone();
    let stats = tokio::task::spawn_blocking(move || engine.stats(root.is_dir().then_some(root.as_path())))
        .await
        .map_err(AppError::internal)??;
    Ok(Json(stats))
}

async fn rebuild_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<IndexReport>, AppError> {
    authorize(&state, &headers)?;
    let engine = state.engine.clone();
    let root = state.corpus_root.clone();
    let report = tokio::task::spawn_blocking(move || engine.rebuild_report(&root))
        .await
        .map_err(AppError::internal)??;
    tracing::info!(indexed = report.indexed, "rebuild via admin endpoint");
    Ok(Json(report))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let required = match &state.admin_token {
        Some(t) => t,
        None => return Err(AppError::new(StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set")),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(AppError::new(StatusCode::UNAUTHORIZED, "invalid admin token"))
    }
}
