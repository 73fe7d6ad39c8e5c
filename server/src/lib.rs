use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use ferret_core::{SearchHandle, SearchOutput, SearchRequest, SearchStore, SledEngine};

#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchHandle<SledEngine>>,
}

/// Open the sled-backed engine at `data_dir` and wrap it in the HTTP
/// surface.
pub fn build_app(data_dir: &str) -> Result<Router> {
    let engine = SledEngine::open(data_dir)?;
    Ok(app_with_handle(Arc::new(SearchHandle::new(engine))))
}

/// Build the router around an existing handle.
pub fn app_with_handle(search: Arc<SearchHandle<SledEngine>>) -> Router {
    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", post(search_handler))
        .route("/doc/:doc_id", put(put_doc_handler).get(doc_handler).delete(delete_doc_handler))
        .with_state(AppState { search })
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn search_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchOutput>, AppError> {
    let output = state.search.search(request).await?;
    Ok(Json(output))
}

async fn doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<Value>, Response> {
    match state.search.store().get_doc(&doc_id).await {
        Ok(doc) => Ok(Json(doc)),
        Err(error) => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": error.to_string() })),
        )
            .into_response()),
    }
}

async fn put_doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
    Json(doc): Json<Value>,
) -> Result<Json<Value>, AppError> {
    state.search.store().put_doc(&doc_id, &doc)?;
    Ok(Json(json!({ "ok": true, "id": doc_id })))
}

async fn delete_doc_handler(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.search.store().delete_doc(&doc_id)?;
    Ok(Json(json!({ "ok": true, "id": doc_id })))
}

/// Store and search failures surface as 500s with a JSON error body; axum's
/// extractors reject malformed requests with 400s before we get here.
struct AppError(anyhow::Error);

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self(error)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": self.0.to_string() })),
        )
            .into_response()
    }
}
