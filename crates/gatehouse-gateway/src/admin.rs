//! Admin HTTP endpoints.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness check, always `200 OK`. |
//! | `GET`  | `/ready` | Readiness, with the number of active routes. |
//! | `GET`  | `/routes` | Active routes with their policies and body modes. |
//! | `GET`  | `/policies` | Registered policy implementations. |
//! | `POST` | `/reload` | Reload the route file; `400` on a configuration error. |

use crate::error::{GatewayError, GatewayResult};
use crate::loader::{ConfigLoader, LoadSummary};
use crate::registry::RouteRegistry;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use gatehouse_kernel::{BodyMode, PolicyRegistry, request_body_mode, response_body_mode};
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// State shared across admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub routes: Arc<RouteRegistry>,
    pub policies: Arc<dyn PolicyRegistry>,
    pub loader: Arc<ConfigLoader>,
    pub routes_file: Option<PathBuf>,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/routes", get(list_routes))
        .route("/policies", get(list_policies))
        .route("/reload", post(reload))
        .with_state(state)
}

fn body_mode_name(mode: BodyMode) -> &'static str {
    match mode {
        BodyMode::Skip => "skip",
        BodyMode::Buffered => "buffered",
    }
}

/// GET /health - liveness check
async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "gatehouse" })),
    )
}

/// GET /ready - readiness check
async fn ready(State(state): State<AdminState>) -> impl IntoResponse {
    Json(json!({
        "status": "ready",
        "routes": state.routes.len(),
    }))
}

/// GET /routes - registry snapshot
async fn list_routes(State(state): State<AdminState>) -> impl IntoResponse {
    let mut routes = Map::new();
    for (key, chain) in state.routes.snapshot() {
        let summary = chain.summary();
        routes.insert(
            key,
            json!({
                "request_policies": summary.request_policies,
                "response_policies": summary.response_policies,
                "request_body_mode": body_mode_name(request_body_mode(&chain)),
                "response_body_mode": body_mode_name(response_body_mode(&chain)),
            }),
        );
    }
    Json(json!({ "routes": Value::Object(routes) }))
}

/// GET /policies - registered implementations
async fn list_policies(State(state): State<AdminState>) -> impl IntoResponse {
    let policies: Vec<Value> = state
        .policies
        .list()
        .into_iter()
        .map(|(name, version)| json!({ "name": name, "version": version }))
        .collect();
    Json(json!({ "policies": policies }))
}

/// POST /reload - re-read the route file
async fn reload(State(state): State<AdminState>) -> GatewayResult<Json<LoadSummary>> {
    let path = state.routes_file.clone().ok_or(GatewayError::NoRouteFile)?;
    info!(path = %path.display(), "reload requested via admin API");
    let loader = Arc::clone(&state.loader);
    let summary = tokio::task::spawn_blocking(move || loader.load_file(&path))
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))??;
    Ok(Json(summary))
}
