//! HTTP route handlers for the web panel.
//!
//! Task CRUD maps onto the registry; everything returns JSON except the
//! dashboard page and the log tail.

use std::sync::Arc;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use tracing::info;

use crate::AppState;
use crate::bot::BotConfig;

/// JSON error response helper
fn err_response(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": msg })))
}

/// Build the API router with all endpoints.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Tasks
        .route("/tasks", get(list_tasks).post(start_task))
        .route("/tasks/:id", delete(delete_task))
        .route("/tasks/:id/stop", post(stop_task))
        .route("/tasks/:id/restart", post(restart_task))
        .route("/tasks/:id/log", get(task_log))
        // Auto-buy control
        .route("/tasks/:id/auto-buy", post(set_auto_buy))
        .route("/tasks/:id/auto-buy/pause", post(pause_auto_buy))
        .route("/tasks/:id/auto-buy/resume", post(resume_auto_buy))
        // Global
        .route("/status", get(global_status))
        .route("/defaults", get(get_defaults))
        // Auth middleware (only if TICKETRUSH_WEB_PASS is set)
        .layer(middleware::from_fn(super::auth::basic_auth_middleware))
        .layer(Extension(state))
}

// ========== Task Handlers ==========

async fn list_tasks(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.registry.rows())
}

async fn start_task(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<BotConfig>,
) -> impl IntoResponse {
    // Panel-started bots take their knobs from the saved defaults unless
    // the request sets them explicitly; selections arrive via the panel
    let defaults = state.config.read().await.clone();
    let mut config = request;
    config.await_selection = true;
    defaults.apply_defaults(&mut config);

    match state.registry.start(config).await {
        Ok(id) => {
            info!("Task started via web API: {}", id);
            Json(serde_json::json!({ "id": id })).into_response()
        }
        Err(e) => err_response(StatusCode::BAD_REQUEST, &e).into_response(),
    }
}

async fn stop_task(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    info!("Stopping task via web API: {}", id);
    match state.registry.stop(&id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, &e).into_response(),
    }
}

async fn restart_task(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    info!("Restarting task via web API: {}", id);
    match state.registry.restart(&id).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, &e).into_response(),
    }
}

async fn delete_task(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.delete(&id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, &e).into_response(),
    }
}

#[derive(serde::Deserialize)]
struct LogQuery {
    #[serde(default = "default_log_lines")]
    lines: usize,
}

fn default_log_lines() -> usize {
    200
}

async fn task_log(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> impl IntoResponse {
    match state.registry.log_tail(&id, query.lines) {
        Ok(tail) => tail.into_response(),
        Err(e) => err_response(StatusCode::NOT_FOUND, &e).into_response(),
    }
}

// ========== Auto-buy Handlers ==========

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutoBuyRequest {
    ticket_category: String,
    #[serde(default = "default_quantity")]
    ticket_quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

async fn set_auto_buy(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<AutoBuyRequest>,
) -> impl IntoResponse {
    info!("Auto-buy selection via web API: task {} -> {} x{}", id, request.ticket_category, request.ticket_quantity);
    match state.registry.set_auto_buy(&id, &request.ticket_category, request.ticket_quantity) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, &e).into_response(),
    }
}

async fn pause_auto_buy(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.pause_auto_buy(&id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, &e).into_response(),
    }
}

async fn resume_auto_buy(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.resume_auto_buy(&id) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => err_response(StatusCode::BAD_REQUEST, &e).into_response(),
    }
}

// ========== Global Handlers ==========

async fn global_status(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.registry.global_snapshot())
}

async fn get_defaults(
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let config = state.config.read().await.clone();
    Json(config)
}
