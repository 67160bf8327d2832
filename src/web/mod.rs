//! Web panel module
//!
//! An axum HTTP server exposing the task registry as a JSON API plus a
//! single embedded dashboard page that polls it.

pub mod auth;
pub mod registry;
pub mod routes;

use std::sync::Arc;
use axum::{response::Html, routing::get, Router};
use tower_http::cors::{CorsLayer, Any};
use tracing::info;

use crate::AppState;

/// The dashboard: one static page, table rows refreshed by polling the API
const DASHBOARD_HTML: &str = include_str!("dashboard.html");

/// Build the complete axum router with API routes and the dashboard.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = routes::api_router(state.clone());

    Router::new()
        .route("/", get(|| async { Html(DASHBOARD_HTML) }))
        .nest("/api", api_routes)
        .layer(cors)
}

/// Start the web server on the given port.
pub async fn start_server(state: Arc<AppState>, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Web panel listening on http://0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
