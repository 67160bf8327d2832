//! ticket-rush - Web Panel Server
//!
//! Runs the multi-bot panel with a web dashboard accessible via browser.
//!
//! Environment variables:
//! - `TICKETRUSH_WEB_PORT` - Server port (default: 8080)
//! - `TICKETRUSH_WEB_USER` - Basic auth username (default: "admin")
//! - `TICKETRUSH_WEB_PASS` - Basic auth password (auth disabled if not set)

use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = ticket_rush::init_logging();

    info!("Starting ticket-rush (panel mode)");

    if let Some(dir) = ticket_rush::log_dir() {
        info!("Log files saved to: {}", dir.display());
    }

    let port: u16 = std::env::var("TICKETRUSH_WEB_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    if std::env::var("TICKETRUSH_WEB_PASS").map(|p| !p.is_empty()).unwrap_or(false) {
        let user = std::env::var("TICKETRUSH_WEB_USER").unwrap_or_else(|_| "admin".to_string());
        info!("Basic auth enabled (user: {})", user);
    } else {
        info!("Basic auth disabled (set TICKETRUSH_WEB_PASS to enable)");
    }

    let state = Arc::new(ticket_rush::AppState::new());

    // No display means launched Chromes must run headless
    {
        let mut config = state.config.write().await;
        let has_display = std::env::var("DISPLAY").map(|d| !d.is_empty()).unwrap_or(false);
        if !has_display && !cfg!(target_os = "windows") && !cfg!(target_os = "macos") && !config.headless {
            info!("Panel mode: no DISPLAY - defaulting launched browsers to headless");
            config.headless = true;
        }
    }

    info!("Application state initialized");
    info!("Dashboard: http://0.0.0.0:{}", port);

    ticket_rush::web::start_server(state, port).await?;

    Ok(())
}
