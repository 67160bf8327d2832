//! ticket-rush
//!
//! Ticket drop automation for consumer ticketing sites: poll an event page,
//! find the purchase button by fuzzy text match, click it through a ladder
//! of fallback techniques, then walk the site's checkout funnel until a
//! human has to take over for payment. One browser per bot, a web panel to
//! manage many of them.

pub mod browser;
pub mod finder;
pub mod clicker;
pub mod verify;
pub mod sites;
pub mod bot;
pub mod rate;
pub mod stats;
pub mod web;

use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::{info, warn, error};

use bot::BotConfig;
use rate::Pacing;
use web::registry::TaskRegistry;

/// Panel-wide defaults applied to tasks that do not set their own knobs
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Launch browsers headless unless a task says otherwise
    pub headless: bool,
    /// Default poll delay window
    pub pacing: Pacing,
    /// Default poll attempt ceiling (0 = unlimited)
    pub max_attempts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            headless: false,
            pacing: Pacing::default(),
            max_attempts: 500,
        }
    }
}

impl AppConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ticket-rush").join("config.json"))
    }

    /// Load config from file
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => {
                        match serde_json::from_str(&content) {
                            Ok(config) => {
                                info!("Loaded config from {:?}", path);
                                return config;
                            }
                            Err(e) => {
                                warn!("Failed to parse config file: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }

    /// Fill fields a task config left at their type defaults
    pub fn apply_defaults(&self, config: &mut BotConfig) {
        let type_defaults = BotConfig::default();
        if config.max_attempts == type_defaults.max_attempts {
            config.max_attempts = self.max_attempts;
        }
        if config.pacing.min_delay_ms == type_defaults.pacing.min_delay_ms
            && config.pacing.max_delay_ms == type_defaults.pacing.max_delay_ms
        {
            config.pacing = self.pacing;
        }
        if !config.headless {
            config.headless = self.headless;
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ticket-rush").join("logs"))
}

/// Application state shared across the panel
pub struct AppState {
    /// Bot task registry
    pub registry: TaskRegistry,
    /// Panel defaults
    pub config: RwLock<AppConfig>,
}

impl AppState {
    /// Create new application state with loaded config
    pub fn new() -> Self {
        Self {
            registry: TaskRegistry::new(),
            config: RwLock::new(AppConfig::load()),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging (shared between CLI and server modes)
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "ticket-rush.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = AppConfig {
            headless: true,
            pacing: Pacing { min_delay_ms: 1000, max_delay_ms: 2000 },
            max_attempts: 750,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: AppConfig = serde_json::from_str(&json).unwrap();
        assert!(back.headless);
        assert_eq!(back.pacing.min_delay_ms, 1000);
        assert_eq!(back.max_attempts, 750);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let back: AppConfig = serde_json::from_str("{\"headless\":true}").unwrap();
        assert!(back.headless);
        assert_eq!(back.max_attempts, AppConfig::default().max_attempts);
    }

    #[test]
    fn defaults_only_fill_untouched_fields() {
        let defaults = AppConfig {
            headless: true,
            pacing: Pacing { min_delay_ms: 900, max_delay_ms: 1800 },
            max_attempts: 42,
        };

        let mut untouched = BotConfig {
            url: "https://loket.com/event/x".into(),
            button_text: "Beli".into(),
            ..Default::default()
        };
        defaults.apply_defaults(&mut untouched);
        assert!(untouched.headless);
        assert_eq!(untouched.max_attempts, 42);
        assert_eq!(untouched.pacing.min_delay_ms, 900);

        let mut explicit = BotConfig {
            url: "https://loket.com/event/x".into(),
            button_text: "Beli".into(),
            max_attempts: 10,
            pacing: Pacing { min_delay_ms: 100, max_delay_ms: 200 },
            ..Default::default()
        };
        defaults.apply_defaults(&mut explicit);
        assert_eq!(explicit.max_attempts, 10);
        assert_eq!(explicit.pacing.min_delay_ms, 100);
    }
}
