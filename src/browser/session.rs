//! Browser session management
//!
//! Launches a dedicated Chrome instance over CDP, or attaches to an
//! already-running Chrome through its remote-debugging endpoint so a bot can
//! drive a browser the operator is watching.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn, debug};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;

use super::BrowserError;

/// Global counter for sequential session naming (Bot-1, Bot-2, ...)
static BOT_COUNTER: AtomicU32 = AtomicU32::new(1);

/// Reset the session counter back to 1 (call when all tasks are gone)
pub fn reset_bot_counter() {
    BOT_COUNTER.store(1, Ordering::Relaxed);
}

/// Find Chrome/Chromium executable on the system
fn find_chrome() -> Option<std::path::PathBuf> {
    let candidates: Vec<std::path::PathBuf> = if cfg!(target_os = "windows") {
        let mut paths = vec![
            std::path::PathBuf::from(r"C:\Program Files\Google\Chrome\Application\chrome.exe"),
            std::path::PathBuf::from(r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe"),
        ];
        if let Ok(local) = std::env::var("LOCALAPPDATA") {
            paths.push(std::path::PathBuf::from(format!(r"{}\Google\Chrome\Application\chrome.exe", local)));
        }
        paths
    } else if cfg!(target_os = "macos") {
        vec![
            std::path::PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        ]
    } else {
        vec![
            std::path::PathBuf::from("/usr/bin/google-chrome"),
            std::path::PathBuf::from("/usr/bin/google-chrome-stable"),
            std::path::PathBuf::from("/usr/bin/chromium"),
            std::path::PathBuf::from("/usr/bin/chromium-browser"),
        ]
    };

    candidates.into_iter().find(|p| p.exists())
}

/// Configuration for a browser session
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Path to Chrome/Chromium executable
    pub chrome_path: Option<String>,
    /// Run in headless mode
    pub headless: bool,
    /// User data directory
    pub user_data_dir: Option<String>,
    /// Remote-debugging endpoint of an already-running Chrome (host:port).
    /// When set, the session attaches instead of launching.
    pub debugger_address: Option<String>,
    /// Open a fresh tab after attaching instead of reusing the active one
    pub open_new_tab: bool,
    /// Page-load / script timeout in seconds
    pub timeout_secs: u64,
    /// Window width
    pub window_width: u32,
    /// Window height
    pub window_height: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: false,
            user_data_dir: None,
            debugger_address: None,
            open_new_tab: false,
            timeout_secs: 30,
            window_width: 1200,
            window_height: 800,
        }
    }
}

impl SessionConfig {
    /// Create config for a task-scoped session with its own data directory
    pub fn for_task(task_id: &str) -> Self {
        let base = std::env::temp_dir()
            .join("ticket-rush")
            .join("browser_data");

        let user_data_dir = base.join(task_id).to_string_lossy().to_string();

        Self {
            user_data_dir: Some(user_data_dir),
            ..Default::default()
        }
    }

    /// Set headless mode
    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Set remote-debugging address to attach to
    pub fn debugger_address(mut self, addr: Option<String>) -> Self {
        self.debugger_address = addr;
        self
    }

    /// Open a new tab after attaching
    pub fn open_new_tab(mut self, open: bool) -> Self {
        self.open_new_tab = open;
        self
    }

    /// Set Chrome path
    pub fn chrome_path(mut self, path: Option<String>) -> Self {
        self.chrome_path = path;
        self
    }

    /// Set user data directory
    pub fn user_data_dir(mut self, dir: Option<String>) -> Self {
        self.user_data_dir = dir;
        self
    }

    /// Set timeout
    pub fn timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Resolve the CDP WebSocket URL for a debugger address (host:port).
///
/// Chrome publishes it at `http://<addr>/json/version` as
/// `webSocketDebuggerUrl`. Accepts a bare port, host:port, or a full ws URL.
async fn resolve_ws_url(addr: &str) -> Result<String, BrowserError> {
    let addr = addr.trim();
    if addr.starts_with("ws://") || addr.starts_with("wss://") {
        return Ok(addr.to_string());
    }

    let host_port = if addr.contains(':') {
        addr.to_string()
    } else {
        format!("127.0.0.1:{}", addr)
    };

    let version_url = format!("http://{}/json/version", host_port);
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| BrowserError::AttachFailed(e.to_string()))?;

    let data: serde_json::Value = client
        .get(&version_url)
        .send()
        .await
        .map_err(|e| BrowserError::AttachFailed(format!("{}: {}", version_url, e)))?
        .json()
        .await
        .map_err(|e| BrowserError::AttachFailed(format!("bad /json/version payload: {}", e)))?;

    data.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| BrowserError::AttachFailed(format!("no webSocketDebuggerUrl at {}", version_url)))
}

/// A browser session for automation.
///
/// One session owns (or is attached to) one Chrome instance and drives a
/// single page. All DOM work goes through `execute_js`; raw CDP input events
/// are used for native clicks.
pub struct BrowserSession {
    /// Display name, e.g. "Bot-1"
    pub id: String,
    /// The browser instance
    browser: Arc<RwLock<Option<Browser>>>,
    /// Current active page
    page: Arc<RwLock<Option<Page>>>,
    /// Session configuration
    config: SessionConfig,
    /// True when attached to an external Chrome (never kill it on close)
    attached: bool,
    /// Whether the CDP connection is still up
    alive: Arc<AtomicBool>,
}

impl BrowserSession {
    /// Create a new browser session: attach if a debugger address is
    /// configured, otherwise launch a dedicated Chrome.
    pub async fn new(config: SessionConfig) -> Result<Self, BrowserError> {
        let session_id = format!("Bot-{}", BOT_COUNTER.fetch_add(1, Ordering::Relaxed));

        let attached = config.debugger_address.is_some();
        let (browser, handler, page) = if let Some(ref addr) = config.debugger_address {
            Self::attach(&session_id, addr, config.open_new_tab).await?
        } else {
            Self::launch(&session_id, &config).await?
        };

        // Spawn handler in background -- when the stream ends, Chrome is gone
        let session_id_clone = session_id.clone();
        let alive_flag = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive_flag.clone();
        let mut handler = handler;
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("Session {} browser event: {:?}", session_id_clone, event);
            }
            warn!("Session {} Chrome disconnected (event handler ended)", session_id_clone);
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        // Soften the most obvious automation tell before any page loads
        let webdriver_patch = chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams::new(
            "Object.defineProperty(navigator, 'webdriver', { get: () => undefined })",
        );
        let _ = page.execute(webdriver_patch).await;

        info!("Browser session {} ready (attached: {}, headless: {})",
            session_id, attached, config.headless);

        Ok(Self {
            id: session_id,
            browser: Arc::new(RwLock::new(Some(browser))),
            page: Arc::new(RwLock::new(Some(page))),
            config,
            attached,
            alive: alive_flag,
        })
    }

    /// Launch a dedicated Chrome instance
    async fn launch(
        session_id: &str,
        config: &SessionConfig,
    ) -> Result<(Browser, chromiumoxide::handler::Handler, Page), BrowserError> {
        info!("Launching browser session {} (headless: {})", session_id, config.headless);

        if config.chrome_path.is_none() && find_chrome().is_none() {
            return Err(BrowserError::LaunchFailed(
                "Chrome not found. Install Google Chrome or Chromium and retry.".to_string(),
            ));
        }

        let mut builder = BrowserConfig::builder()
            // Anti-detection flags carried by every bot generation
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-default-browser-check")
            .arg("--no-first-run")
            // Keep clicks flowing when the window loses focus
            .arg("--disable-background-timer-throttling")
            .arg("--disable-backgrounding-occluded-windows")
            .arg("--disable-renderer-backgrounding")
            .window_size(config.window_width, config.window_height);

        if cfg!(target_os = "linux") {
            builder = builder.no_sandbox().arg("--disable-dev-shm-usage");
        }

        if config.headless {
            // --headless=new is required on modern Chrome; .with_head() stops
            // chromiumoxide from injecting the legacy --headless flag first
            builder = builder.with_head().arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        } else if let Some(chrome_path) = find_chrome() {
            info!("Auto-detected Chrome at: {}", chrome_path.display());
            builder = builder.chrome_executable(chrome_path);
        }

        if let Some(ref dir) = config.user_data_dir {
            let _ = std::fs::create_dir_all(dir);
            builder = builder.user_data_dir(dir);
        }

        let browser_config = builder.build()
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        let (browser, handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Chrome opens with a blank tab; take it and close extras
        let page = {
            let mut pages = browser.pages().await
                .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

            let main_page = if !pages.is_empty() {
                pages.remove(0)
            } else {
                browser.new_page("about:blank")
                    .await
                    .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?
            };

            for extra_page in pages {
                debug!("Closing extra blank tab");
                let _ = extra_page.close().await;
            }

            main_page
        };

        Ok((browser, handler, page))
    }

    /// Attach to an already-running Chrome via its debugger address
    async fn attach(
        session_id: &str,
        addr: &str,
        open_new_tab: bool,
    ) -> Result<(Browser, chromiumoxide::handler::Handler, Page), BrowserError> {
        info!("Session {} attaching to Chrome at {}", session_id, addr);

        let ws_url = resolve_ws_url(addr).await?;
        let (mut browser, handler) = Browser::connect(&ws_url)
            .await
            .map_err(|e| BrowserError::AttachFailed(e.to_string()))?;

        // Targets that were open before we connected are not known yet
        let _ = browser.fetch_targets().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let page = if open_new_tab {
            browser.new_page("about:blank")
                .await
                .map_err(|e| BrowserError::AttachFailed(e.to_string()))?
        } else {
            let pages = browser.pages().await
                .map_err(|e| BrowserError::AttachFailed(e.to_string()))?;
            match pages.into_iter().next() {
                Some(p) => p,
                None => browser.new_page("about:blank")
                    .await
                    .map_err(|e| BrowserError::AttachFailed(e.to_string()))?,
            }
        };

        Ok((browser, handler, page))
    }

    /// Get session ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check if the session is alive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    /// True when driving an external, operator-owned Chrome
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Configured timeout in seconds
    pub fn timeout_secs(&self) -> u64 {
        self.config.timeout_secs
    }

    /// Navigate to a URL.
    ///
    /// A page-load timeout is not fatal: the drop pages these bots watch are
    /// frequently slow or half-broken, and a partially loaded DOM is still
    /// scannable. Navigation errors from a dead connection are.
    pub async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let page = self.page.read().await;
        let page = page.as_ref().ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        debug!("Session {} navigating to: {}", self.id, url);
        match tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            page.goto(url),
        ).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::NavigationFailed(e.to_string())),
            Err(_) => {
                warn!("Session {} page load timeout for {}, continuing with partial DOM", self.id, url);
                let _ = page.evaluate("window.stop();").await;
                Ok(())
            }
        }
    }

    /// Reload the current page
    pub async fn reload(&self) -> Result<(), BrowserError> {
        use chromiumoxide::cdp::browser_protocol::page::ReloadParams;

        let page = self.page.read().await;
        let page = page.as_ref().ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        page.execute(ReloadParams::default())
            .await
            .map_err(|e| BrowserError::NavigationFailed(format!("reload: {}", e)))?;

        Ok(())
    }

    /// Get current URL
    pub async fn current_url(&self) -> Result<String, BrowserError> {
        let page = self.page.read().await;
        let page = page.as_ref().ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        page.url()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            .ok_or_else(|| BrowserError::ConnectionLost("No URL".into()))
    }

    /// Get current page title ("" when none)
    pub async fn title(&self) -> Result<String, BrowserError> {
        let page = self.page.read().await;
        let page = page.as_ref().ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        Ok(page.get_title()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            .unwrap_or_default())
    }

    /// Get the full page HTML, lowercased for indicator scanning
    pub async fn page_source_lower(&self) -> Result<String, BrowserError> {
        let page = self.page.read().await;
        let page = page.as_ref().ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        let html = page.content()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?;
        Ok(html.to_lowercase())
    }

    /// Number of open pages in the browser (new-tab detection after clicks)
    pub async fn page_count(&self) -> usize {
        let browser = self.browser.read().await;
        match browser.as_ref() {
            Some(b) => b.pages().await.map(|p| p.len()).unwrap_or(0),
            None => 0,
        }
    }

    /// Execute JavaScript on the page with the session's default timeout
    pub async fn execute_js(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        self.execute_js_with_timeout(script, self.config.timeout_secs).await
    }

    /// Execute JavaScript on the page with a custom timeout (in seconds)
    pub async fn execute_js_with_timeout(&self, script: &str, timeout_secs: u64) -> Result<serde_json::Value, BrowserError> {
        let page = self.page.read().await;
        let page = page.as_ref().ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        let result = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            page.evaluate(script.to_string()),
        )
        .await
        .map_err(|_| BrowserError::Timeout(format!("JavaScript execution timed out after {}s", timeout_secs)))?
        .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        Ok(result.into_value::<serde_json::Value>().unwrap_or(serde_json::Value::Null))
    }

    /// Native click at viewport coordinates via CDP mouse events
    pub async fn click_at(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        use chromiumoxide::cdp::browser_protocol::input::{
            DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
        };

        let page = self.page.read().await;
        let page = page.as_ref().ok_or(BrowserError::ConnectionLost("No active page".into()))?;

        let mouse_down = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .unwrap();
        page.execute(mouse_down).await
            .map_err(|e| BrowserError::JavaScriptError(format!("CDP mouseDown failed: {}", e)))?;

        // Real clicks hold for a few dozen milliseconds
        tokio::time::sleep(Duration::from_millis(60)).await;

        let mouse_up = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(x)
            .y(y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .unwrap();
        page.execute(mouse_up).await
            .map_err(|e| BrowserError::JavaScriptError(format!("CDP mouseUp failed: {}", e)))?;

        Ok(())
    }

    /// Close the browser session.
    ///
    /// Attached sessions only drop the CDP connection -- the operator's
    /// Chrome stays up. Launched sessions are closed and force-killed.
    pub async fn close(&self) -> Result<(), BrowserError> {
        self.alive.store(false, Ordering::Relaxed);

        {
            let mut page = self.page.write().await;
            if let Some(p) = page.take() {
                if !self.attached {
                    let _ = p.close().await;
                }
            }
        }

        {
            let mut browser = self.browser.write().await;
            if let Some(mut b) = browser.take() {
                if self.attached {
                    drop(b);
                } else {
                    let _ = b.close().await;
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    let _ = b.kill().await;
                }
            }
        }

        info!("Browser session {} closed", self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_config_scopes_data_dir() {
        let config = SessionConfig::for_task("abc123");
        let dir = config.user_data_dir.expect("data dir set");
        assert!(dir.contains("abc123"));
        assert!(dir.contains("ticket-rush"));
    }

    #[test]
    fn builder_chain_sets_fields() {
        let config = SessionConfig::default()
            .headless(true)
            .debugger_address(Some("127.0.0.1:9222".into()))
            .open_new_tab(true)
            .timeout(45);
        assert!(config.headless);
        assert!(config.open_new_tab);
        assert_eq!(config.timeout_secs, 45);
        assert_eq!(config.debugger_address.as_deref(), Some("127.0.0.1:9222"));
    }
}
