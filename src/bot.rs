//! Core bot logic shared between the CLI runner and the web panel.
//!
//! One bot = one browser session polling one event page: find the purchase
//! button by fuzzy label, click it through the fallback ladder, verify the
//! page advanced, then hand off to the site funnel until a human has to pay.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use chrono::Local;
use tracing::{info, warn};

use crate::browser::{BrowserSession, BrowserError, SessionConfig};
use crate::clicker::ClickExecutor;
use crate::finder::ElementFinder;
use crate::rate::{Pacing, backoff_with_jitter, random_delay};
use crate::sites::{self, Site, FunnelResult};
use crate::stats::TaskStats;
use crate::verify;

/// Maximum consecutive caught errors before a run is abandoned
const MAX_CONSECUTIVE_ERRORS: u32 = 25;

/// Ticket quantity bounds enforced everywhere a quantity enters the system
pub const MIN_QUANTITY: u32 = 1;
pub const MAX_QUANTITY: u32 = 6;

/// Clamp a requested ticket quantity into the allowed range
pub fn clamp_quantity(quantity: u32) -> u32 {
    quantity.clamp(MIN_QUANTITY, MAX_QUANTITY)
}

// ========== Configuration ==========

/// Configuration for a single bot run
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotConfig {
    /// Event page to poll
    pub url: String,
    /// Label of the purchase-initiating button ("Buy Tickets")
    pub button_text: String,
    /// Site override; auto-detected from the URL when unset
    pub site: Option<Site>,

    /// Walk the purchase funnel automatically after the click lands
    pub auto_buy: bool,
    /// Ticket category / package name for auto-buy
    pub ticket_category: Option<String>,
    /// Ticket quantity (1-6)
    pub ticket_quantity: u32,
    /// Block in the widget until a category is supplied (panel flow)
    pub await_selection: bool,

    /// Attach to a running Chrome instead of launching one
    pub debugger_address: Option<String>,
    /// Open a fresh tab after attaching
    pub open_new_tab: bool,
    /// User data directory for a launched Chrome
    pub user_data_dir: Option<String>,
    pub headless: bool,
    /// Close the browser when the run ends (launched sessions only)
    pub close_on_exit: bool,

    /// Fire plain clicks before the scroll/force-visible treatment
    pub aggressive_click: bool,
    /// Click order buttons even when the quantity could not be set
    pub aggressive_order: bool,
    /// Auto-buy hybrid mode: probe the DOM without refreshing every attempt
    pub skip_refresh: bool,
    /// Jump straight to a widget URL found in the page DOM
    pub auto_detect_widget: bool,

    /// Poll delay window
    pub pacing: Pacing,
    /// Poll attempt ceiling (0 = unlimited)
    pub max_attempts: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            button_text: String::new(),
            site: None,
            auto_buy: false,
            ticket_category: None,
            ticket_quantity: 1,
            await_selection: false,
            debugger_address: None,
            open_new_tab: false,
            user_data_dir: None,
            headless: false,
            close_on_exit: false,
            aggressive_click: false,
            aggressive_order: false,
            skip_refresh: false,
            auto_detect_widget: false,
            pacing: Pacing::default(),
            max_attempts: 500,
        }
    }
}

impl BotConfig {
    /// Check required fields before a run is accepted
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url is required".into());
        }
        if self.button_text.trim().is_empty() && !self.auto_detect_widget {
            return Err("button text is required unless widget auto-detect is on".into());
        }
        Ok(())
    }

    /// Normalize user-supplied fields (URL scheme, quantity bounds)
    pub fn normalized(mut self) -> Self {
        let url = self.url.trim().to_string();
        self.url = if url.is_empty() || url.starts_with("http") {
            url
        } else {
            format!("https://{}", url)
        };
        self.ticket_quantity = clamp_quantity(self.ticket_quantity);
        self.button_text = self.button_text.trim().to_string();
        self
    }

    /// Resolve the target site, falling back to Loket (the original target)
    pub fn resolved_site(&self) -> Site {
        self.site
            .or_else(|| Site::detect(&self.url))
            .unwrap_or(Site::Loket)
    }
}

// ========== Run control ==========

/// Auto-buy selection: which category and how many
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub category: String,
    pub quantity: u32,
}

/// Shared auto-buy state the panel pokes while the bot runs
#[derive(Default)]
pub struct AutoBuy {
    selection: parking_lot::RwLock<Option<Selection>>,
    paused: AtomicBool,
    running: AtomicBool,
    awaiting: AtomicBool,
    categories: parking_lot::RwLock<Vec<String>>,
    notify: tokio::sync::Notify,
}

impl AutoBuy {
    pub fn with_preset(selection: Option<Selection>) -> Self {
        let auto_buy = Self::default();
        *auto_buy.selection.write() = selection;
        auto_buy
    }

    /// Set the selection from the panel; wakes a bot waiting in the widget.
    /// Rejects empty categories, clamps quantity into 1-6.
    pub fn set_selection(&self, category: &str, quantity: u32) -> bool {
        let category = category.trim();
        if category.is_empty() {
            return false;
        }
        *self.selection.write() = Some(Selection {
            category: category.to_string(),
            quantity: clamp_quantity(quantity),
        });
        self.awaiting.store(false, Ordering::Relaxed);
        self.paused.store(false, Ordering::Relaxed);
        self.notify.notify_waiters();
        true
    }

    pub fn selection(&self) -> Option<Selection> {
        self.selection.read().clone()
    }

    pub fn pause(&self) -> bool {
        if !self.running.load(Ordering::Relaxed) {
            return false;
        }
        self.paused.store(true, Ordering::Relaxed);
        true
    }

    pub fn resume(&self) -> bool {
        if !self.running.load(Ordering::Relaxed) {
            return false;
        }
        self.paused.store(false, Ordering::Relaxed);
        self.notify.notify_waiters();
        true
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Relaxed);
        if !running {
            self.paused.store(false, Ordering::Relaxed);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_awaiting(&self, awaiting: bool) {
        self.awaiting.store(awaiting, Ordering::Relaxed);
    }

    pub fn is_awaiting_selection(&self) -> bool {
        self.awaiting.load(Ordering::Relaxed)
    }

    /// Publish the category list scraped from the widget for the panel
    pub fn publish_categories(&self, categories: Vec<String>) {
        if !categories.is_empty() {
            *self.categories.write() = categories;
        }
    }

    pub fn categories(&self) -> Vec<String> {
        self.categories.read().clone()
    }

    /// Wait until the selection changes or the timeout elapses
    pub async fn wait_for_selection(&self, timeout: std::time::Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }
}

/// Per-run control block: a polled stop flag plus the auto-buy channel.
/// Cancellation is cooperative -- the loops check the flag between steps.
#[derive(Default)]
pub struct RunControl {
    stop: AtomicBool,
    pub auto_buy: AutoBuy,
}

impl RunControl {
    pub fn new(auto_buy: AutoBuy) -> Self {
        Self { stop: AtomicBool::new(false), auto_buy }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.auto_buy.notify.notify_waiters();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

// ========== Task log ==========

/// Capped in-memory log ring per task, feeding the panel's log-tail view
pub struct TaskLog {
    lines: parking_lot::Mutex<VecDeque<String>>,
    cap: usize,
}

impl Default for TaskLog {
    fn default() -> Self {
        Self::with_capacity(500)
    }
}

impl TaskLog {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            lines: parking_lot::Mutex::new(VecDeque::with_capacity(cap.min(64))),
            cap,
        }
    }

    /// Append a timestamped line, evicting the oldest beyond capacity
    pub fn push(&self, message: impl AsRef<str>) {
        let line = format!("[{}] {}", Local::now().format("%H:%M:%S"), message.as_ref());
        let mut lines = self.lines.lock();
        if lines.len() >= self.cap {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Last `n` lines joined with newlines
    pub fn tail(&self, n: usize) -> String {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect::<Vec<_>>().join("\n")
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

// ========== Runtime ==========

/// Everything a funnel walker needs to drive the run
pub struct BotRuntime {
    pub session: BrowserSession,
    pub control: Arc<RunControl>,
    pub stats: Arc<TaskStats>,
    pub log: Arc<TaskLog>,
    pub finder: ElementFinder,
    pub clicker: ClickExecutor,
    pub site: Site,
    pub config: BotConfig,
}

impl BotRuntime {
    pub fn stop_requested(&self) -> bool {
        self.control.stop_requested()
    }

    /// Log a milestone to both tracing and the panel log
    pub fn note(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("Session {}: {}", self.session.id, message);
        self.log.push(message);
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Reached the point where a human must finish the purchase
    Handoff { url: String },
    /// Poll ceiling hit without a verified click
    AttemptsExhausted,
    /// Stop flag observed
    Stopped,
}

// ========== The run loop ==========

/// Run one bot to completion.
pub async fn run(
    config: BotConfig,
    control: Arc<RunControl>,
    stats: Arc<TaskStats>,
    log: Arc<TaskLog>,
) -> Result<RunOutcome, BrowserError> {
    let config = config.normalized();
    let site = config.resolved_site();

    // A config-level category is the initial selection unless one was set
    if config.auto_buy && control.auto_buy.selection().is_none() {
        if let Some(ref category) = config.ticket_category {
            control.auto_buy.set_selection(category, config.ticket_quantity);
        }
    }

    log.push(format!("starting: {} | target '{}' | site {}", config.url, config.button_text, site));

    let session_config = SessionConfig::default()
        .headless(config.headless)
        .debugger_address(config.debugger_address.clone())
        .open_new_tab(config.open_new_tab)
        .user_data_dir(config.user_data_dir.clone());

    let session = BrowserSession::new(session_config).await?;
    log.push(format!("browser ready ({})", session.id));

    let rt = BotRuntime {
        session,
        control,
        stats,
        log,
        finder: ElementFinder::new(),
        clicker: ClickExecutor::new(config.aggressive_click),
        site,
        config,
    };

    let outcome = run_inner(&rt).await;

    if rt.config.close_on_exit || (!rt.session.is_attached() && !matches!(outcome, Ok(RunOutcome::Handoff { .. }))) {
        // Keep the browser open on hand-off so the operator can pay
        let _ = rt.session.close().await;
    }

    match &outcome {
        Ok(RunOutcome::Handoff { url }) => rt.note(format!("hand-off: {}", url)),
        Ok(RunOutcome::AttemptsExhausted) => rt.note("attempt ceiling reached"),
        Ok(RunOutcome::Stopped) => rt.note("stopped"),
        Err(e) => rt.note(format!("failed: {}", e)),
    }

    outcome
}

async fn run_inner(rt: &BotRuntime) -> Result<RunOutcome, BrowserError> {
    rt.session.navigate(&rt.config.url).await?;
    random_delay(600, 1500).await;

    let mut initial_url = rt.session.current_url().await.unwrap_or_default();
    let mut attempts: u32 = 0;
    let mut consecutive_errors: u32 = 0;
    let mut last_count: Option<usize> = None;

    loop {
        if rt.stop_requested() {
            return Ok(RunOutcome::Stopped);
        }
        if rt.config.max_attempts > 0 && attempts >= rt.config.max_attempts {
            return Ok(RunOutcome::AttemptsExhausted);
        }
        attempts += 1;
        rt.stats.record_refresh();

        match poll_once(rt, &mut initial_url, &mut last_count).await {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => {
                consecutive_errors = 0;
            }
            Err(BrowserError::Stopped) => return Ok(RunOutcome::Stopped),
            Err(e) => {
                rt.stats.record_error();
                consecutive_errors += 1;
                warn!("Session {} poll error ({} consecutive): {}", rt.session.id, consecutive_errors, e);
                rt.log.push(format!("error: {}", e));

                if !rt.session.is_alive() {
                    return Err(BrowserError::ConnectionLost("browser went away".into()));
                }
                if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                    return Err(e);
                }

                tokio::time::sleep(backoff_with_jitter(consecutive_errors, 600, 30_000)).await;
                // Reconnect attempt: go back to the target page
                let _ = rt.session.navigate(&rt.config.url).await;
                random_delay(600, 1200).await;
            }
        }
    }
}

/// One poll cycle. `Ok(Some(_))` ends the run, `Ok(None)` keeps polling.
async fn poll_once(
    rt: &BotRuntime,
    initial_url: &mut String,
    last_count: &mut Option<usize>,
) -> Result<Option<RunOutcome>, BrowserError> {
    let current_url = rt.session.current_url().await?;

    // Already inside the purchase widget
    if rt.site.is_widget_url(&current_url) {
        return Ok(Some(enter_funnel(rt).await?));
    }

    // Fast path: a widget URL sitting in the DOM beats clicking through
    if rt.config.auto_detect_widget && rt.site == Site::Loket {
        if let Some(widget_url) = sites::loket::find_widget_url_fast(&rt.session).await? {
            rt.note(format!("widget URL found in DOM: {}", widget_url));
            rt.session.navigate(&widget_url).await?;
            random_delay(400, 900).await;
            let now = rt.session.current_url().await.unwrap_or_default();
            if rt.site.is_widget_url(&now) {
                return Ok(Some(enter_funnel(rt).await?));
            }
        }
    }

    // The page may have moved on its own (drop went live, queue let us in)
    if verify::url_advanced(initial_url, &current_url) {
        rt.note(format!("URL changed: {}", current_url));
        return Ok(Some(after_advance(rt).await?));
    }

    // Scan for the purchase button
    let label = rt.config.button_text.as_str();
    if !label.is_empty() {
        let scan = rt.finder.find_by_label(&rt.session, label).await?;
        let count = scan.candidates.len();
        if count > 0 && *last_count != Some(count) {
            rt.note(format!("found {} candidate button(s)", count));
            *last_count = Some(count);
        } else if count == 0 {
            *last_count = None;
        }

        for candidate in &scan.candidates {
            if rt.stop_requested() {
                return Err(BrowserError::Stopped);
            }
            let selector = scan.selector(candidate.index);
            let outcome = rt.clicker.click(&rt.session, rt.site, &selector).await?;
            if outcome.clicked {
                rt.stats.record_click();
                rt.finder.record_hit(&[label], candidate);
                let method = outcome
                    .method
                    .map(|m| format!("{:?}", m))
                    .unwrap_or_else(|| "unknown".into());
                rt.note(format!("click landed via {} on '{}'", method, candidate.text));
                return Ok(Some(after_advance(rt).await?));
            }
        }
    }

    // Nothing worked this cycle: refresh and go again
    random_delay(100, 1000).await;
    if rt.stop_requested() {
        return Err(BrowserError::Stopped);
    }
    rt.session.reload().await?;
    random_delay(400, 1000).await;

    let new_url = rt.session.current_url().await?;
    if verify::url_advanced(initial_url, &new_url) {
        rt.note(format!("URL changed after refresh: {}", new_url));
        return Ok(Some(after_advance(rt).await?));
    }
    *initial_url = new_url;

    Ok(None)
}

/// The page advanced (by click or on its own): clear the queue gate if one
/// appeared, then walk the funnel.
async fn after_advance(rt: &BotRuntime) -> Result<RunOutcome, BrowserError> {
    if rt.site == Site::Loket && sites::loket::is_queue_page(&rt.session).await? {
        rt.note("waiting-room gate detected");
        if sites::loket::handle_queue_gate(rt).await? {
            rt.note("queue joined");
        } else {
            rt.note("queue join unresolved, continuing");
        }
    }

    enter_funnel(rt).await
}

/// Dispatch to the site funnel; without auto-buy just watch the page settle
/// and hand off.
async fn enter_funnel(rt: &BotRuntime) -> Result<RunOutcome, BrowserError> {
    let result = match rt.site {
        Site::Loket => sites::loket::run(rt).await?,
        Site::Ticketmaster => sites::ticketmaster::run(rt).await?,
        Site::Tiket => sites::tiket::run(rt).await?,
    };

    match result {
        FunnelResult::Handoff { url } => Ok(RunOutcome::Handoff { url }),
        FunnelResult::Stopped => Ok(RunOutcome::Stopped),
        FunnelResult::Incomplete => {
            // Leave the page where it is; the operator takes over from here
            monitor_after_click(rt).await;
            let url = rt.session.current_url().await.unwrap_or_default();
            Ok(RunOutcome::Handoff { url })
        }
    }
}

/// Short settle loop after a verified click: wait for a redirect or checkout
/// markers before declaring the hand-off point.
pub async fn monitor_after_click(rt: &BotRuntime) {
    let initial_url = rt.session.current_url().await.unwrap_or_default();

    for _ in 0..6 {
        if rt.stop_requested() {
            return;
        }
        let current = rt.session.current_url().await.unwrap_or_default();
        if verify::url_advanced(&initial_url, &current) {
            break;
        }
        if let Ok(source) = rt.session.page_source_lower().await {
            let settled = rt.site.strong_indicators().iter().any(|i| source.contains(i));
            if settled {
                break;
            }
        }
        random_delay(500, 1200).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_clamps_into_range() {
        assert_eq!(clamp_quantity(0), 1);
        assert_eq!(clamp_quantity(1), 1);
        assert_eq!(clamp_quantity(6), 6);
        assert_eq!(clamp_quantity(9), 6);
    }

    #[test]
    fn config_validation() {
        let empty = BotConfig::default();
        assert!(empty.validate().is_err());

        let no_button = BotConfig {
            url: "https://loket.com/event/x".into(),
            ..Default::default()
        };
        assert!(no_button.validate().is_err());

        let widget_detect = BotConfig {
            url: "https://loket.com/event/x".into(),
            auto_detect_widget: true,
            ..Default::default()
        };
        assert!(widget_detect.validate().is_ok());

        let full = BotConfig {
            url: "https://loket.com/event/x".into(),
            button_text: "Buy Tickets".into(),
            ..Default::default()
        };
        assert!(full.validate().is_ok());
    }

    #[test]
    fn normalization_fixes_scheme_and_quantity() {
        let config = BotConfig {
            url: "loket.com/event/x".into(),
            button_text: "  Buy  ".into(),
            ticket_quantity: 12,
            ..Default::default()
        }
        .normalized();

        assert_eq!(config.url, "https://loket.com/event/x");
        assert_eq!(config.button_text, "Buy");
        assert_eq!(config.ticket_quantity, 6);
    }

    #[test]
    fn site_resolution_prefers_override() {
        let config = BotConfig {
            url: "https://loket.com/event/x".into(),
            site: Some(Site::Tiket),
            ..Default::default()
        };
        assert_eq!(config.resolved_site(), Site::Tiket);

        let detected = BotConfig {
            url: "https://www.ticketmaster.sg/x".into(),
            ..Default::default()
        };
        assert_eq!(detected.resolved_site(), Site::Ticketmaster);

        let unknown = BotConfig {
            url: "https://example.com/x".into(),
            ..Default::default()
        };
        assert_eq!(unknown.resolved_site(), Site::Loket);
    }

    #[test]
    fn selection_rules() {
        let auto_buy = AutoBuy::default();
        assert!(!auto_buy.set_selection("  ", 2));
        assert!(auto_buy.selection().is_none());

        assert!(auto_buy.set_selection("VIP", 9));
        let sel = auto_buy.selection().unwrap();
        assert_eq!(sel.category, "VIP");
        assert_eq!(sel.quantity, 6);
        assert!(!auto_buy.is_awaiting_selection());
    }

    #[test]
    fn pause_requires_running_funnel() {
        let auto_buy = AutoBuy::default();
        assert!(!auto_buy.pause());

        auto_buy.set_running(true);
        assert!(auto_buy.pause());
        assert!(auto_buy.is_paused());
        assert!(auto_buy.resume());
        assert!(!auto_buy.is_paused());

        auto_buy.set_running(false);
        assert!(!auto_buy.is_paused());
    }

    #[test]
    fn task_log_ring_caps_and_tails() {
        let log = TaskLog::with_capacity(3);
        for i in 0..5 {
            log.push(format!("line {}", i));
        }
        assert_eq!(log.len(), 3);
        let tail = log.tail(2);
        assert!(tail.contains("line 3"));
        assert!(tail.contains("line 4"));
        assert!(!tail.contains("line 2"));
    }

    #[test]
    fn stop_flag_round_trip() {
        let control = RunControl::default();
        assert!(!control.stop_requested());
        control.request_stop();
        assert!(control.stop_requested());
    }
}
