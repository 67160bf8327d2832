//! Per-site purchase funnels
//!
//! Each supported ticketing site gets one funnel walker built on the shared
//! finder / clicker / verifier. The `Site` enum carries the per-site keyword
//! tables the shared heuristics are parameterized with.

pub mod loket;
pub mod ticketmaster;
pub mod tiket;

use std::collections::HashSet;
use once_cell::sync::Lazy;

/// Order-button text ladder shared by every funnel, most specific first
pub static ORDER_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| vec![
    "pesan sekarang",
    "order now",
    "buy now",
    "checkout",
    "pesan",
    "order",
    "beli",
    "buy",
    "booking",
    "purchase",
    "get ticket",
]);

/// Waiting-room / queue gate markers (URL tokens and page text)
pub static QUEUE_URL_TOKENS: Lazy<Vec<&'static str>> = Lazy::new(|| vec![
    "waiting", "queue", "antrean", "join-queue", "join_queue",
]);

pub static QUEUE_TEXT_TOKENS: Lazy<Vec<&'static str>> = Lazy::new(|| vec![
    "waiting room",
    "join the queue",
    "join queue",
    "masuk antrean",
    "antrean tiket",
    "please click the button below to initiate",
    "ticket purchase queueing process",
]);

/// Strings that mark a button label as navigation/noise, not a purchase action
pub static IGNORE_KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "detail", "info", "terms", "syarat", "faq", "lihat", "history",
        "riwayat", "help", "bantuan", "login", "masuk", "daftar", "register",
    ]
    .into_iter()
    .collect()
});

/// Sold-out markers in card/package text
pub static UNAVAILABLE_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| vec![
    "sold out", "habis", "penuh", "tidak tersedia", "unavailable", "not available",
]);

/// Class tokens that mean a control is disabled even without the attribute
pub static CLASS_DISABLED_TOKENS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "disabled",
        "is-disabled",
        "btn-disabled",
        "btn--disabled",
        "button-disabled",
        "disabled-state",
    ]
    .into_iter()
    .collect()
});

/// A supported ticketing site
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Site {
    Loket,
    Ticketmaster,
    Tiket,
}

impl Site {
    /// Guess the site from a target URL
    pub fn detect(url: &str) -> Option<Site> {
        let url = url.to_lowercase();
        if url.contains("loket.com") {
            Some(Site::Loket)
        } else if url.contains("ticketmaster.") {
            Some(Site::Ticketmaster)
        } else if url.contains("tiket.com") {
            Some(Site::Tiket)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Site::Loket => "loket",
            Site::Ticketmaster => "ticketmaster",
            Site::Tiket => "tiket",
        }
    }

    /// Checkout-widget host fragments; a URL containing one means the
    /// purchase funnel has been reached.
    pub fn widget_hosts(&self) -> &'static [&'static str] {
        match self {
            Site::Loket => &["widget.loket.com/widget", "loket.com/widget"],
            Site::Ticketmaster => &[],
            Site::Tiket => &[],
        }
    }

    /// Page-source substrings that count as hard evidence a click advanced
    /// the flow. Tuned per site against their live markup; no guarantees.
    pub fn strong_indicators(&self) -> &'static [&'static str] {
        match self {
            Site::Loket => &[
                "widget.loket.com/widget/",
                "loket.com/widget/",
                "checkout",
                "select category",
                "personal information",
                "confirmation",
            ],
            Site::Ticketmaster => &["checkout", "order summary", "cart"],
            Site::Tiket => &["checkout", "pilih jumlah", "jumlah tiket"],
        }
    }

    /// URL tokens marking the terminal checkout hand-off point
    pub fn checkout_url_tokens(&self) -> &'static [&'static str] {
        match self {
            Site::Loket => &["/register"],
            Site::Ticketmaster => &["checkout", "booking", "order", "payment"],
            Site::Tiket => &["checkout", "booking", "order", "payment"],
        }
    }

    /// True if the URL is inside the site's purchase widget/funnel
    pub fn is_widget_url(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.widget_hosts().iter().any(|h| url.contains(h))
    }

    /// True if the URL is at the checkout hand-off point
    pub fn is_checkout_url(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        match self {
            // Loket only counts the real /register path, not query noise
            Site::Loket => {
                let base = crate::verify::url_base(&lower);
                base.ends_with("/register")
            }
            _ => self.checkout_url_tokens().iter().any(|t| lower.contains(t)),
        }
    }
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Terminal state of a funnel walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FunnelResult {
    /// The flow reached the point where a human must take over for payment
    Handoff { url: String },
    /// The funnel gave up (attempt ceiling, missing controls)
    Incomplete,
    /// Stop was requested mid-walk
    Stopped,
}

/// Interstitial challenge markers (Cloudflare and friends)
const CHALLENGE_TOKENS: [&str; 6] = [
    "checking your browser",
    "cf-browser-verification",
    "cf-chl",
    "challenge-platform",
    "ddos protection",
    "ray id",
];

/// True when the page is an anti-bot interstitial rather than site content
pub async fn challenge_present(
    session: &crate::browser::BrowserSession,
) -> Result<bool, crate::browser::BrowserError> {
    let title = session.title().await.unwrap_or_default().to_lowercase();
    if title.contains("just a moment") {
        return Ok(true);
    }
    let source = session.page_source_lower().await?;
    if CHALLENGE_TOKENS.iter().any(|t| source.contains(t)) {
        return Ok(true);
    }
    Ok(source.contains("cloudflare") && source.contains("challenge"))
}

/// Poll until the challenge clears or the timeout passes. These bots cannot
/// solve a challenge; they can only wait it out (or let the operator do it
/// in an attached browser).
pub async fn wait_for_challenge(
    rt: &crate::bot::BotRuntime,
    timeout_secs: u64,
) -> Result<bool, crate::browser::BrowserError> {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(timeout_secs);

    while std::time::Instant::now() < deadline {
        if rt.stop_requested() {
            return Ok(false);
        }
        if !challenge_present(&rt.session).await? {
            // settle, then confirm it is really gone
            crate::rate::random_delay(1000, 2000).await;
            if !challenge_present(&rt.session).await? {
                return Ok(true);
            }
        }
        crate::rate::random_delay(500, 1000).await;
    }

    tracing::warn!("Session {} challenge did not clear within {}s", rt.session.id, timeout_secs);
    Ok(false)
}

/// Label text looks like a price rather than a category/package name
pub fn looks_like_price(text: &str) -> bool {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return true;
    }
    if text.contains("rp") || text.contains("idr") {
        return true;
    }
    text.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',' || c.is_whitespace())
}

/// First integer embedded in a string, if any
pub fn extract_first_int(text: &str) -> Option<u32> {
    let mut digits = String::new();
    for c in text.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !digits.is_empty() {
            break;
        }
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sites_from_urls() {
        assert_eq!(Site::detect("https://www.loket.com/event/some-concert"), Some(Site::Loket));
        assert_eq!(Site::detect("https://widget.loket.com/widget/abc"), Some(Site::Loket));
        assert_eq!(Site::detect("https://www.ticketmaster.sg/activity/detail"), Some(Site::Ticketmaster));
        assert_eq!(Site::detect("https://www.tiket.com/to-do/event"), Some(Site::Tiket));
        assert_eq!(Site::detect("https://example.com/tickets"), None);
    }

    #[test]
    fn loket_widget_urls() {
        let site = Site::Loket;
        assert!(site.is_widget_url("https://widget.loket.com/widget/xyz123"));
        assert!(site.is_widget_url("HTTPS://LOKET.COM/WIDGET/xyz"));
        assert!(!site.is_widget_url("https://www.loket.com/event/xyz"));
    }

    #[test]
    fn loket_checkout_is_register_path_only() {
        let site = Site::Loket;
        assert!(site.is_checkout_url("https://widget.loket.com/widget/xyz/register"));
        assert!(site.is_checkout_url("https://widget.loket.com/widget/xyz/register?step=1#top"));
        assert!(!site.is_checkout_url("https://widget.loket.com/widget/xyz?from=register"));
    }

    #[test]
    fn ticketmaster_checkout_by_token() {
        let site = Site::Ticketmaster;
        assert!(site.is_checkout_url("https://www.ticketmaster.sg/checkout/123"));
        assert!(site.is_checkout_url("https://www.ticketmaster.sg/order/summary"));
        assert!(!site.is_checkout_url("https://www.ticketmaster.sg/activity/detail"));
    }

    #[test]
    fn price_like_labels_are_rejected() {
        assert!(looks_like_price("Rp 1.500.000"));
        assert!(looks_like_price("250,000"));
        assert!(looks_like_price("  "));
        assert!(!looks_like_price("VIP Package"));
        assert!(!looks_like_price("CAT 1 - Gold"));
    }

    #[test]
    fn first_int_extraction() {
        assert_eq!(extract_first_int("2 tickets"), Some(2));
        assert_eq!(extract_first_int("qty-4-max"), Some(4));
        assert_eq!(extract_first_int("none"), None);
        assert_eq!(extract_first_int("12abc34"), Some(12));
    }
}
