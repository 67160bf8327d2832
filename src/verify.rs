//! Click-success verification
//!
//! The sites expose no structured signal for "your click worked", so success
//! is inferred from page-state diffs: URL base changes, title changes, the
//! appearance of site-specific indicator strings, a checkout widget iframe,
//! or a new tab. A hash-only or query-only URL change does not count.

use tracing::debug;

use crate::browser::{BrowserSession, BrowserError};
use crate::sites::Site;

/// Page state captured before a click
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub page_count: usize,
}

impl PageSnapshot {
    /// Capture the current page state
    pub async fn take(session: &BrowserSession) -> Result<Self, BrowserError> {
        let url = session.current_url().await.unwrap_or_default();
        let title = session.title().await.unwrap_or_default();
        let page_count = session.page_count().await;
        Ok(Self { url, title, page_count })
    }
}

/// Strip fragment, query and trailing slash so hash-only navigation does not
/// read as progress.
pub fn url_base(url: &str) -> String {
    let trimmed = url.trim();
    if let Ok(mut parsed) = url::Url::parse(trimmed) {
        parsed.set_fragment(None);
        parsed.set_query(None);
        return parsed.to_string().trim_end_matches('/').to_string();
    }
    // not an absolute URL, strip by hand
    let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);
    without_query.trim_end_matches('/').to_string()
}

/// True when two URLs differ beyond fragment/query noise
pub fn url_advanced(before: &str, after: &str) -> bool {
    if after.trim().is_empty() {
        return false;
    }
    url_base(before) != url_base(after)
}

/// Decide whether a click advanced the purchase flow.
///
/// Checked in order of reliability: URL base, title, strong page indicators,
/// widget iframe, then tab count.
pub async fn click_advanced(
    session: &BrowserSession,
    site: Site,
    before: &PageSnapshot,
) -> Result<bool, BrowserError> {
    let url_after = session.current_url().await.unwrap_or_default();
    if url_advanced(&before.url, &url_after) {
        debug!("Session {} click verified: URL {} -> {}", session.id, before.url, url_after);
        return Ok(true);
    }

    let title_after = session.title().await.unwrap_or_default();
    if !title_after.trim().is_empty() && title_after != before.title {
        debug!("Session {} click verified: title changed", session.id);
        return Ok(true);
    }

    let source = session.page_source_lower().await.unwrap_or_default();
    for indicator in site.strong_indicators() {
        if source.contains(indicator) {
            debug!("Session {} click verified: indicator '{}'", session.id, indicator);
            return Ok(true);
        }
    }

    if !site.widget_hosts().is_empty() && widget_iframe_present(session, site).await? {
        debug!("Session {} click verified: widget iframe present", session.id);
        return Ok(true);
    }

    let pages_after = session.page_count().await;
    if pages_after != before.page_count && pages_after > 0 {
        debug!("Session {} click verified: tab count {} -> {}", session.id, before.page_count, pages_after);
        return Ok(true);
    }

    Ok(false)
}

/// Scan iframes for the site's checkout widget host
pub async fn widget_iframe_present(session: &BrowserSession, site: Site) -> Result<bool, BrowserError> {
    let hosts = site.widget_hosts();
    if hosts.is_empty() {
        return Ok(false);
    }

    let hosts_json = serde_json::to_string(hosts).unwrap_or_else(|_| "[]".into());
    let script = format!(r#"
        (function() {{
            const hosts = {hosts_json};
            const frames = document.querySelectorAll('iframe');
            for (const frame of frames) {{
                const src = (frame.getAttribute('src') || '').toLowerCase();
                if (hosts.some(h => src.includes(h))) return true;
            }}
            return false;
        }})()
    "#);

    let result = session.execute_js_with_timeout(&script, 5).await?;
    Ok(result.as_bool().unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_base_strips_noise() {
        assert_eq!(url_base("https://a.com/x/?q=1#frag"), "https://a.com/x");
        assert_eq!(url_base("https://a.com/x/"), "https://a.com/x");
        assert_eq!(url_base("https://a.com/x"), "https://a.com/x");
    }

    #[test]
    fn hash_only_change_is_not_progress() {
        assert!(!url_advanced("https://a.com/event", "https://a.com/event#tickets"));
        assert!(!url_advanced("https://a.com/event", "https://a.com/event?utm=x"));
        assert!(!url_advanced("https://a.com/event", ""));
    }

    #[test]
    fn real_navigation_is_progress() {
        assert!(url_advanced("https://a.com/event", "https://widget.loket.com/widget/x"));
        assert!(url_advanced("https://a.com/event", "https://a.com/event/queue"));
    }
}
