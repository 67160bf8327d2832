//! Fuzzy element discovery
//!
//! Given a human-readable label ("Buy Tickets"), scan the live DOM for
//! clickable-looking elements whose text or attributes plausibly match, and
//! tag each hit so the click executor can address it without re-matching.
//! The DOM changes under us constantly, so every scan is fresh; a small
//! cache only remembers which candidate worked last so it is retried first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use serde::Deserialize;
use tracing::debug;

use crate::browser::{BrowserSession, BrowserError};

/// Attribute names stamped onto matched elements. The click executor builds
/// selectors from these, so a scan and its clicks share one generation.
pub const GEN_ATTR: &str = "data-tr-gen";
pub const HIT_ATTR: &str = "data-tr-hit";

/// Actionability classification of a matched element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Enabled,
    Disabled,
    Hidden,
    OutOfView,
    Unknown,
}

/// One matched element
#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    pub index: usize,
    pub tag: String,
    #[serde(default)]
    pub text: String,
    pub status: CandidateStatus,
}

impl Candidate {
    /// Stable-ish identity used by the retry cache
    pub fn signature(&self) -> String {
        format!("{}|{}", self.tag, self.text.to_lowercase())
    }
}

/// Result of one DOM scan
#[derive(Debug, Clone)]
pub struct Scan {
    pub generation: u64,
    pub candidates: Vec<Candidate>,
}

impl Scan {
    /// CSS selector addressing candidate `index` from this scan
    pub fn selector(&self, index: usize) -> String {
        format!("[{}=\"{}\"][{}=\"{}\"]", GEN_ATTR, self.generation, HIT_ATTR, index)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Pure matching rule shared with the in-page script: case-insensitive
/// substring either direction on visible text, one-directional on value /
/// aria-label / title.
pub fn label_matches(needle: &str, text: &str, value: &str, aria_label: &str, title: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return false;
    }
    let text = text.trim().to_lowercase();
    if !text.is_empty() && (text.contains(&needle) || needle.contains(&text)) {
        return true;
    }
    if !value.is_empty() && value.to_lowercase().contains(&needle) {
        return true;
    }
    aria_label.to_lowercase().contains(&needle) || title.to_lowercase().contains(&needle)
}

/// Fuzzy element finder with a last-hit cache
pub struct ElementFinder {
    generation: AtomicU64,
    /// label-set key -> signature of the candidate that last clicked through
    last_hit: moka::sync::Cache<String, String>,
}

impl Default for ElementFinder {
    fn default() -> Self {
        Self::new()
    }
}

impl ElementFinder {
    pub fn new() -> Self {
        Self {
            generation: AtomicU64::new(1),
            last_hit: moka::sync::Cache::builder()
                .max_capacity(64)
                .time_to_live(Duration::from_secs(60))
                .build(),
        }
    }

    fn cache_key(labels: &[&str]) -> String {
        labels
            .iter()
            .map(|l| l.trim().to_lowercase())
            .collect::<Vec<_>>()
            .join("\u{1f}")
    }

    /// Remember which candidate actually advanced the page for these labels
    pub fn record_hit(&self, labels: &[&str], candidate: &Candidate) {
        self.last_hit.insert(Self::cache_key(labels), candidate.signature());
    }

    /// Fresh generation number for scans that tag elements outside this
    /// finder (category sections, package buttons).
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Scan the DOM for elements matching a single label
    pub async fn find_by_label(
        &self,
        session: &BrowserSession,
        label: &str,
    ) -> Result<Scan, BrowserError> {
        self.find_by_labels(session, &[label]).await
    }

    /// Scan the DOM for elements matching any of the labels.
    ///
    /// Candidates that match the cached last-successful signature are moved
    /// to the front so the known-good element is retried first.
    pub async fn find_by_labels(
        &self,
        session: &BrowserSession,
        labels: &[&str],
    ) -> Result<Scan, BrowserError> {
        let needles: Vec<String> = labels
            .iter()
            .map(|l| l.trim().to_lowercase())
            .filter(|l| !l.is_empty())
            .collect();
        if needles.is_empty() {
            return Err(BrowserError::ElementNotFound("empty label".into()));
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let needles_json = serde_json::to_string(&needles)
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        let script = format!(r#"
            (function() {{
                const needles = {needles_json};
                const hits = [];
                const candidates = document.querySelectorAll(
                    "button, a, [role='button'], [onclick], input[type='button'], input[type='submit']"
                );
                for (const el of candidates) {{
                    const text = (el.innerText || el.textContent || '').trim().toLowerCase();
                    const value = (el.getAttribute('value') || '').toLowerCase();
                    const aria = (el.getAttribute('aria-label') || '').toLowerCase();
                    const title = (el.getAttribute('title') || '').toLowerCase();

                    let matched = false;
                    for (const needle of needles) {{
                        if (text && (text.includes(needle) || needle.includes(text))) {{ matched = true; break; }}
                        if (value && value.includes(needle)) {{ matched = true; break; }}
                        if (aria.includes(needle) || title.includes(needle)) {{ matched = true; break; }}
                    }}
                    if (!matched) continue;

                    let status = 'enabled';
                    const classes = (el.getAttribute('class') || '').toLowerCase();
                    const style = (el.getAttribute('style') || '').toLowerCase();
                    if (el.getAttribute('disabled') !== null) {{
                        status = 'disabled';
                    }} else if (classes.includes('disabled') || classes.includes('inactive')) {{
                        status = 'disabled';
                    }} else if (style.includes('pointer-events: none') || style.includes('opacity: 0.5')) {{
                        status = 'disabled';
                    }} else if (el.offsetParent === null) {{
                        status = 'hidden';
                    }} else {{
                        const rect = el.getBoundingClientRect();
                        const inView = rect.top >= 0 && rect.left >= 0 &&
                            rect.bottom <= (window.innerHeight || document.documentElement.clientHeight) &&
                            rect.right <= (window.innerWidth || document.documentElement.clientWidth);
                        if (!inView) status = 'out_of_view';
                    }}

                    const idx = hits.length;
                    el.setAttribute('{GEN_ATTR}', '{generation}');
                    el.setAttribute('{HIT_ATTR}', String(idx));
                    hits.push({{
                        index: idx,
                        tag: el.tagName.toLowerCase(),
                        text: (el.innerText || el.textContent || '').trim().slice(0, 120),
                        status: status
                    }});
                }}
                return hits;
            }})()
        "#);

        let result = session.execute_js_with_timeout(&script, 10).await?;
        let mut candidates: Vec<Candidate> = serde_json::from_value(result).unwrap_or_default();

        // Known-good element first; indices still address the tagged DOM
        // nodes, only the try-order moves
        if let Some(cached) = self.last_hit.get(&Self::cache_key(labels)) {
            candidates.sort_by_key(|c| if c.signature() == cached { 0 } else { 1 });
            debug!("Session {} finder cache hit for {:?}", session.id, labels);
        }

        Ok(Scan { generation, candidates })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_substring_both_directions() {
        // button label contains the needle
        assert!(label_matches("buy", "Buy Tickets Now", "", "", ""));
        // needle contains the (short) button label
        assert!(label_matches("buy tickets", "Buy", "", "", ""));
    }

    #[test]
    fn matches_attributes_one_direction() {
        assert!(label_matches("order now", "", "Order Now", "", ""));
        assert!(label_matches("order", "", "", "Order tickets here", ""));
        assert!(label_matches("order", "", "", "", "Order page"));
        // attribute matching is needle-in-attribute only
        assert!(!label_matches("order tickets today", "", "order", "", ""));
    }

    #[test]
    fn empty_needle_and_empty_element_never_match() {
        assert!(!label_matches("", "Buy", "", "", ""));
        assert!(!label_matches("   ", "Buy", "", "", ""));
        assert!(!label_matches("buy", "", "", "", ""));
    }

    #[test]
    fn case_is_ignored() {
        assert!(label_matches("PESAN SEKARANG", "pesan sekarang", "", "", ""));
        assert!(label_matches("pesan", "PESAN SEKARANG", "", "", ""));
    }

    #[test]
    fn scan_selector_addresses_tagged_element() {
        let scan = Scan { generation: 7, candidates: vec![] };
        assert_eq!(scan.selector(3), "[data-tr-gen=\"7\"][data-tr-hit=\"3\"]");
    }

    #[test]
    fn candidate_status_parses_snake_case() {
        let c: Candidate = serde_json::from_value(serde_json::json!({
            "index": 0, "tag": "button", "text": "Buy", "status": "out_of_view"
        })).unwrap();
        assert_eq!(c.status, CandidateStatus::OutOfView);
    }

    #[test]
    fn record_hit_round_trips() {
        let finder = ElementFinder::new();
        let c = Candidate {
            index: 2,
            tag: "button".into(),
            text: "Buy Tickets".into(),
            status: CandidateStatus::Enabled,
        };
        finder.record_hit(&["buy tickets"], &c);
        let key = ElementFinder::cache_key(&["buy tickets"]);
        assert_eq!(finder.last_hit.get(&key), Some(c.signature()));
    }
}
