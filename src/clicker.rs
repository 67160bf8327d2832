//! Click execution with fallback strategies
//!
//! A matched element is clicked through up to three techniques in sequence:
//! script click, native CDP click at the element center, then synthesized
//! mouse events. After each attempt the success verifier decides whether the
//! page actually advanced; the first verified attempt wins. Elements are
//! scrolled into view and force-made visible first, since drop pages love
//! hidden and overlapped buttons.

use tracing::{debug, warn};

use crate::browser::{BrowserSession, BrowserError};
use crate::rate::random_delay;
use crate::sites::Site;
use crate::verify::{self, PageSnapshot};

/// Which technique landed the click
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickMethod {
    Script,
    Cdp,
    SyntheticEvents,
}

/// Result of a click attempt
#[derive(Debug, Clone)]
pub struct ClickOutcome {
    pub clicked: bool,
    pub method: Option<ClickMethod>,
}

impl ClickOutcome {
    fn missed() -> Self {
        Self { clicked: false, method: None }
    }

    fn landed(method: ClickMethod) -> Self {
        Self { clicked: true, method: Some(method) }
    }
}

/// Click executor parameterized over a site's verification tables
pub struct ClickExecutor {
    /// Fire plain clicks before the scroll/force-visible treatment
    pub aggressive: bool,
}

impl Default for ClickExecutor {
    fn default() -> Self {
        Self { aggressive: false }
    }
}

impl ClickExecutor {
    pub fn new(aggressive: bool) -> Self {
        Self { aggressive }
    }

    /// Click the element addressed by `selector` (a finder-tagged element),
    /// verifying page advancement after every strategy.
    pub async fn click(
        &self,
        session: &BrowserSession,
        site: Site,
        selector: &str,
    ) -> Result<ClickOutcome, BrowserError> {
        let before = PageSnapshot::take(session).await?;
        let selector_json = serde_json::to_string(selector)
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        if self.aggressive {
            // No scroll, no settling delay - fire immediately, twice
            for _ in 0..2 {
                if self.script_click(session, &selector_json).await.unwrap_or(false) {
                    random_delay(600, 1600).await;
                    if verify::click_advanced(session, site, &before).await? {
                        return Ok(ClickOutcome::landed(ClickMethod::Script));
                    }
                }
            }
        }

        self.prepare_element(session, &selector_json).await;

        // Strategy 1: script click - most reliable for hidden/styled buttons
        if self.script_click(session, &selector_json).await.unwrap_or(false) {
            random_delay(600, 1600).await;
            if verify::click_advanced(session, site, &before).await? {
                return Ok(ClickOutcome::landed(ClickMethod::Script));
            }
        }

        // Strategy 2: native CDP click at the element center
        match self.element_center(session, &selector_json).await {
            Ok(Some((x, y))) => {
                if session.click_at(x, y).await.is_ok() {
                    random_delay(600, 1600).await;
                    if verify::click_advanced(session, site, &before).await? {
                        return Ok(ClickOutcome::landed(ClickMethod::Cdp));
                    }
                }
            }
            Ok(None) => debug!("Session {} element {} has no box for CDP click", session.id, selector),
            Err(e) => warn!("Session {} center lookup failed: {}", session.id, e),
        }

        // Strategy 3: synthesized mousedown/mouseup/click events
        if self.dispatch_mouse_events(session, &selector_json).await.unwrap_or(false) {
            random_delay(600, 1600).await;
            if verify::click_advanced(session, site, &before).await? {
                return Ok(ClickOutcome::landed(ClickMethod::SyntheticEvents));
            }
        }

        Ok(ClickOutcome::missed())
    }

    /// Fire a click without verifying page advancement: first technique that
    /// dispatches wins. For steps whose effect is polled explicitly
    /// afterwards (order buttons, package cards).
    pub async fn fire(
        &self,
        session: &BrowserSession,
        selector: &str,
    ) -> Result<bool, BrowserError> {
        let selector_json = serde_json::to_string(selector)
            .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

        self.prepare_element(session, &selector_json).await;

        if self.script_click(session, &selector_json).await.unwrap_or(false) {
            return Ok(true);
        }
        if let Ok(Some((x, y))) = self.element_center(session, &selector_json).await {
            if session.click_at(x, y).await.is_ok() {
                return Ok(true);
            }
        }
        self.dispatch_mouse_events(session, &selector_json).await
    }

    /// Scroll into view and strip the usual hiding styles
    async fn prepare_element(&self, session: &BrowserSession, selector_json: &str) {
        let script = format!(r#"
            (function() {{
                const el = document.querySelector({selector_json});
                if (!el) return false;
                el.scrollIntoView({{ behavior: 'smooth', block: 'center' }});
                el.style.display = 'block';
                el.style.visibility = 'visible';
                el.style.opacity = '1';
                el.style.pointerEvents = 'auto';
                return true;
            }})()
        "#);
        let _ = session.execute_js_with_timeout(&script, 5).await;
        random_delay(200, 500).await;
    }

    async fn script_click(&self, session: &BrowserSession, selector_json: &str) -> Result<bool, BrowserError> {
        let script = format!(r#"
            (function() {{
                const el = document.querySelector({selector_json});
                if (!el) return false;
                el.click();
                return true;
            }})()
        "#);
        Ok(session.execute_js_with_timeout(&script, 5).await?.as_bool().unwrap_or(false))
    }

    async fn element_center(
        &self,
        session: &BrowserSession,
        selector_json: &str,
    ) -> Result<Option<(f64, f64)>, BrowserError> {
        let script = format!(r#"
            (function() {{
                const el = document.querySelector({selector_json});
                if (!el) return null;
                const rect = el.getBoundingClientRect();
                if (rect.width === 0 && rect.height === 0) return null;
                return {{ x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 }};
            }})()
        "#);
        let value = session.execute_js_with_timeout(&script, 5).await?;
        let x = value.get("x").and_then(|v| v.as_f64());
        let y = value.get("y").and_then(|v| v.as_f64());
        Ok(match (x, y) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        })
    }

    async fn dispatch_mouse_events(&self, session: &BrowserSession, selector_json: &str) -> Result<bool, BrowserError> {
        let script = format!(r#"
            (function() {{
                const el = document.querySelector({selector_json});
                if (!el) return false;
                for (const eventType of ['mousedown', 'mouseup', 'click']) {{
                    el.dispatchEvent(new MouseEvent(eventType, {{
                        view: window,
                        bubbles: true,
                        cancelable: true,
                        buttons: 1
                    }}));
                }}
                return true;
            }})()
        "#);
        Ok(session.execute_js_with_timeout(&script, 5).await?.as_bool().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_constructors() {
        let miss = ClickOutcome::missed();
        assert!(!miss.clicked);
        assert!(miss.method.is_none());

        let hit = ClickOutcome::landed(ClickMethod::Cdp);
        assert!(hit.clicked);
        assert_eq!(hit.method, Some(ClickMethod::Cdp));
    }
}
