//! Ticketmaster purchase funnel
//!
//! Shorter than the Loket walk: after the event button click lands, set the
//! quantity on whatever control the page offers and push through the
//! checkout keyword ladder until the URL says checkout. Ticketmaster fronts
//! its drops with "Just a moment" / captcha gates that only a human can
//! clear, so those bail out to manual.

use tracing::debug;

use crate::browser::{BrowserSession, BrowserError};
use crate::bot::BotRuntime;
use crate::rate::random_delay;
use crate::sites::{FunnelResult, Site};

/// Checkout push attempts before giving the page back to the operator
const MAX_CHECKOUT_ATTEMPTS: u32 = 20;

/// Checkout/next-step button ladder
const CHECKOUT_KEYWORDS: [&str; 9] = [
    "lanjut", "continue", "checkout", "pesan", "beli", "book", "order", "next", "proceed",
];

/// Walk the Ticketmaster funnel to the payment hand-off.
pub async fn run(rt: &BotRuntime) -> Result<FunnelResult, BrowserError> {
    if !rt.config.auto_buy {
        return Ok(FunnelResult::Incomplete);
    }

    let quantity = rt
        .control
        .auto_buy
        .selection()
        .map(|s| s.quantity)
        .unwrap_or(rt.config.ticket_quantity);

    for _ in 0..MAX_CHECKOUT_ATTEMPTS {
        if rt.stop_requested() {
            return Ok(FunnelResult::Stopped);
        }

        if page_needs_attention(&rt.session).await? {
            rt.note("verification gate detected, manual intervention needed");
            return Ok(FunnelResult::Incomplete);
        }

        let url = rt.session.current_url().await.unwrap_or_default();
        if Site::Ticketmaster.is_checkout_url(&url) {
            rt.note("checkout reached, complete the purchase manually");
            return Ok(FunnelResult::Handoff { url });
        }

        rt.stats.record_funnel_attempt();
        set_quantity(&rt.session, quantity).await?;

        if click_checkout(rt).await? {
            random_delay(1000, 2000).await;
            let url = rt.session.current_url().await.unwrap_or_default();
            rt.note("checkout clicked, complete the purchase manually");
            return Ok(FunnelResult::Handoff { url });
        }

        random_delay(800, 1500).await;
    }

    Ok(FunnelResult::Incomplete)
}

/// "Just a moment" / captcha / verify-human gates
pub async fn page_needs_attention(session: &BrowserSession) -> Result<bool, BrowserError> {
    let title = session.title().await.unwrap_or_default().to_lowercase();
    if title.contains("just a moment") {
        return Ok(true);
    }
    let source = session.page_source_lower().await?;
    if source.contains("captcha") {
        return Ok(true);
    }
    Ok(source.contains("verify") && source.contains("human"))
}

/// Set the ticket quantity on whatever control exists: select options,
/// number inputs, then repeated plus-button clicks.
pub async fn set_quantity(session: &BrowserSession, quantity: u32) -> Result<bool, BrowserError> {
    if quantity <= 1 {
        return Ok(true);
    }

    let script = format!(r#"
        (function() {{
            const qty = {quantity};
            const target = String(qty);
            const firstInt = (s) => {{
                const m = String(s || '').match(/\d+/);
                return m ? parseInt(m[0], 10) : null;
            }};
            const fire = (el) => {{
                for (const t of ['input', 'change']) el.dispatchEvent(new Event(t, {{ bubbles: true }}));
            }};

            for (const select of document.querySelectorAll('select')) {{
                if (select.disabled) continue;
                for (const opt of select.options) {{
                    const v = (opt.value || '').trim();
                    const t = (opt.textContent || '').trim();
                    if (v === target || t === target) {{
                        select.value = opt.value;
                        fire(select);
                        return 'select';
                    }}
                }}
            }}

            for (const input of document.querySelectorAll("input[type='number']")) {{
                input.value = target;
                fire(input);
                if (firstInt(input.value) === qty) return 'input';
            }}

            for (const btn of document.querySelectorAll(
                "button[aria-label*='increase'], button[aria-label*='add'], button[aria-label*='tambah']"
            )) {{
                if (btn.offsetParent === null) continue;
                for (let i = 1; i < qty; i++) btn.click();
                return 'plus_button';
            }}

            for (const btn of document.querySelectorAll('button')) {{
                if (btn.offsetParent === null) continue;
                if ((btn.innerText || '').trim() === '+') {{
                    for (let i = 1; i < qty; i++) btn.click();
                    return 'plus_button';
                }}
            }}

            return null;
        }})()
    "#);

    let result = session.execute_js_with_timeout(&script, 10).await?;
    if let Some(method) = result.as_str() {
        debug!("Session {} quantity {} set via {}", session.id, quantity, method);
        return Ok(true);
    }
    Ok(false)
}

/// Find a checkout button by keyword ladder and click it through the shared
/// executor (verified).
async fn click_checkout(rt: &BotRuntime) -> Result<bool, BrowserError> {
    let scan = rt.finder.find_by_labels(&rt.session, &CHECKOUT_KEYWORDS).await?;
    if scan.is_empty() {
        return Ok(false);
    }

    for candidate in &scan.candidates {
        if rt.stop_requested() {
            return Ok(false);
        }
        if candidate.status == crate::finder::CandidateStatus::Disabled {
            continue;
        }
        let selector = scan.selector(candidate.index);
        let outcome = rt.clicker.click(&rt.session, Site::Ticketmaster, &selector).await?;
        if outcome.clicked {
            rt.stats.record_click();
            return Ok(true);
        }
    }

    Ok(false)
}
