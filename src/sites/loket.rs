//! Loket.com purchase funnel
//!
//! The flow behind a clicked "Beli Tiket" button: privacy banner, optional
//! waiting-room gate (sometimes behind a Cloudflare interstitial), the
//! checkout widget with its category cards and quantity controls, a Terms &
//! Conditions modal, and finally the /register personal-data form where the
//! human takes over.

use tracing::debug;

use crate::browser::{BrowserSession, BrowserError};
use crate::bot::{BotRuntime, Selection};
use crate::rate::random_delay;
use crate::sites::{self, FunnelResult, Site, ORDER_KEYWORDS, QUEUE_TEXT_TOKENS, QUEUE_URL_TOKENS};
use crate::verify;

/// Auto-buy attempt ceiling inside the widget
const MAX_AUTO_BUY_ATTEMPTS: u32 = 1000;
/// Hybrid mode refreshes the widget only every Nth attempt
const SKIP_REFRESH_EVERY: u32 = 5;
/// Seconds to wait for the /register redirect after an order click
const ORDER_REDIRECT_WAIT_SECS: u64 = 25;

/// Walk the Loket funnel to the payment hand-off.
pub async fn run(rt: &BotRuntime) -> Result<FunnelResult, BrowserError> {
    dismiss_privacy(rt, 6).await?;

    if is_queue_page(&rt.session).await? {
        rt.note("waiting-room gate before widget");
        if handle_queue_gate(rt).await? {
            wait_for_widget(rt, 10).await?;
        }
    }

    // Resolve what to buy; the panel may not have told us yet
    let mut selection = match rt.control.auto_buy.selection() {
        Some(sel) => sel,
        // Manual mode: widget is open, human picks the tickets
        None if !rt.config.await_selection => return Ok(FunnelResult::Incomplete),
        None => match wait_for_selection(rt).await? {
            Some(sel) => sel,
            None => return Ok(FunnelResult::Stopped),
        },
    };
    rt.note(format!("auto-buy: {} x{}", selection.category, selection.quantity));

    rt.control.auto_buy.set_running(true);
    let result = auto_buy_loop(rt, &mut selection).await;
    rt.control.auto_buy.set_running(false);
    result
}

async fn auto_buy_loop(rt: &BotRuntime, selection: &mut Selection) -> Result<FunnelResult, BrowserError> {
    let mut skip_refresh_attempts: u32 = 0;
    let mut attempts: u32 = 0;

    while attempts < MAX_AUTO_BUY_ATTEMPTS {
        if rt.stop_requested() {
            return Ok(FunnelResult::Stopped);
        }
        // Pausing must not burn attempts
        if rt.control.auto_buy.is_paused() {
            random_delay(400, 800).await;
            continue;
        }
        attempts += 1;

        // Already through? Only the real /register form counts.
        let current_url = rt.session.current_url().await.unwrap_or_default();
        if Site::Loket.is_checkout_url(&current_url) && is_checkout_form_page(&rt.session).await? {
            rt.note("personal-data form reached");
            return Ok(FunnelResult::Handoff { url: current_url });
        }

        // The panel may have swapped the target mid-run
        if let Some(updated) = rt.control.auto_buy.selection() {
            if updated != *selection {
                rt.note(format!("selection updated: {} x{}", updated.category, updated.quantity));
                *selection = updated;
            }
        }

        rt.stats.record_funnel_attempt();

        if !rt.config.skip_refresh {
            rt.session.reload().await?;
            dismiss_privacy(rt, 2).await?;
            rt.config.pacing.wait().await;
        } else {
            // Hybrid: probe the live DOM, refresh only to unstick it
            skip_refresh_attempts += 1;
            if skip_refresh_attempts >= SKIP_REFRESH_EVERY {
                rt.session.reload().await?;
                dismiss_privacy(rt, 2).await?;
                skip_refresh_attempts = 0;
            } else {
                dismiss_privacy(rt, 1).await?;
            }
            rt.config.pacing.wait().await;
        }

        if rt.control.auto_buy.is_paused() {
            continue;
        }

        if is_queue_page(&rt.session).await? {
            rt.note("waiting-room gate inside auto-buy");
            if handle_queue_gate(rt).await? {
                wait_for_widget(rt, 15).await?;
            }
            continue;
        }

        if select_category_and_order(rt, selection).await? {
            let url = rt.session.current_url().await.unwrap_or_default();
            rt.note(format!("order placed for {} x{}", selection.category, selection.quantity));
            return Ok(FunnelResult::Handoff { url });
        }
    }

    Ok(FunnelResult::Incomplete)
}

/// Park in the widget until the panel supplies a category, republishing the
/// scraped category list while waiting.
async fn wait_for_selection(rt: &BotRuntime) -> Result<Option<Selection>, BrowserError> {
    rt.control.auto_buy.set_awaiting(true);

    for _ in 0..6 {
        if rt.stop_requested() {
            rt.control.auto_buy.set_awaiting(false);
            return Ok(None);
        }
        let categories = collect_categories(&rt.session).await?;
        if !categories.is_empty() {
            rt.control.auto_buy.publish_categories(categories);
            break;
        }
        random_delay(400, 800).await;
    }

    rt.note("widget open, waiting for category selection");

    let mut tick: u32 = 0;
    loop {
        if rt.stop_requested() {
            rt.control.auto_buy.set_awaiting(false);
            return Ok(None);
        }
        if let Some(selection) = rt.control.auto_buy.selection() {
            rt.control.auto_buy.set_awaiting(false);
            return Ok(Some(selection));
        }

        tick += 1;
        if tick % 3 == 0 {
            dismiss_privacy(rt, 1).await?;
            let categories = collect_categories(&rt.session).await?;
            rt.control.auto_buy.publish_categories(categories);
        }

        rt.control
            .auto_buy
            .wait_for_selection(std::time::Duration::from_millis(500))
            .await;
    }
}

/// Wait a few polls for the widget to replace the queue page
async fn wait_for_widget(rt: &BotRuntime, polls: u32) -> Result<bool, BrowserError> {
    for _ in 0..polls {
        if rt.stop_requested() {
            return Ok(false);
        }
        random_delay(1000, 2000).await;
        let url = rt.session.current_url().await.unwrap_or_default();
        if Site::Loket.is_widget_url(&url) || widget_on_page(&rt.session).await? {
            rt.note("widget appeared after queue");
            return Ok(true);
        }
    }
    debug!("Session {} widget did not appear after queue", rt.session.id);
    Ok(false)
}

// ========== Category selection and ordering ==========

/// One full pass: locate the category card, set the quantity, click the
/// order button, clear the T&C modal, and wait for the /register redirect.
async fn select_category_and_order(rt: &BotRuntime, selection: &Selection) -> Result<bool, BrowserError> {
    let generation = rt.finder.next_generation();

    if !locate_category_section(&rt.session, &selection.category, generation).await? {
        return Ok(false);
    }
    random_delay(200, 600).await;

    let quantity_set = set_quantity(&rt.session, generation, selection.quantity).await?;
    if !quantity_set && !rt.config.aggressive_order {
        debug!("Session {} quantity not set for '{}'", rt.session.id, selection.category);
        return Ok(false);
    }
    random_delay(300, 600).await;

    let order = tag_order_button(&rt.session, generation).await?;
    let order_text = match order {
        Some(text) => text,
        None => {
            debug!("Session {} no order button near '{}'", rt.session.id, selection.category);
            return Ok(false);
        }
    };

    let url_before = rt.session.current_url().await.unwrap_or_default();
    let selector = format!("[data-tr-gen=\"{}\"][data-tr-hit=\"0\"]", generation);
    if !rt.clicker.fire(&rt.session, &selector).await? {
        return Ok(false);
    }
    rt.note(format!("order button clicked: '{}'", order_text));
    random_delay(600, 1200).await;

    let agree_clicked = dismiss_terms(rt, 12).await?;

    // No refresh now: watch for the redirect instead
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(ORDER_REDIRECT_WAIT_SECS);
    while std::time::Instant::now() < deadline {
        if rt.stop_requested() {
            return Ok(false);
        }
        random_delay(400, 800).await;

        let current = rt.session.current_url().await.unwrap_or_default();
        if Site::Loket.is_checkout_url(&current) && is_checkout_form_page(&rt.session).await? {
            return Ok(true);
        }
        if verify::url_advanced(&url_before, &current) {
            return Ok(true);
        }
        if agree_clicked && terms_modal_present(&rt.session).await? {
            dismiss_terms(rt, 6).await?;
        }
    }

    debug!("Session {} order click made no visible progress", rt.session.id);
    Ok(false)
}

/// Find and tag the ticket card for a category name
async fn locate_category_section(
    session: &BrowserSession,
    category: &str,
    generation: u64,
) -> Result<bool, BrowserError> {
    let category_json = serde_json::to_string(&category.to_uppercase())
        .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

    let script = format!(r#"
        (function() {{
            const target = {category_json};
            let section = null;

            for (const item of document.querySelectorAll("div[class*='ticket-item']")) {{
                const text = (item.innerText || '').toUpperCase();
                if (text.includes(target)) {{ section = item; break; }}
                for (const el of item.querySelectorAll('[data-ticket-name], [ticket-name]')) {{
                    const name = (el.getAttribute('data-ticket-name') || el.getAttribute('ticket-name') || '').toUpperCase();
                    if (name.includes(target)) {{ section = item; break; }}
                }}
                if (section) break;
            }}

            if (!section) {{
                for (const heading of document.querySelectorAll('h4, h5, h6')) {{
                    if (!(heading.innerText || '').trim().toUpperCase().includes(target)) continue;
                    let node = heading.parentElement;
                    while (node && node !== document.body) {{
                        if (node.querySelector("input[type='number'], select, button")) {{ section = node; break; }}
                        node = node.parentElement;
                    }}
                    if (!section) section = heading;
                    break;
                }}
            }}

            if (!section) return false;
            const container = section.closest("div[class*='ticket-item']") || section;
            container.setAttribute('data-tr-gen', '{generation}');
            container.setAttribute('data-tr-sec', '1');
            container.scrollIntoView({{ behavior: 'smooth', block: 'center' }});
            return true;
        }})()
    "#);

    Ok(session.execute_js_with_timeout(&script, 10).await?.as_bool().unwrap_or(false))
}

/// Set the ticket quantity inside the tagged card: number input, then
/// select option, then a literal digit button.
async fn set_quantity(session: &BrowserSession, generation: u64, quantity: u32) -> Result<bool, BrowserError> {
    let script = format!(r#"
        (function() {{
            const qty = {quantity};
            const target = String(qty);
            const section = document.querySelector('[data-tr-gen="{generation}"][data-tr-sec="1"]') || document;
            const fire = (el) => {{
                for (const t of ['input', 'change']) el.dispatchEvent(new Event(t, {{ bubbles: true }}));
            }};
            const firstInt = (s) => {{
                const m = String(s || '').match(/\d+/);
                return m ? parseInt(m[0], 10) : null;
            }};

            for (const input of section.querySelectorAll("input[type='number'], input[class*='quantity'], input[name*='quantity']")) {{
                if (firstInt(input.value) === qty) return 'input';
                input.value = target;
                fire(input);
                if (firstInt(input.value) === qty) return 'input';
            }}

            for (const select of section.querySelectorAll('select')) {{
                if (select.disabled) continue;
                if ((select.getAttribute('aria-disabled') || '').toLowerCase() === 'true') continue;
                if (select.offsetParent === null) continue;
                if (firstInt(select.value) === qty) return 'select';
                for (const opt of select.options) {{
                    const v = (opt.value || '').trim();
                    const t = (opt.textContent || '').trim();
                    if (v === target || t === target || firstInt(v) === qty || firstInt(t) === qty) {{
                        select.value = opt.value;
                        fire(select);
                        return 'select';
                    }}
                }}
            }}

            for (const btn of section.querySelectorAll('button')) {{
                const label = (btn.innerText || '').trim();
                const aria = btn.getAttribute('aria-label') || '';
                if (label === target || aria.includes(target)) {{
                    btn.click();
                    return 'button';
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

/// Tag the order button: keyword ladder inside the card, then page-wide,
/// then class/id fallback. Returns its text when found.
async fn tag_order_button(session: &BrowserSession, generation: u64) -> Result<Option<String>, BrowserError> {
    let keywords: Vec<&str> = ORDER_KEYWORDS.iter().copied().collect();
    let keywords_json = serde_json::to_string(&keywords)
        .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;

    let script = format!(r#"
        (function() {{
            const keywords = {keywords_json};
            const visible = (el) => el.offsetParent !== null;
            const tag = (el) => {{
                el.setAttribute('data-tr-gen', '{generation}');
                el.setAttribute('data-tr-hit', '0');
                el.scrollIntoView({{ behavior: 'smooth', block: 'center' }});
                return (el.innerText || '').trim().slice(0, 80);
            }};

            const scopes = [];
            const section = document.querySelector('[data-tr-gen="{generation}"][data-tr-sec="1"]');
            if (section) scopes.push(section);
            scopes.push(document);

            for (const scope of scopes) {{
                for (const keyword of keywords) {{
                    for (const btn of scope.querySelectorAll("button, a, [role='button']")) {{
                        if (!visible(btn)) continue;
                        if (btn.getAttribute('disabled') !== null) continue;
                        const text = (btn.innerText || '').trim().toLowerCase();
                        const aria = (btn.getAttribute('aria-label') || '').trim().toLowerCase();
                        if (text.includes(keyword) || aria.includes(keyword)) {{
                            return tag(btn);
                        }}
                    }}
                }}
            }}

            const fallbacks = [
                "button[class*='order']", "button[class*='pesan']",
                "button[id*='order']", "button[id*='pesan']",
                "a[class*='order']", "a[class*='pesan']"
            ];
            for (const sel of fallbacks) {{
                for (const btn of document.querySelectorAll(sel)) {{
                    if (!visible(btn)) continue;
                    const text = (btn.innerText || '').trim().toLowerCase();
                    if (['pesan', 'order', 'beli', 'buy'].some(k => text.includes(k))) {{
                        return tag(btn);
                    }}
                }}
            }}

            return null;
        }})()
    "#);

    let result = session.execute_js_with_timeout(&script, 10).await?;
    Ok(result.as_str().map(|s| s.to_string()))
}

// ========== Popups ==========

/// Click Accept on the privacy banner if it shows up, probing same-origin
/// iframes too. Polls until clicked or the timeout passes.
pub async fn dismiss_privacy(rt: &BotRuntime, timeout_secs: u64) -> Result<bool, BrowserError> {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(timeout_secs);
    loop {
        if rt.stop_requested() {
            return Ok(false);
        }

        let script = r#"
            (function() {
                const tryDoc = (doc) => {
                    const body = doc.body ? (doc.body.innerText || '') : '';
                    if (!body.toLowerCase().includes('we value your privacy')) return false;
                    for (const btn of doc.querySelectorAll("button, a, [role='button']")) {
                        if (btn.offsetParent === null) continue;
                        let text = (btn.innerText || '').trim().toLowerCase();
                        if (!text) text = (btn.getAttribute('aria-label') || '').trim().toLowerCase();
                        if (!text) continue;
                        if (['accept', 'agree', 'setuju'].some(t => text.includes(t))) {
                            btn.scrollIntoView({ block: 'center' });
                            btn.click();
                            return true;
                        }
                    }
                    return false;
                };
                if (tryDoc(document)) return true;
                for (const frame of document.querySelectorAll('iframe')) {
                    try {
                        const doc = frame.contentDocument;
                        if (doc && tryDoc(doc)) return true;
                    } catch (e) {}
                }
                return false;
            })()
        "#;

        if rt.session.execute_js_with_timeout(script, 5).await?.as_bool().unwrap_or(false) {
            debug!("Session {} privacy banner accepted", rt.session.id);
            random_delay(200, 500).await;
            return Ok(true);
        }

        if std::time::Instant::now() >= deadline {
            return Ok(false);
        }
        random_delay(200, 500).await;
    }
}

/// The Terms & Conditions modal Loket raises after the order click
pub async fn terms_modal_present(session: &BrowserSession) -> Result<bool, BrowserError> {
    let source = session.page_source_lower().await?;
    if source.contains("terms and conditions") || source.contains("syarat dan ketentuan") {
        let script = r#"
            (function() {
                for (const m of document.querySelectorAll("div[class*='modal'], div[class*='swal'], div[class*='term']")) {
                    if (m.offsetParent !== null) return true;
                }
                return false;
            })()
        "#;
        return Ok(session.execute_js_with_timeout(script, 5).await?.as_bool().unwrap_or(false));
    }
    Ok(false)
}

/// Click Agree on the T&C modal, waiting for it to disappear
pub async fn dismiss_terms(rt: &BotRuntime, timeout_secs: u64) -> Result<bool, BrowserError> {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(timeout_secs);
    loop {
        if rt.stop_requested() {
            return Ok(false);
        }

        let script = r#"
            (function() {
                let btn = document.querySelector('#btn-agree-tnc');
                if (!btn || btn.offsetParent === null) {
                    btn = null;
                    for (const candidate of document.querySelectorAll('button')) {
                        if (candidate.offsetParent === null) continue;
                        const text = (candidate.innerText || '').trim().toLowerCase();
                        if (text.includes('agree') || text.includes('setuju')) { btn = candidate; break; }
                    }
                }
                if (!btn) return false;
                btn.scrollIntoView({ block: 'center' });
                btn.click();
                return true;
            })()
        "#;

        if rt.session.execute_js_with_timeout(script, 5).await?.as_bool().unwrap_or(false) {
            rt.note("T&C agreed");
            // give the modal a beat to go away
            for _ in 0..20 {
                random_delay(100, 200).await;
                if !terms_modal_present(&rt.session).await? {
                    break;
                }
            }
            return Ok(true);
        }

        if std::time::Instant::now() >= deadline {
            return Ok(false);
        }
        random_delay(200, 500).await;
    }
}

// ========== Queue / waiting room ==========

/// Detect the "Join the Queue" / waiting-room interstitial
pub async fn is_queue_page(session: &BrowserSession) -> Result<bool, BrowserError> {
    let url = session.current_url().await.unwrap_or_default().to_lowercase();
    if QUEUE_URL_TOKENS.iter().any(|t| url.contains(t)) {
        return Ok(true);
    }

    let source = session.page_source_lower().await?;
    if QUEUE_TEXT_TOKENS.iter().any(|t| source.contains(t)) {
        return Ok(true);
    }

    let script = r#"
        (function() {
            for (const btn of document.querySelectorAll("button, a, [role='button']")) {
                if (btn.offsetParent === null) continue;
                const text = (btn.innerText || '').toLowerCase();
                if (text.includes('join') && text.includes('queue')) return true;
            }
            return !!document.querySelector("[class*='waiting-room'], [id*='waiting-room']");
        })()
    "#;
    Ok(session.execute_js_with_timeout(script, 5).await?.as_bool().unwrap_or(false))
}

/// Click through the queue gate. Returns true once the queue was joined
/// (URL change or widget appearance).
pub async fn handle_queue_gate(rt: &BotRuntime) -> Result<bool, BrowserError> {
    random_delay(1000, 2000).await;

    if sites::challenge_present(&rt.session).await? {
        rt.note("Cloudflare challenge before queue");
        if !sites::wait_for_challenge(rt, 30).await? {
            return Ok(false);
        }
    }

    let scan = rt.finder
        .find_by_labels(&rt.session, &["join the queue", "join queue", "masuk antrean"])
        .await?;
    if scan.is_empty() {
        debug!("Session {} no join-queue button found", rt.session.id);
        return Ok(false);
    }

    for candidate in &scan.candidates {
        if rt.stop_requested() {
            return Ok(false);
        }
        let selector = scan.selector(candidate.index);
        let outcome = rt.clicker.click(&rt.session, Site::Loket, &selector).await?;
        if outcome.clicked {
            rt.stats.record_click();
            return Ok(true);
        }
    }

    // The click may have registered without any visible change yet
    random_delay(2000, 3000).await;
    let url = rt.session.current_url().await.unwrap_or_default();
    Ok(Site::Loket.is_widget_url(&url) || widget_on_page(&rt.session).await?)
}

// ========== Widget detection ==========

/// Widget markers visible in the page itself (not just the URL)
pub async fn widget_on_page(session: &BrowserSession) -> Result<bool, BrowserError> {
    let source = session.page_source_lower().await?;
    const INDICATORS: [&str; 5] = [
        "widget.loket.com",
        "pilih kategori",
        "select category",
        "ticket-item",
        "loket.com/widget",
    ];
    if INDICATORS.iter().any(|i| source.contains(i)) {
        return Ok(true);
    }
    verify::widget_iframe_present(session, Site::Loket).await
}

/// Pull a widget URL straight out of the DOM without clicking anything
pub async fn find_widget_url_fast(session: &BrowserSession) -> Result<Option<String>, BrowserError> {
    let script = r#"
        (function() {
            try {
                const link = document.querySelector('a[href*="loket.com/widget"]');
                if (link && link.href) return link.href;
                const dataEl = document.querySelector(
                    '[data-url*="loket.com/widget"],[data-href*="loket.com/widget"],[data-link*="loket.com/widget"]'
                );
                if (dataEl) {
                    return dataEl.getAttribute('data-url')
                        || dataEl.getAttribute('data-href')
                        || dataEl.getAttribute('data-link') || '';
                }
                const html = document.documentElement ? document.documentElement.outerHTML : '';
                let match = html.match(/https?:\/\/(?:widget\.)?loket\.com\/widget\/[A-Za-z0-9_-]+/i);
                if (!match) {
                    match = html.match(/(?:widget\.)?loket\.com\/widget\/[A-Za-z0-9_-]+/i);
                }
                return match ? match[0] : '';
            } catch (e) {
                return '';
            }
        })()
    "#;

    let result = session.execute_js_with_timeout(script, 5).await?;
    let raw = result.as_str().unwrap_or("");
    let normalized = normalize_widget_url(raw);
    if !normalized.is_empty() && Site::Loket.is_widget_url(&normalized) {
        return Ok(Some(normalized));
    }
    Ok(None)
}

/// Fix up scheme-less widget URLs scraped from markup
pub fn normalize_widget_url(raw: &str) -> String {
    let raw = raw.trim().trim_matches(|c| c == '\'' || c == '"').to_string();
    if raw.is_empty() {
        return raw;
    }
    if let Some(stripped) = raw.strip_prefix("//") {
        return format!("https://{}", stripped);
    }
    if raw.starts_with("widget.loket.com") || raw.starts_with("loket.com/widget") {
        return format!("https://{}", raw);
    }
    raw
}

// ========== Checkout form detection ==========

/// Personal-data form keywords on the /register step
const CHECKOUT_FORM_KEYWORDS: [&str; 7] = [
    "data diri",
    "informasi personal",
    "personal information",
    "nama depan",
    "nama belakang",
    "nomor identitas",
    "no. handphone",
];

/// True when the current page is the widget's personal-data form
pub async fn is_checkout_form_page(session: &BrowserSession) -> Result<bool, BrowserError> {
    let url = session.current_url().await.unwrap_or_default().to_lowercase();
    if !url.contains("widget.loket.com/widget") && !url.contains("/register") {
        return Ok(false);
    }
    let source = session.page_source_lower().await?;
    Ok(CHECKOUT_FORM_KEYWORDS.iter().any(|k| source.contains(k)))
}

// ========== Category list ==========

/// Collect candidate category names from the widget and clean them up
pub async fn collect_categories(session: &BrowserSession) -> Result<Vec<String>, BrowserError> {
    let script = r#"
        (function() {
            const names = [];
            for (const heading of document.querySelectorAll(
                "div[class*='ticket-item'] h4, div[class*='ticket-item'] h5, div[class*='ticket-item'] h6"
            )) {
                names.push(heading.innerText || '');
            }
            for (const el of document.querySelectorAll('[data-ticket-name]')) {
                names.push(el.getAttribute('data-ticket-name') || '');
            }
            for (const el of document.querySelectorAll('[ticket-name]')) {
                names.push(el.getAttribute('ticket-name') || '');
            }
            return names;
        })()
    "#;

    let result = session.execute_js_with_timeout(script, 5).await?;
    let raw: Vec<String> = serde_json::from_value(result).unwrap_or_default();
    Ok(clean_categories(raw))
}

/// Normalize whitespace, drop price-looking strings, dedupe
/// case-insensitively while preserving first-seen order.
pub fn clean_categories(raw: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut categories = Vec::new();

    for name in raw {
        let cleaned = name.split_whitespace().collect::<Vec<_>>().join(" ");
        if cleaned.is_empty() || sites::looks_like_price(&cleaned) {
            continue;
        }
        let key = cleaned.to_lowercase();
        if seen.insert(key) {
            categories.push(cleaned);
        }
    }

    categories
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widget_url_normalization() {
        assert_eq!(
            normalize_widget_url("widget.loket.com/widget/abc"),
            "https://widget.loket.com/widget/abc"
        );
        assert_eq!(
            normalize_widget_url("//widget.loket.com/widget/abc"),
            "https://widget.loket.com/widget/abc"
        );
        assert_eq!(
            normalize_widget_url("'https://widget.loket.com/widget/abc'"),
            "https://widget.loket.com/widget/abc"
        );
        assert_eq!(normalize_widget_url("  "), "");
    }

    #[test]
    fn category_cleanup_filters_and_dedupes() {
        let raw = vec![
            "  VIP   Gold ".to_string(),
            "Rp 1.500.000".to_string(),
            "vip gold".to_string(),
            "CAT 1".to_string(),
            "".to_string(),
            "250,000".to_string(),
        ];
        let cleaned = clean_categories(raw);
        assert_eq!(cleaned, vec!["VIP Gold".to_string(), "CAT 1".to_string()]);
    }
}
