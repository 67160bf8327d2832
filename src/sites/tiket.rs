//! Tiket.com purchase funnel
//!
//! Tiket renders packages as cards with a "Pilih" / "Beli" action button
//! each. The walker collects candidate buttons, climbs their ancestors to
//! find the owning card (scored by testid/class tokens, headings and price
//! text), extracts a package name, filters sold-out entries, picks the best
//! match for the requested package, then pushes quantity and checkout.

use serde::Deserialize;
use tracing::debug;

use crate::browser::{BrowserSession, BrowserError};
use crate::bot::BotRuntime;
use crate::rate::random_delay;
use crate::sites::{self, FunnelResult, Site, CLASS_DISABLED_TOKENS, IGNORE_KEYWORDS, UNAVAILABLE_KEYWORDS};

/// Keywords on package-selection buttons only
const ACTION_KEYWORDS: [&str; 7] = [
    "pilih", "select", "beli", "add", "tambah", "cari tiket", "find tickets",
];

/// Checkout/next-step button ladder
const CHECKOUT_KEYWORDS: [&str; 10] = [
    "lanjut", "continue", "checkout", "pesan", "beli", "book", "order", "next", "bayar", "payment",
];

const MAX_CHECKOUT_ATTEMPTS: u32 = 20;

/// One package card as scraped from the page
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageOption {
    pub index: usize,
    pub name: String,
    pub action: String,
    pub available: bool,
    #[serde(default)]
    pub card_text: String,
}

/// Walk the Tiket funnel to the payment hand-off.
pub async fn run(rt: &BotRuntime) -> Result<FunnelResult, BrowserError> {
    if !rt.config.auto_buy {
        return Ok(FunnelResult::Incomplete);
    }

    if sites::challenge_present(&rt.session).await? {
        rt.note("challenge page before packages");
        if !sites::wait_for_challenge(rt, 30).await? {
            return Ok(FunnelResult::Incomplete);
        }
    }

    let (generation, packages) = wait_for_packages(rt, 10).await?;
    if packages.is_empty() {
        rt.note("no packages found on page");
        return Ok(FunnelResult::Incomplete);
    }
    rt.note(format!("{} package(s) collected", packages.len()));

    let selection = rt.control.auto_buy.selection();
    let quantity = selection
        .as_ref()
        .map(|s| s.quantity)
        .unwrap_or(rt.config.ticket_quantity);
    let target_owned = selection
        .map(|s| s.category)
        .or_else(|| rt.config.ticket_category.clone());
    let target = target_owned.as_deref();

    let chosen = match choose_package(&packages, target) {
        Some(pkg) => pkg,
        None => {
            rt.note(format!(
                "no package matched '{}'",
                target.unwrap_or("<first available>")
            ));
            return Ok(FunnelResult::Incomplete);
        }
    };
    rt.note(format!(
        "package chosen: '{}' ({})",
        chosen.name,
        if chosen.available { "available" } else { "unavailable" }
    ));

    let selector = format!("[data-tr-gen=\"{}\"][data-tr-hit=\"{}\"]", generation, chosen.index);
    if !rt.clicker.fire(&rt.session, &selector).await? {
        return Ok(FunnelResult::Incomplete);
    }
    rt.stats.record_click();
    random_delay(800, 1500).await;

    // Push through quantity + checkout until the URL flips
    for _ in 0..MAX_CHECKOUT_ATTEMPTS {
        if rt.stop_requested() {
            return Ok(FunnelResult::Stopped);
        }

        if sites::challenge_present(&rt.session).await? {
            rt.note("challenge mid-funnel");
            if !sites::wait_for_challenge(rt, 30).await? {
                return Ok(FunnelResult::Incomplete);
            }
        }

        let url = rt.session.current_url().await.unwrap_or_default();
        if Site::Tiket.is_checkout_url(&url) {
            rt.note("checkout reached, complete the purchase manually");
            return Ok(FunnelResult::Handoff { url });
        }

        rt.stats.record_funnel_attempt();

        if !super::ticketmaster::set_quantity(&rt.session, quantity).await? {
            set_quantity_combobox(&rt.session, quantity).await?;
        }

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

/// Poll for package buttons until some appear or the timeout passes.
/// Each poll tags under a fresh generation so stale tags from a previous
/// scan cannot be clicked.
async fn wait_for_packages(
    rt: &BotRuntime,
    timeout_secs: u64,
) -> Result<(u64, Vec<PackageOption>), BrowserError> {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(timeout_secs);
    loop {
        let generation = rt.finder.next_generation();
        if rt.stop_requested() {
            return Ok((generation, Vec::new()));
        }
        let packages = collect_packages(&rt.session, generation).await?;
        if !packages.is_empty() || std::time::Instant::now() >= deadline {
            return Ok((generation, packages));
        }
        random_delay(800, 1200).await;
    }
}

/// Scrape package cards: visible action buttons, their owning cards, names
/// and availability. Buttons are tagged for the click executor.
pub async fn collect_packages(
    session: &BrowserSession,
    generation: u64,
) -> Result<Vec<PackageOption>, BrowserError> {
    let action_json = serde_json::to_string(&ACTION_KEYWORDS).unwrap_or_else(|_| "[]".into());
    let ignore_json =
        serde_json::to_string(&IGNORE_KEYWORDS.iter().copied().collect::<Vec<_>>()).unwrap_or_else(|_| "[]".into());
    let unavailable_json =
        serde_json::to_string(&UNAVAILABLE_KEYWORDS.iter().copied().collect::<Vec<_>>()).unwrap_or_else(|_| "[]".into());
    let disabled_json =
        serde_json::to_string(&CLASS_DISABLED_TOKENS.iter().copied().collect::<Vec<_>>()).unwrap_or_else(|_| "[]".into());

    let script = format!(r#"
        (function() {{
            const actionKeywords = {action_json};
            const ignoreKeywords = {ignore_json};
            const unavailableKeywords = {unavailable_json};
            const disabledClassTokens = {disabled_json};
            const visible = (el) => el.offsetParent !== null;
            const normalize = (s) => String(s || '').replace(/\s+/g, ' ').trim();
            const buttonText = (el) => {{
                let text = normalize(el.innerText);
                if (text) return text;
                for (const attr of ['aria-label', 'title', 'data-testid']) {{
                    const v = normalize(el.getAttribute(attr));
                    if (v) return v;
                }}
                return '';
            }};
            const scoreCard = (el) => {{
                let score = 0;
                const testid = (el.getAttribute('data-testid') || '').toLowerCase();
                if (['package', 'product', 'ticket', 'card'].some(t => testid.includes(t))) score += 2;
                const cls = (el.getAttribute('class') || '').toLowerCase();
                if (['package', 'product', 'ticket', 'card'].some(t => cls.includes(t))) score += 1;
                if (el.querySelector("h1, h2, h3, h4, h5, [role='heading']")) score += 2;
                const text = (el.innerText || '').toLowerCase();
                if (text.includes('rp') || text.includes('idr')) score += 1;
                if (text.length > 30) score += 1;
                return score;
            }};
            const countActions = (el) => {{
                let count = 0;
                for (const btn of el.querySelectorAll("button, a[role='button'], [role='button']")) {{
                    const text = buttonText(btn).toLowerCase();
                    if (actionKeywords.some(k => text.includes(k))) count++;
                }}
                return count;
            }};
            const findCard = (btn) => {{
                let best = null, bestScore = -1;
                let node = btn.parentElement;
                let depth = 0;
                while (node && node !== document.body && depth < 10) {{
                    const tag = node.tagName.toLowerCase();
                    if (['div', 'section', 'article', 'li'].includes(tag)) {{
                        const textLen = (node.innerText || '').length;
                        const score = scoreCard(node);
                        if (countActions(node) === 1 && score >= 2 && textLen <= 1200) return node;
                        if (textLen <= 2500 && score > bestScore) {{ bestScore = score; best = node; }}
                    }}
                    node = node.parentElement;
                    depth++;
                }}
                return best;
            }};
            const extractName = (card) => {{
                if (!card) return '';
                for (const h of card.querySelectorAll("h1, h2, h3, h4, h5, [role='heading']")) {{
                    const text = normalize(h.innerText);
                    if (text) return text;
                }}
                return '';
            }};

            const packages = [];
            for (const btn of document.querySelectorAll(
                "button, a[role='button'], [role='button'], input[type='submit'], input[type='button']"
            )) {{
                if (!visible(btn)) continue;
                const action = buttonText(btn);
                const actionLower = action.toLowerCase();
                if (!actionLower) continue;
                if (ignoreKeywords.some(k => actionLower.includes(k))) continue;
                if (!actionKeywords.some(k => actionLower.includes(k))) continue;

                const card = findCard(btn);
                const cardText = normalize(card ? card.innerText : '');
                const name = extractName(card) || action;

                let disabled = btn.getAttribute('disabled') !== null ||
                    (btn.getAttribute('aria-disabled') || '').toLowerCase() === 'true';
                if (!disabled) {{
                    const classes = (btn.getAttribute('class') || '').toLowerCase().split(/\s+/);
                    disabled = classes.some(c => disabledClassTokens.includes(c));
                }}
                const hits = unavailableKeywords.filter(k => cardText.toLowerCase().includes(k));
                let available = true;
                if (disabled) available = false;
                else if (hits.length > 0 && cardText.length <= 400) available = false;

                const idx = packages.length;
                btn.setAttribute('data-tr-gen', '{generation}');
                btn.setAttribute('data-tr-hit', String(idx));
                packages.push({{
                    index: idx,
                    name: name,
                    action: action,
                    available: available,
                    cardText: cardText.slice(0, 300)
                }});
            }}
            return packages;
        }})()
    "#);

    let result = session.execute_js_with_timeout(&script, 10).await?;
    let mut packages: Vec<PackageOption> = serde_json::from_value(result).unwrap_or_default();

    for pkg in &mut packages {
        if is_bad_package_name(&pkg.name) {
            pkg.name = pkg.action.clone();
        }
    }

    Ok(dedupe_packages(packages))
}

/// Names that are prices, action verbs or sold-out markers are junk
pub fn is_bad_package_name(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return true;
    }
    let lower = text.to_lowercase();
    if IGNORE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }
    if ACTION_KEYWORDS.iter().any(|k| lower.contains(k)) && lower.split_whitespace().count() <= 2 {
        return true;
    }
    if UNAVAILABLE_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return true;
    }
    // bare price: optional rp/idr prefix then digits and separators
    let stripped = lower
        .trim_start_matches("rp")
        .trim_start_matches("idr")
        .trim();
    !stripped.is_empty()
        && stripped
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '-' | '.' | ',') || c.is_whitespace())
}

/// Drop repeated cards, keeping an available entry over an unavailable twin
pub fn dedupe_packages(packages: Vec<PackageOption>) -> Vec<PackageOption> {
    let mut by_name: Vec<PackageOption> = Vec::new();
    for pkg in packages {
        let key = pkg.name.to_lowercase();
        match by_name.iter_mut().find(|p| p.name.to_lowercase() == key) {
            Some(existing) => {
                if pkg.available && !existing.available {
                    *existing = pkg;
                }
            }
            None => by_name.push(pkg),
        }
    }
    by_name
}

/// Lowercase alphanumeric-and-space form used for fuzzy package matching
pub fn normalize_match(text: &str) -> String {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pick the package to click: fuzzy target match preferring available
/// entries, else the first available, else the first.
pub fn choose_package<'a>(
    packages: &'a [PackageOption],
    target: Option<&str>,
) -> Option<&'a PackageOption> {
    if packages.is_empty() {
        return None;
    }

    if let Some(target) = target.map(normalize_match).filter(|t| !t.is_empty()) {
        let mut fallback = None;
        for pkg in packages {
            let name_norm = normalize_match(&pkg.name);
            let raw_norm = normalize_match(&pkg.card_text);
            if name_norm.contains(&target) || raw_norm.contains(&target) {
                if pkg.available {
                    return Some(pkg);
                }
                if fallback.is_none() {
                    fallback = Some(pkg);
                }
            }
        }
        return fallback;
    }

    packages.iter().find(|p| p.available).or_else(|| packages.first())
}

/// Custom dropdown quantity controls (role=combobox / listbox popups)
async fn set_quantity_combobox(session: &BrowserSession, quantity: u32) -> Result<bool, BrowserError> {
    let script = format!(r#"
        (function() {{
            const target = String({quantity});
            const triggers = document.querySelectorAll(
                "[role='combobox'], [aria-haspopup='listbox'], [class*='quantity'] [role='button']"
            );
            for (const trigger of triggers) {{
                if (trigger.offsetParent === null) continue;
                trigger.click();
                const options = document.querySelectorAll("[role='option'], li[data-value]");
                for (const opt of options) {{
                    const text = (opt.innerText || '').trim();
                    const value = (opt.getAttribute('data-value') || '').trim();
                    if (text === target || value === target) {{
                        opt.click();
                        return true;
                    }}
                }}
            }}
            return false;
        }})()
    "#);

    let set = session.execute_js_with_timeout(&script, 10).await?.as_bool().unwrap_or(false);
    if set {
        debug!("Session {} quantity {} set via combobox", session.id, quantity);
    }
    Ok(set)
}

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
        let outcome = rt.clicker.click(&rt.session, Site::Tiket, &selector).await?;
        if outcome.clicked {
            rt.stats.record_click();
            return Ok(true);
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkg(index: usize, name: &str, available: bool, card_text: &str) -> PackageOption {
        PackageOption {
            index,
            name: name.into(),
            action: "Pilih".into(),
            available,
            card_text: card_text.into(),
        }
    }

    #[test]
    fn bad_names_are_rejected() {
        assert!(is_bad_package_name(""));
        assert!(is_bad_package_name("Rp 1.500.000"));
        assert!(is_bad_package_name("Pilih"));
        assert!(is_bad_package_name("Sold Out"));
        assert!(is_bad_package_name("Lihat detail"));
        assert!(!is_bad_package_name("VIP Festival A"));
        // an action verb inside a long real name is fine
        assert!(!is_bad_package_name("Paket Beli Bersama Keluarga Besar"));
    }

    #[test]
    fn match_normalization_strips_punctuation() {
        assert_eq!(normalize_match("CAT-1 (Gold)"), "cat 1 gold");
        assert_eq!(normalize_match("  VIP   A  "), "vip a");
    }

    #[test]
    fn target_match_prefers_available() {
        let packages = vec![
            pkg(0, "VIP Gold", false, ""),
            pkg(1, "VIP Gold", true, ""),
            pkg(2, "Festival", true, ""),
        ];
        let chosen = choose_package(&packages, Some("vip gold")).unwrap();
        assert_eq!(chosen.index, 1);
    }

    #[test]
    fn unavailable_match_beats_no_match() {
        let packages = vec![
            pkg(0, "Festival", true, ""),
            pkg(1, "VIP Gold", false, ""),
        ];
        let chosen = choose_package(&packages, Some("vip")).unwrap();
        assert_eq!(chosen.index, 1);
    }

    #[test]
    fn target_can_match_card_text() {
        let packages = vec![
            pkg(0, "Paket A", true, "Includes CAT 5 seating and merch"),
        ];
        let chosen = choose_package(&packages, Some("cat 5")).unwrap();
        assert_eq!(chosen.index, 0);
    }

    #[test]
    fn no_target_takes_first_available() {
        let packages = vec![
            pkg(0, "A", false, ""),
            pkg(1, "B", true, ""),
        ];
        assert_eq!(choose_package(&packages, None).unwrap().index, 1);

        let all_out = vec![pkg(0, "A", false, "")];
        assert_eq!(choose_package(&all_out, None).unwrap().index, 0);
    }

    #[test]
    fn unmatched_target_yields_none() {
        let packages = vec![pkg(0, "Festival", true, "")];
        assert!(choose_package(&packages, Some("vip platinum")).is_none());
    }

    #[test]
    fn dedupe_keeps_available_twin() {
        let packages = vec![
            pkg(0, "VIP", false, ""),
            pkg(1, "vip", true, ""),
            pkg(2, "Festival", true, ""),
        ];
        let deduped = dedupe_packages(packages);
        assert_eq!(deduped.len(), 2);
        assert!(deduped[0].available);
        assert_eq!(deduped[0].index, 1);
    }
}
