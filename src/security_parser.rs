use once_cell::sync::Lazy;
use regex::Regex;

use crate::isin::IsinMatch;

static SECURITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(.*?)\s*/\s*ISIN:?\s+([A-Z]{2}[A-Z0-9]{9}[0-9])").unwrap()
});

// "USD 200'000 TORONTO DOMINION ..." -> currency, nominal, rest of the line
static POSITION_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Z]{3})\s+\d[\d'’]*(?:\.\d+)?\s+(.*)$").unwrap()
});

static NUMERIC_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\d\s'’.,%/:-]*$").unwrap()
});

/// Split a `"Name / ISIN XX0000000000"` cell into name and ISIN.
pub fn split_name_and_isin(text: &str) -> (String, Option<String>) {
    if let Some(caps) = SECURITY_RE.captures(text) {
        let name = caps.get(1).map_or("", |m| m.as_str()).trim().to_string();
        let isin = caps.get(2).map(|m| m.as_str().to_string());
        (name, isin)
    } else {
        (text.trim().to_string(), None)
    }
}

/// Security name for an ISIN: text in front of it on the same line, otherwise the
/// closest preceding line with words in it. A leading `CCY nominal` is dropped.
pub fn extract_security_name(text: &str, isin: &IsinMatch) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let line = lines.get(isin.line)?;

    let head = line.get(..isin.column).unwrap_or("");
    let head = clean_name(head.trim().trim_end_matches("ISIN:").trim_end().trim_end_matches('/'));
    if let Some(name) = head {
        return Some(name);
    }

    lines[..isin.line]
        .iter()
        .rev()
        .take(3)
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && !NUMERIC_LINE_RE.is_match(l))
        .find_map(|l| clean_name(l))
}

/// Currency of the position line belonging to an ISIN (`USD 200'000 ...`).
pub fn detect_currency(text: &str, isin: &IsinMatch) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let first = isin.line.saturating_sub(3);
    lines.get(first..=isin.line)?
        .iter()
        .rev()
        .find_map(|l| POSITION_LINE_RE.captures(l).map(|c| c[1].to_string()))
}

fn clean_name(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let name = POSITION_LINE_RE
        .captures(raw)
        .and_then(|c| c.get(2))
        .map_or(raw, |m| m.as_str())
        .trim();

    if name.chars().filter(|c| c.is_alphabetic()).count() < 3 {
        return None;
    }
    Some(name.to_string())
}
