use ::isin::ISIN;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::str::FromStr;

// Word bounds on both sides: a code glued to letters or digits (`XS2530201644USD`)
// is not an ISIN here. Such runs are mostly valor/reference strings in this layout.
static ISIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(ISIN:\s*)?\b([A-Z]{2}[A-Z0-9]{10})\b").unwrap()
});

/// An ISIN-shaped code found in statement text.
///
/// `offset` is the byte offset of the 12-character code itself, never of the
/// optional `ISIN:` label in front of it. `line` and `column` are 0-based.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IsinMatch {
    pub isin: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
    pub prefixed: bool,
    pub checksum_valid: bool,
}

impl IsinMatch {
    pub fn end(&self) -> usize {
        self.offset + self.isin.len()
    }
}

// Shape only: codes with a bad check digit are still returned, flagged with
// `checksum_valid = false`.
pub fn locate_isins(text: &str) -> Vec<IsinMatch> {
    let line_starts = line_starts(text);

    ISIN_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let code = caps.get(2)?;
            let offset = code.start();
            let line = line_starts.partition_point(|&s| s <= offset) - 1;
            Some(IsinMatch {
                isin: code.as_str().to_string(),
                offset,
                line,
                column: offset - line_starts[line],
                prefixed: caps.get(1).is_some(),
                checksum_valid: is_valid_isin(code.as_str()),
            })
        })
        .collect()
}

pub fn is_valid_isin(code: &str) -> bool {
    ISIN::from_str(code).is_ok()
}

fn line_starts(text: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(text.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}
