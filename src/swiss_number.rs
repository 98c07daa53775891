use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

// Candidate runs are matched greedily and then checked against the grouped grammar,
// so a long digit run (valor numbers, ISIN bodies) is never split into pieces.
static RUN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d[\d'’]*(?:\.\d+)?").unwrap()
});

static GROUPED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{1,3}(?:['’]\d{3})*(?:\.\d{2})?$").unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub struct NumberToken {
    pub value: Decimal,
    pub start: usize,
    pub end: usize,
}

/// Parse the first Swiss-formatted number in `s` (`199'080`, `1'234.56`).
/// Returns zero when nothing in `s` matches.
pub fn parse_swiss_number(s: &str) -> Decimal {
    find_swiss_numbers(s)
        .first()
        .map(|t| t.value)
        .unwrap_or(Decimal::ZERO)
}

pub fn find_swiss_numbers(text: &str) -> Vec<NumberToken> {
    let mut tokens = Vec::new();

    for m in RUN_RE.find_iter(text) {
        let raw = m.as_str().trim_end_matches(['\'', '’']);
        let start = m.start();
        let end = start + raw.len();

        if glued_to_word(text, start, end) {
            continue;
        }
        if !GROUPED_RE.is_match(raw) {
            continue;
        }

        let clean = raw.replace(['\'', '’'], "");
        if let Ok(value) = Decimal::from_str(&clean) {
            tokens.push(NumberToken { value, start, end });
        }
    }

    tokens
}

/// True when the value is an exact multiple of 1000 (typical of nominal amounts).
pub fn is_round(value: &Decimal) -> bool {
    !value.is_zero() && (*value % Decimal::from(1000)).is_zero()
}

fn glued_to_word(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    before.is_some_and(|c| c.is_alphanumeric()) || after.is_some_and(|c| c.is_alphabetic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_grouped_values() {
        assert_eq!(parse_swiss_number("199'080"), dec!(199080));
        assert_eq!(parse_swiss_number("19'464'431"), dec!(19464431));
        assert_eq!(parse_swiss_number("1'234.56"), dec!(1234.56));
        assert_eq!(parse_swiss_number("850"), dec!(850));
    }

    #[test]
    fn test_parse_strips_apostrophes_for_any_grouping() {
        for s in ["1'000", "12'345'678", "999'999.99", "7", "42.10"] {
            let expected = Decimal::from_str(&s.replace('\'', "")).unwrap();
            assert_eq!(parse_swiss_number(s), expected, "input {}", s);
        }
    }

    #[test]
    fn test_parse_typographic_apostrophe() {
        assert_eq!(parse_swiss_number("1’486’950"), dec!(1486950));
    }

    #[test]
    fn test_parse_returns_zero_without_match() {
        assert_eq!(parse_swiss_number("no numbers here"), Decimal::ZERO);
        assert_eq!(parse_swiss_number(""), Decimal::ZERO);
    }

    #[test]
    fn test_parse_takes_first_token_in_context() {
        assert_eq!(parse_swiss_number("USD 200'000 then 199'080"), dec!(200000));
    }

    #[test]
    fn test_find_rejects_ungrouped_runs_and_isin_bodies() {
        let text = "ISIN: XS2530201644 // Valorn.: 125350273 value 199'080";
        let tokens = find_swiss_numbers(text);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].value, dec!(199080));
        assert_eq!(&text[tokens[0].start..tokens[0].end], "199'080");
    }

    #[test]
    fn test_find_skips_prices_with_four_decimals() {
        let tokens = find_swiss_numbers("99.5400 100.2000 199'080 1.02%");
        let values: Vec<Decimal> = tokens.iter().map(|t| t.value).collect();
        assert_eq!(values, vec![dec!(199080), dec!(1.02)]);
    }

    #[test]
    fn test_is_round() {
        assert!(is_round(&dec!(200000)));
        assert!(!is_round(&dec!(199080)));
        assert!(!is_round(&Decimal::ZERO));
    }
}
