use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::models::{Security, ValueSource};
use crate::swiss_number::find_swiss_numbers;

/// Hand-verified values for ISINs where the proximity heuristic is known to
/// pick the wrong number. Only meaningful for the document they were checked on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideTable {
    values: HashMap<String, Decimal>,
}

impl OverrideTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messos() -> Self {
        let mut table = Self::new();
        table.insert("XS2530201644", dec!(199080)); // Toronto Dominion
        table.insert("XS2588105036", dec!(200288)); // Canadian Imperial
        table
    }

    /// Load `{"ISIN": value, ...}`; values may be numbers or Swiss-format strings.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read override table {}", path.display()))?;
        Self::from_json_str(&content)
            .with_context(|| format!("Failed to parse override table {}", path.display()))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: HashMap<String, serde_json::Value> = serde_json::from_str(content)?;
        let mut table = Self::new();
        for (isin, value) in raw {
            let amount = match &value {
                serde_json::Value::String(s) => find_swiss_numbers(s)
                    .first()
                    .map(|t| t.value)
                    .ok_or_else(|| anyhow!("Invalid override value for {}: {:?}", isin, s))?,
                other => serde_json::from_value::<Decimal>(other.clone())
                    .with_context(|| format!("Invalid override value for {}", isin))?,
            };
            table.insert(&isin, amount);
        }
        Ok(table)
    }

    pub fn insert(&mut self, isin: &str, value: Decimal) {
        self.values.insert(isin.trim().to_uppercase(), value);
    }

    pub fn get(&self, isin: &str) -> Option<Decimal> {
        self.values.get(isin).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace values of listed ISINs. Returns how many records were touched.
    pub fn apply(&self, securities: &mut [Security]) -> usize {
        let mut applied = 0;
        for security in securities.iter_mut() {
            if let Some(value) = self.get(&security.isin) {
                if security.value != value {
                    info!(isin = %security.isin, from = %security.value, to = %value, "Applying value override");
                }
                security.value = value;
                security.confidence = 1.0;
                security.source = ValueSource::Override;
                security.needs_review = false;
                applied += 1;
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn security(isin: &str, value: Decimal) -> Security {
        Security {
            isin: isin.to_string(),
            name: None,
            value,
            currency: "USD".to_string(),
            confidence: 0.5,
            source: ValueSource::Heuristic,
            needs_review: true,
        }
    }

    #[test]
    fn test_apply_overrides_known_isins_only() {
        let mut securities = vec![
            security("XS2530201644", dec!(200000)),
            security("XS2692298537", dec!(1486950)),
        ];
        let applied = OverrideTable::messos().apply(&mut securities);

        assert_eq!(applied, 1);
        assert_eq!(securities[0].value, dec!(199080));
        assert_eq!(securities[0].source, ValueSource::Override);
        assert_eq!(securities[0].confidence, 1.0);
        assert!(!securities[0].needs_review);

        assert_eq!(securities[1].value, dec!(1486950));
        assert_eq!(securities[1].source, ValueSource::Heuristic);
        assert!(securities[1].needs_review);
    }

    #[test]
    fn test_from_json_accepts_numbers_and_strings() {
        let table = OverrideTable::from_json_str(
            r#"{"xs2530201644": 199080, "XS2588105036": "200'288"}"#,
        ).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("XS2530201644"), Some(dec!(199080)));
        assert_eq!(table.get("XS2588105036"), Some(dec!(200288)));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(OverrideTable::from_json_str("[1, 2]").is_err());
        assert!(OverrideTable::from_json_str(r#"{"XS2530201644": true}"#).is_err());
    }

    #[test]
    fn test_from_json_rejects_strings_without_amount() {
        assert!(OverrideTable::from_json_str(r#"{"XS2530201644": "n/a"}"#).is_err());
        assert!(OverrideTable::from_json_str(r#"{"XS2530201644": ""}"#).is_err());
    }
}
