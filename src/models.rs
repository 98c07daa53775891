use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::swiss_number::find_swiss_numbers;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    #[default]
    Heuristic,
    Override,
    Ai,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Security {
    #[serde(default)]
    pub isin: String,
    #[serde(default, alias = "securityName", alias = "description")]
    pub name: Option<String>,
    #[serde(default, alias = "marketValue", alias = "currentValue", alias = "market_value", alias = "current_value")]
    #[serde(serialize_with = "serialize_amount", deserialize_with = "deserialize_amount")]
    pub value: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub source: ValueSource,
    #[serde(default)]
    pub needs_review: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioInfo {
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub bank_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub valuation_date: Option<NaiveDate>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, alias = "portfolioTotal")]
    #[serde(serialize_with = "serialize_amount", deserialize_with = "deserialize_amount")]
    pub total_value: Decimal,
    /// Total printed on the statement itself, when one was found.
    #[serde(default, serialize_with = "serialize_optional_amount", deserialize_with = "deserialize_optional_amount")]
    pub stated_total: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllocationEntry {
    #[serde(alias = "assetClass", alias = "name")]
    pub category: String,
    #[serde(default, serialize_with = "serialize_amount", deserialize_with = "deserialize_amount")]
    pub value: Decimal,
    #[serde(default)]
    pub percentage: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    #[serde(default, alias = "ytd", alias = "ytdPercent")]
    pub ytd_return: Option<f64>,
    #[serde(default)]
    pub total_return: Option<f64>,
    #[serde(default)]
    pub period: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatementData {
    #[serde(default)]
    pub portfolio_info: PortfolioInfo,
    #[serde(default, alias = "securities")]
    pub holdings: Vec<Security>,
    #[serde(default)]
    pub asset_allocation: Vec<AllocationEntry>,
    #[serde(default)]
    pub performance: Option<Performance>,
}

impl StatementData {
    pub fn holdings_total(&self) -> Decimal {
        self.holdings.iter().map(|s| s.value).sum()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractionMethod {
    Heuristic,
    Claude { model: String },
    Mistral { model: String },
    OpenAi { model: String },
    AzureLayout { model_id: String },
}

impl ExtractionMethod {
    pub fn label(&self) -> &'static str {
        match self {
            ExtractionMethod::Heuristic => "heuristic",
            ExtractionMethod::Claude { .. } => "claude",
            ExtractionMethod::Mistral { .. } => "mistral",
            ExtractionMethod::OpenAi { .. } => "openai",
            ExtractionMethod::AzureLayout { .. } => "azure",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub securities: Vec<Security>,
    #[serde(serialize_with = "serialize_amount", deserialize_with = "deserialize_amount")]
    pub total_value: Decimal,
    #[serde(default, serialize_with = "serialize_optional_amount", deserialize_with = "deserialize_optional_amount")]
    pub expected_total: Option<Decimal>,
    /// Percentage in [0, 100]; `None` without an expected total.
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl ExtractionResult {
    pub fn new(securities: Vec<Security>, expected_total: Option<Decimal>) -> Self {
        let total_value: Decimal = securities.iter().map(|s| s.value).sum();
        let accuracy = expected_total.map(|expected| accuracy_percent(total_value, expected));
        Self { securities, total_value, expected_total, accuracy }
    }
}

/// `min / max * 100`, so over- and under-extraction are penalised alike.
pub fn accuracy_percent(total: Decimal, expected: Decimal) -> f64 {
    let (low, high) = if total < expected { (total, expected) } else { (expected, total) };
    if high.is_zero() || low < Decimal::ZERO {
        return 0.0;
    }
    ((low / high) * Decimal::from(100)).round_dp(2).to_f64().unwrap_or(0.0)
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_confidence() -> f64 {
    0.7
}

fn serialize_amount<S>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(value.round_dp(2).to_f64().unwrap_or(0.0))
}

fn serialize_optional_amount<S>(value: &Option<Decimal>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(v) => serialize_amount(v, serializer),
        None => serializer.serialize_none(),
    }
}

/// Accepts JSON numbers as well as strings like `"199'080"`, `"$1,234.50"` or `"USD 200'288"`.
fn deserialize_amount<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    amount_from_json(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_optional_amount<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => amount_from_json(&v).map(Some).map_err(serde::de::Error::custom),
    }
}

fn amount_from_json(raw: &serde_json::Value) -> Result<Decimal, String> {
    match raw {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Decimal::from(i))
            } else {
                n.as_f64()
                    .and_then(Decimal::from_f64)
                    .ok_or_else(|| format!("Invalid amount: {}", n))
            }
        }
        serde_json::Value::String(s) => {
            let clean = s.replace(',', "").replace('$', "");
            let clean = clean.trim();
            if clean.is_empty() {
                return Ok(Decimal::ZERO);
            }
            if let Ok(d) = Decimal::from_str(clean) {
                return Ok(d);
            }
            let token = find_swiss_numbers(clean)
                .into_iter()
                .next()
                .ok_or_else(|| format!("Invalid amount: {:?}", s))?;
            let negative = clean[..token.start].trim_end().ends_with('-');
            Ok(if negative { -token.value } else { token.value })
        }
        serde_json::Value::Null => Ok(Decimal::ZERO),
        other => Err(format!("Invalid amount: {}", other)),
    }
}

fn deserialize_optional_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    let Some(s) = s else {
        return Ok(None);
    };
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    // Swiss statements print DD.MM.YYYY, model replies usually ISO dates
    for fmt in ["%Y-%m-%d", "%d.%m.%Y", "%d/%m/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(Some(d));
        }
    }
    Ok(None)
}
