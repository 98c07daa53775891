use anyhow::{anyhow, Context, Result};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::ai::{AiConfig, ProviderSettings};
use crate::extractor::ExtractorConfig;
use crate::matcher::{MatcherConfig, SelectionPolicy, Window};
use crate::overrides::OverrideTable;

const DEFAULT_EXPECTED_TOTAL: i64 = 19_464_431;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub extractor: ExtractorConfig,
    pub ai: AiConfig,
    pub max_upload_bytes: usize,
    /// Accuracy percentage the local harness treats as a pass.
    pub success_threshold: f64,
    /// Include error chains in HTTP error bodies.
    pub expose_error_details: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = parse_or(&get, "MESSOS_SERVER_PORT", 8000u16)?;

        let expected_total = match get("MESSOS_EXPECTED_TOTAL") {
            Some(v) if v.eq_ignore_ascii_case("none") => None,
            Some(v) => Some(
                Decimal::from_str(&v.replace('\'', ""))
                    .with_context(|| format!("Invalid MESSOS_EXPECTED_TOTAL: {}", v))?,
            ),
            None => Some(Decimal::from(DEFAULT_EXPECTED_TOTAL)),
        };

        let defaults = MatcherConfig::default();
        let matcher = MatcherConfig {
            window: parse_or(&get, "MESSOS_WINDOW", defaults.window)?,
            min_value: parse_or(&get, "MESSOS_MIN_VALUE", defaults.min_value)?,
            max_value: parse_or(&get, "MESSOS_MAX_VALUE", defaults.max_value)?,
            policy: parse_or(&get, "MESSOS_SELECTION_POLICY", defaults.policy)?,
            clip_to_neighbours: parse_or(&get, "MESSOS_CLIP_TO_NEIGHBOURS", defaults.clip_to_neighbours)?,
        };
        if matcher.min_value >= matcher.max_value {
            return Err(anyhow!(
                "MESSOS_MIN_VALUE ({}) must be below MESSOS_MAX_VALUE ({})",
                matcher.min_value,
                matcher.max_value
            ));
        }

        let overrides = match get("MESSOS_OVERRIDES").as_deref() {
            None | Some("builtin") => OverrideTable::messos(),
            Some("none") => OverrideTable::new(),
            Some(path) => OverrideTable::from_json_file(path)?,
        };

        let extractor = ExtractorConfig {
            matcher,
            overrides,
            require_checksum: parse_or(&get, "MESSOS_REQUIRE_CHECKSUM", false)?,
            default_currency: get("MESSOS_DEFAULT_CURRENCY").unwrap_or_else(|| "USD".to_string()),
            review_threshold: parse_or(&get, "MESSOS_REVIEW_THRESHOLD", 0.6)?,
            expected_total,
        };

        let mut ai = AiConfig::default();
        apply_provider(&mut ai.claude, &get, "ANTHROPIC_API_KEY", "CLAUDE_MODEL", "ANTHROPIC_BASE_URL");
        apply_provider(&mut ai.mistral, &get, "MISTRAL_API_KEY", "MISTRAL_MODEL", "MISTRAL_BASE_URL");
        apply_provider(&mut ai.openai, &get, "OPENAI_API_KEY", "OPENAI_MODEL", "OPENAI_BASE_URL");
        ai.azure.endpoint = get("AZURE_DI_ENDPOINT");
        ai.azure.api_key = get("AZURE_DI_KEY");
        if let Some(model_id) = get("AZURE_DI_MODEL") {
            ai.azure.model_id = model_id;
        }

        let retry_delay_ms: u64 = parse_or(&get, "MESSOS_RETRY_DELAY_MS", 2000)?;
        ai.retry.delay = std::time::Duration::from_millis(retry_delay_ms);

        let max_upload_mb: usize = parse_or(&get, "MESSOS_MAX_UPLOAD_MB", 50)?;

        Ok(Config {
            port,
            extractor,
            ai,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            success_threshold: parse_or(&get, "MESSOS_SUCCESS_THRESHOLD", 95.0)?,
            expose_error_details: get("APP_ENV").is_some_and(|v| v == "development"),
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid {}='{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

fn apply_provider<G>(settings: &mut ProviderSettings, get: &G, key_var: &str, model_var: &str, url_var: &str)
where
    G: Fn(&str) -> Option<String>,
{
    settings.api_key = get(key_var);
    if let Some(model) = get(model_var) {
        settings.model = model;
    }
    if let Some(url) = get(url_var) {
        settings.base_url = url;
    }
}
