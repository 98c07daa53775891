pub mod azure;
pub mod claude;
pub mod openai_compat;

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::extractor::Extractor;
use crate::models::{ExtractionMethod, StatementData, ValueSource};
use crate::security_parser::split_name_and_isin;

pub const EXTRACTION_PROMPT: &str = r#"You are extracting holdings from a Swiss private bank portfolio statement.
Numbers use an apostrophe as thousands separator (199'080 means 199080).
For every security with an ISIN, report its current market value, not its nominal amount.

Return ONLY valid JSON matching this schema:
{
  "portfolioInfo": {
    "clientName": "string or null",
    "bankName": "string or null",
    "valuationDate": "YYYY-MM-DD or null",
    "currency": "string",
    "totalValue": number
  },
  "holdings": [
    {
      "isin": "12 character ISIN",
      "name": "string or null",
      "value": number,
      "currency": "string",
      "confidence": number between 0 and 1
    }
  ],
  "assetAllocation": [
    { "category": "string", "value": number, "percentage": number }
  ],
  "performance": { "ytdReturn": number or null, "totalReturn": number or null, "period": "string or null" }
}

Use null for anything you cannot determine. No markdown fences, no commentary."#;

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("{provider} is not configured: set {env_var}")]
    MissingApiKey { provider: &'static str, env_var: &'static str },

    #[error("{provider} is overloaded: {message}")]
    Overloaded { provider: &'static str, message: String },

    #[error("{provider} API error {status}: {body}")]
    Http { provider: &'static str, status: u16, body: String },

    #[error("{provider} request failed: {message}")]
    Network { provider: &'static str, message: String },

    #[error("{provider} returned an unusable response: {message}")]
    InvalidResponse { provider: &'static str, message: String },

    #[error("{provider} needs extractable PDF text")]
    TextRequired { provider: &'static str },
}

impl AiError {
    pub fn network(provider: &'static str, err: reqwest::Error) -> Self {
        AiError::Network { provider, message: err.to_string() }
    }

    pub fn invalid(provider: &'static str, message: impl Into<String>) -> Self {
        AiError::InvalidResponse { provider, message: message.into() }
    }

    pub fn is_overloaded(&self) -> bool {
        matches!(self, AiError::Overloaded { .. })
    }
}

/// Map a non-success HTTP status to an error. 529 (Anthropic), 503 and any
/// body mentioning an overload count as overloaded.
pub fn classify_status(provider: &'static str, status: u16, body: &str) -> AiError {
    let lower = body.to_lowercase();
    if status == 529 || status == 503 || lower.contains("overloaded") {
        return AiError::Overloaded {
            provider,
            message: format!("HTTP {}", status),
        };
    }
    let body = if body.len() > 500 {
        let mut cut = 500;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        &body[..cut]
    } else {
        body
    };
    AiError::Http { provider, status, body: body.to_string() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Claude,
    Mistral,
    OpenAi,
    Azure,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "mistral" => Ok(ProviderKind::Mistral),
            "openai" | "gpt" => Ok(ProviderKind::OpenAi),
            "azure" => Ok(ProviderKind::Azure),
            other => Err(format!("Unknown provider: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, delay: Duration::from_secs(2) }
    }
}

pub async fn with_overload_retry<T, F, Fut>(policy: RetryPolicy, mut call: F) -> Result<T, AiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AiError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Err(e) if e.is_overloaded() && attempt < policy.max_attempts => {
                warn!(attempt, max_attempts = policy.max_attempts, error = %e, "Provider overloaded, retrying");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model_id: String,
    pub api_version: String,
    pub poll_interval: Duration,
    pub max_polls: u32,
}

#[derive(Debug, Clone)]
pub struct AiConfig {
    pub claude: ProviderSettings,
    pub mistral: ProviderSettings,
    pub openai: ProviderSettings,
    pub azure: AzureSettings,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            claude: ProviderSettings {
                api_key: None,
                model: "claude-3-5-sonnet-20241022".to_string(),
                base_url: "https://api.anthropic.com".to_string(),
            },
            mistral: ProviderSettings {
                api_key: None,
                model: "mistral-large-latest".to_string(),
                base_url: "https://api.mistral.ai/v1".to_string(),
            },
            openai: ProviderSettings {
                api_key: None,
                model: "gpt-4o".to_string(),
                base_url: "https://api.openai.com/v1".to_string(),
            },
            azure: AzureSettings {
                endpoint: None,
                api_key: None,
                model_id: "prebuilt-layout".to_string(),
                api_version: "2024-11-30".to_string(),
                poll_interval: Duration::from_secs(1),
                max_polls: 60,
            },
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

pub struct AiClient {
    http: reqwest::Client,
    config: AiConfig,
}

impl AiClient {
    pub fn new(config: AiConfig) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AiError::network("http", e))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AiConfig {
        &self.config
    }

    pub async fn extract(
        &self,
        kind: ProviderKind,
        pdf: &[u8],
        text: Option<&str>,
        extractor: &Extractor,
    ) -> Result<(StatementData, ExtractionMethod), AiError> {
        let retry = self.config.retry;
        match kind {
            ProviderKind::Claude => {
                let settings = &self.config.claude;
                let data = claude::extract(&self.http, settings, pdf, retry).await?;
                Ok((data, ExtractionMethod::Claude { model: settings.model.clone() }))
            }
            ProviderKind::Mistral => {
                let settings = &self.config.mistral;
                let text = text.ok_or(AiError::TextRequired { provider: "Mistral" })?;
                let data = openai_compat::extract(&self.http, "Mistral", "MISTRAL_API_KEY", settings, text, retry).await?;
                Ok((data, ExtractionMethod::Mistral { model: settings.model.clone() }))
            }
            ProviderKind::OpenAi => {
                let settings = &self.config.openai;
                let text = text.ok_or(AiError::TextRequired { provider: "OpenAI" })?;
                let data = openai_compat::extract(&self.http, "OpenAI", "OPENAI_API_KEY", settings, text, retry).await?;
                Ok((data, ExtractionMethod::OpenAi { model: settings.model.clone() }))
            }
            ProviderKind::Azure => {
                let settings = &self.config.azure;
                let content = azure::analyze_layout(&self.http, settings, pdf, retry).await?;
                Ok((
                    extractor.extract_text(&content),
                    ExtractionMethod::AzureLayout { model_id: settings.model_id.clone() },
                ))
            }
        }
    }
}

/// Decode a model reply into the canonical statement shape. Markdown fences and
/// text around the outermost JSON object are tolerated.
pub fn parse_statement_reply(provider: &'static str, content: &str) -> Result<StatementData, AiError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let start = trimmed.find('{').ok_or_else(|| AiError::invalid(provider, "no JSON object in reply"))?;
    let end = trimmed.rfind('}').ok_or_else(|| AiError::invalid(provider, "no JSON object in reply"))?;
    if end <= start {
        return Err(AiError::invalid(provider, "malformed JSON in reply"));
    }

    let mut data: StatementData = serde_json::from_str(&trimmed[start..=end])
        .map_err(|e| AiError::invalid(provider, format!("failed to parse statement JSON: {}", e)))?;

    for holding in &mut data.holdings {
        // Models sometimes return the whole "Name / ISIN XX..." cell as the name.
        if holding.isin.trim().is_empty() {
            if let Some(name) = holding.name.take() {
                let (name, isin) = split_name_and_isin(&name);
                holding.name = Some(name);
                holding.isin = isin.unwrap_or_default();
            }
        }
        holding.isin = holding.isin.trim().to_uppercase();
        holding.source = ValueSource::Ai;
    }
    data.holdings.retain(|h| !h.isin.is_empty());
    if data.portfolio_info.total_value.is_zero() {
        data.portfolio_info.total_value = data.holdings_total();
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, delay: Duration::ZERO }
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status("Claude", 529, "").is_overloaded());
        assert!(classify_status("Claude", 500, r#"{"type":"overloaded_error"}"#).is_overloaded());
        assert!(matches!(
            classify_status("OpenAI", 401, "bad key"),
            AiError::Http { status: 401, .. }
        ));
    }

    #[tokio::test]
    async fn test_retry_stops_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), AiError> = with_overload_retry(fast_retry(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AiError::Overloaded { provider: "Claude", message: "HTTP 529".to_string() })
        }).await;

        assert!(result.unwrap_err().is_overloaded());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_other_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), AiError> = with_overload_retry(fast_retry(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AiError::invalid("Claude", "bad json"))
        }).await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_overload() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = with_overload_retry(fast_retry(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AiError::Overloaded { provider: "Claude", message: "HTTP 529".to_string() })
            } else {
                Ok(42)
            }
        }).await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_parse_reply_with_fences_and_chatter() {
        let reply = "Here is the data:\n```json\n{\"holdings\": [{\"isin\": \"xs2530201644\", \"marketValue\": \"199'080\"}]}\n```";
        let data = parse_statement_reply("Claude", reply).unwrap();
        assert_eq!(data.holdings[0].isin, "XS2530201644");
        assert_eq!(data.holdings[0].value, dec!(199080));
        assert_eq!(data.holdings[0].source, ValueSource::Ai);
        assert_eq!(data.portfolio_info.total_value, dec!(199080));
    }

    #[test]
    fn test_parse_reply_splits_combined_name_cell() {
        let reply = r#"{"holdings": [
            {"name": "NATWEST GROUP PLC NOTES / ISIN: XS2993414619", "value": 98250},
            {"name": "Cash account", "value": 5000}
        ]}"#;
        let data = parse_statement_reply("Mistral", reply).unwrap();
        assert_eq!(data.holdings.len(), 1);
        assert_eq!(data.holdings[0].isin, "XS2993414619");
        assert_eq!(data.holdings[0].name.as_deref(), Some("NATWEST GROUP PLC NOTES"));
    }

    #[test]
    fn test_parse_reply_without_json() {
        assert!(matches!(
            parse_statement_reply("OpenAI", "I cannot read this document."),
            Err(AiError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!("Claude".parse::<ProviderKind>(), Ok(ProviderKind::Claude));
        assert_eq!("openai".parse::<ProviderKind>(), Ok(ProviderKind::OpenAi));
        assert!("gemini".parse::<ProviderKind>().is_err());
    }
}
