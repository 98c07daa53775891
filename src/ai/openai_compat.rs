use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    classify_status, parse_statement_reply, with_overload_retry, AiError, ProviderSettings,
    RetryPolicy, EXTRACTION_PROMPT,
};
use crate::models::StatementData;

/// Statement text beyond this is cut to stay inside model context limits.
const MAX_TEXT_CHARS: usize = 60_000;

#[derive(Debug, Serialize)]
pub struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub fn build_request(model: &str, text: &str) -> ChatRequest {
    let text = truncate_chars(text, MAX_TEXT_CHARS);
    ChatRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage { role: "system".to_string(), content: EXTRACTION_PROMPT.to_string() },
            ChatMessage {
                role: "user".to_string(),
                content: format!("Extract the portfolio from this statement text:\n\n{text}"),
            },
        ],
        temperature: 0.0,
    }
}

pub async fn extract(
    client: &Client,
    provider: &'static str,
    env_var: &'static str,
    settings: &ProviderSettings,
    text: &str,
    retry: RetryPolicy,
) -> Result<StatementData, AiError> {
    let api_key = settings
        .api_key
        .as_deref()
        .ok_or(AiError::MissingApiKey { provider, env_var })?;
    let url = format!("{}/chat/completions", settings.base_url.trim_end_matches('/'));
    let request = build_request(&settings.model, text);

    info!(provider, model = %settings.model, chars = text.len(), "Sending statement text");

    let (url, request) = (&url, &request);
    let reply = with_overload_retry(retry, move || async move {
        let response = client
            .post(url)
            .bearer_auth(api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| AiError::network(provider, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(provider, status.as_u16(), &body));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| AiError::invalid(provider, e.to_string()))
    })
    .await?;

    let content = reply
        .choices
        .first()
        .map(|c| c.message.content.as_str())
        .ok_or_else(|| AiError::invalid(provider, "empty choices"))?;

    parse_statement_reply(provider, content)
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = build_request("mistral-large-latest", "ISIN: XS2530201644 199'080");
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert!(json["messages"][1]["content"].as_str().unwrap().ends_with("199'080"));
        assert_eq!(json["temperature"], 0.0);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("1’486’950", 2), "1’");
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
