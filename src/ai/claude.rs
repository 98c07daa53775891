use base64::Engine as _;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    classify_status, parse_statement_reply, with_overload_retry, AiError, ProviderSettings,
    RetryPolicy, EXTRACTION_PROMPT,
};
use crate::models::StatementData;

const PROVIDER: &str = "Claude";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

#[derive(Serialize)]
pub struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Document { source: DocumentSource },
    Text { text: String },
}

#[derive(Serialize)]
struct DocumentSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseContent>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ResponseContent {
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

pub fn build_request(model: &str, pdf: &[u8]) -> MessagesRequest {
    MessagesRequest {
        model: model.to_string(),
        max_tokens: MAX_TOKENS,
        messages: vec![Message {
            role: "user".to_string(),
            content: vec![
                ContentBlock::Document {
                    source: DocumentSource {
                        source_type: "base64".to_string(),
                        media_type: "application/pdf".to_string(),
                        data: base64::engine::general_purpose::STANDARD.encode(pdf),
                    },
                },
                ContentBlock::Text { text: EXTRACTION_PROMPT.to_string() },
            ],
        }],
    }
}

pub async fn extract(
    client: &Client,
    settings: &ProviderSettings,
    pdf: &[u8],
    retry: RetryPolicy,
) -> Result<StatementData, AiError> {
    let api_key = settings
        .api_key
        .as_deref()
        .ok_or(AiError::MissingApiKey { provider: PROVIDER, env_var: "ANTHROPIC_API_KEY" })?;
    let url = format!("{}/v1/messages", settings.base_url.trim_end_matches('/'));
    let request = build_request(&settings.model, pdf);

    info!(model = %settings.model, pdf_bytes = pdf.len(), "Sending statement to Claude");

    let (url, request) = (&url, &request);
    let reply = with_overload_retry(retry, move || async move {
        let response = client
            .post(url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(request)
            .send()
            .await
            .map_err(|e| AiError::network(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(PROVIDER, status.as_u16(), &body));
        }

        response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| AiError::invalid(PROVIDER, e.to_string()))
    })
    .await?;

    if let Some(usage) = &reply.usage {
        info!(input_tokens = usage.input_tokens, output_tokens = usage.output_tokens, "Claude usage");
    }

    let text: String = reply
        .content
        .iter()
        .filter_map(|c| c.text.as_deref())
        .collect::<Vec<_>>()
        .join("\n");

    parse_statement_reply(PROVIDER, &text)
}
