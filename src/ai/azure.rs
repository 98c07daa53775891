use base64::Engine as _;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::{classify_status, with_overload_retry, AiError, AzureSettings, RetryPolicy};

const PROVIDER: &str = "Azure";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationStatus {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    content: String,
}

pub async fn analyze_layout(
    client: &Client,
    settings: &AzureSettings,
    pdf: &[u8],
    retry: RetryPolicy,
) -> Result<String, AiError> {
    let endpoint = settings
        .endpoint
        .as_deref()
        .ok_or(AiError::MissingApiKey { provider: PROVIDER, env_var: "AZURE_DI_ENDPOINT" })?;
    let api_key = settings
        .api_key
        .as_deref()
        .ok_or(AiError::MissingApiKey { provider: PROVIDER, env_var: "AZURE_DI_KEY" })?;

    let url = format!(
        "{}/documentintelligence/documentModels/{}:analyze?api-version={}",
        endpoint.trim_end_matches('/'),
        settings.model_id,
        settings.api_version
    );
    let body = json!({ "base64Source": base64::engine::general_purpose::STANDARD.encode(pdf) });

    info!(model_id = %settings.model_id, pdf_bytes = pdf.len(), "Submitting statement to Azure");

    let (url, body) = (&url, &body);
    let operation_url = with_overload_retry(retry, move || async move {
        let response = client
            .post(url)
            .header(KEY_HEADER, api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AiError::network(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(PROVIDER, status.as_u16(), &text));
        }

        response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AiError::invalid(PROVIDER, "missing Operation-Location header"))
    })
    .await?;

    for poll in 1..=settings.max_polls {
        tokio::time::sleep(settings.poll_interval).await;

        let response = client
            .get(&operation_url)
            .header(KEY_HEADER, api_key)
            .send()
            .await
            .map_err(|e| AiError::network(PROVIDER, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(PROVIDER, status.as_u16(), &text));
        }

        let operation: OperationStatus = response
            .json()
            .await
            .map_err(|e| AiError::invalid(PROVIDER, e.to_string()))?;
        debug!(poll, status = %operation.status, "Azure operation status");

        match operation.status.as_str() {
            "succeeded" => {
                let content = operation.analyze_result.map(|r| r.content).unwrap_or_default();
                info!(chars = content.len(), polls = poll, "Azure layout analysis complete");
                return Ok(content);
            }
            "failed" | "canceled" => {
                let detail = operation.error.map(|e| e.to_string()).unwrap_or_default();
                return Err(AiError::invalid(PROVIDER, format!("analysis {}: {}", operation.status, detail)));
            }
            _ => {}
        }
    }

    Err(AiError::invalid(
        PROVIDER,
        format!("analysis not finished after {} polls", settings.max_polls),
    ))
}
