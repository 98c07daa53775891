use rust_decimal_macros::dec;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use messos_pdf_server_rs::ai::{AiClient, AiConfig, AiError, ProviderKind, RetryPolicy};
use messos_pdf_server_rs::extractor::{Extractor, ExtractorConfig};
use messos_pdf_server_rs::models::{ExtractionMethod, ValueSource};
use messos_pdf_server_rs::overrides::OverrideTable;

const TWO_BONDS: &str = "USD 200'000 TORONTO DOMINION BANK NOTES\n\
ISIN: XS2530201644 // Valorn.: 125350273\n\
99.5400 100.2000 199'080 1.02%\n\
USD 200'000 CANADIAN IMPERIAL BANK OF COMMERCE NOTES\n\
ISIN: XS2588105036 // Valorn.: 128027393\n\
100.1000 100.1440 200'288 1.03%\n";

const MODEL_REPLY: &str = "```json\n{\"portfolioInfo\": {\"currency\": \"USD\"}, \
\"holdings\": [{\"isin\": \"xs2530201644\", \"name\": \"TORONTO DOMINION BANK NOTES\", \"value\": \"199'080\"}, \
{\"isin\": \"XS2588105036\", \"marketValue\": 200288}]}\n```";

fn client_for(server: &MockServer) -> AiClient {
    let mut config = AiConfig::default();
    config.retry = RetryPolicy { max_attempts: 3, delay: Duration::ZERO };
    config.claude.api_key = Some("sk-ant-test".to_string());
    config.claude.base_url = server.uri();
    config.mistral.api_key = Some("mistral-test".to_string());
    config.mistral.base_url = server.uri();
    config.azure.endpoint = Some(server.uri());
    config.azure.api_key = Some("azure-test".to_string());
    config.azure.poll_interval = Duration::ZERO;
    AiClient::new(config).unwrap()
}

fn extractor() -> Extractor {
    Extractor::new(ExtractorConfig {
        overrides: OverrideTable::new(),
        expected_total: None,
        ..Default::default()
    })
}

fn claude_reply() -> serde_json::Value {
    json!({
        "content": [{ "type": "text", "text": MODEL_REPLY }],
        "usage": { "input_tokens": 1200, "output_tokens": 150 }
    })
}

#[tokio::test]
async fn test_claude_retries_on_overload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_string("Overloaded"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "sk-ant-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(claude_reply()))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let (data, method) = client
        .extract(ProviderKind::Claude, b"%PDF-1.4", None, &extractor())
        .await
        .unwrap();

    assert!(matches!(method, ExtractionMethod::Claude { .. }));
    assert_eq!(data.holdings.len(), 2);
    assert_eq!(data.holdings[0].isin, "XS2530201644");
    assert_eq!(data.holdings[0].value, dec!(199080));
    assert_eq!(data.holdings[1].value, dec!(200288));
    assert!(data.holdings.iter().all(|s| s.source == ValueSource::Ai));
    assert_eq!(data.portfolio_info.total_value, dec!(399368));
}

#[tokio::test]
async fn test_claude_gives_up_after_three_overloads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_string("Overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .extract(ProviderKind::Claude, b"%PDF-1.4", None, &extractor())
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::Overloaded { provider: "Claude", .. }));
}

#[tokio::test]
async fn test_other_http_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_string("invalid request"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server)
        .extract(ProviderKind::Claude, b"%PDF-1.4", None, &extractor())
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::Http { status: 400, .. }));
}

#[tokio::test]
async fn test_mistral_chat_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer mistral-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": MODEL_REPLY } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (data, method) = client_for(&server)
        .extract(ProviderKind::Mistral, b"%PDF-1.4", Some(TWO_BONDS), &extractor())
        .await
        .unwrap();
    assert!(matches!(method, ExtractionMethod::Mistral { .. }));
    assert_eq!(data.holdings_total(), dec!(399368));
}

#[tokio::test]
async fn test_text_providers_need_text() {
    let server = MockServer::start().await;
    let err = client_for(&server)
        .extract(ProviderKind::Mistral, b"%PDF-1.4", None, &extractor())
        .await
        .unwrap_err();
    assert!(matches!(err, AiError::TextRequired { .. }));
}

#[tokio::test]
async fn test_azure_layout_then_heuristic() {
    let server = MockServer::start().await;
    let operation_url = format!("{}/operations/42", server.uri());

    Mock::given(method("POST"))
        .and(path("/documentintelligence/documentModels/prebuilt-layout:analyze"))
        .and(header("Ocp-Apim-Subscription-Key", "azure-test"))
        .respond_with(ResponseTemplate::new(202).insert_header("operation-location", operation_url.as_str()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "running" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/operations/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "succeeded",
            "analyzeResult": { "content": TWO_BONDS }
        })))
        .mount(&server)
        .await;

    let (data, method) = client_for(&server)
        .extract(ProviderKind::Azure, b"%PDF-1.4", None, &extractor())
        .await
        .unwrap();

    assert!(matches!(method, ExtractionMethod::AzureLayout { .. }));
    let values: Vec<_> = data.holdings.iter().map(|s| s.value).collect();
    assert_eq!(values, vec![dec!(199080), dec!(200288)]);
    assert!(data.holdings.iter().all(|s| s.source == ValueSource::Heuristic));
}
