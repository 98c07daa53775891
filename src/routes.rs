use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use anyhow::anyhow;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::ai::{AiClient, ProviderKind};
use crate::config::Config;
use crate::error::AppError;
use crate::extractor::Extractor;
use crate::models::{ExtractionMethod, ExtractionResult, StatementData};
use crate::pdf::{extract_text_from_pdf, PdfContent};

pub struct AppState {
    pub config: Config,
    pub extractor: Extractor,
    pub ai: AiClient,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let extractor = Extractor::new(config.extractor.clone());
        let ai = AiClient::new(config.ai.clone())?;
        Ok(Self { config, extractor, ai })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/extract",
            post(extract_handler)
                .options(preflight_handler)
                .fallback(method_not_allowed_handler),
        )
        .route(
            "/api/extract/{provider}",
            post(extract_with_provider_handler)
                .options(preflight_handler)
                .fallback(method_not_allowed_handler),
        )
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResponse {
    pub success: bool,
    pub data: StatementData,
    pub metadata: ResponseMetadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    pub method: ExtractionMethod,
    pub filename: String,
    pub file_size: usize,
    pub processing_time_ms: u64,
    pub securities_found: usize,
    pub needs_review: usize,
    pub total_value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub extracted_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadJson {
    #[serde(default, alias = "pdf", alias = "file")]
    pdf_base64: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

struct UploadedPdf {
    filename: String,
    bytes: Bytes,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ai = state.ai.config();
    Json(serde_json::json!({
        "success": true,
        "status": "ok",
        "providers": {
            "claude": ai.claude.api_key.is_some(),
            "mistral": ai.mistral.api_key.is_some(),
            "openai": ai.openai.api_key.is_some(),
            "azure": ai.azure.endpoint.is_some() && ai.azure.api_key.is_some(),
        }
    }))
}

async fn preflight_handler() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed_handler() -> AppError {
    AppError::MethodNotAllowed
}

type Extraction = (UploadedPdf, StatementData, ExtractionMethod);

async fn extract_handler(State(state): State<Arc<AppState>>, req: Request) -> Response {
    info!("Endpoint /api/extract called");
    let started = Instant::now();
    let outcome = run_heuristic(&state, req).await;
    respond(&state, outcome, started)
}

async fn extract_with_provider_handler(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    req: Request,
) -> Response {
    info!(provider = %provider, "Endpoint /api/extract/{{provider}} called");
    let started = Instant::now();
    let outcome = run_provider(&state, &provider, req).await;
    respond(&state, outcome, started)
}

async fn run_heuristic(state: &AppState, req: Request) -> Result<Extraction, AppError> {
    let upload = read_upload(req).await?;
    let text = match pdf_text(upload.bytes.clone()).await? {
        PdfContent::Text(text) => text,
        PdfContent::ScannedImage => return Err(AppError::ScannedPdf),
        PdfContent::Invalid(e) => return Err(AppError::BadRequest(e)),
        PdfContent::ExtractionFailed(e) => return Err(AppError::Internal(anyhow!(e))),
    };
    let data = state.extractor.extract_text(&text);
    Ok((upload, data, ExtractionMethod::Heuristic))
}

async fn run_provider(state: &AppState, provider: &str, req: Request) -> Result<Extraction, AppError> {
    let kind: ProviderKind = provider.parse().map_err(AppError::BadRequest)?;
    let upload = read_upload(req).await?;

    // Claude and Azure read the PDF themselves; local text is optional for them.
    let pdf_capable = matches!(kind, ProviderKind::Claude | ProviderKind::Azure)
        && upload.bytes.starts_with(b"%PDF");
    let text = match pdf_text(upload.bytes.clone()).await? {
        PdfContent::Text(text) => Some(text),
        PdfContent::ScannedImage => None,
        PdfContent::Invalid(e) | PdfContent::ExtractionFailed(e) if pdf_capable => {
            warn!(error = %e, "Local text extraction failed, sending PDF as-is");
            None
        }
        PdfContent::Invalid(e) => return Err(AppError::BadRequest(e)),
        PdfContent::ExtractionFailed(e) => return Err(AppError::Internal(anyhow!(e))),
    };

    let (mut data, method) = state
        .ai
        .extract(kind, &upload.bytes, text.as_deref(), &state.extractor)
        .await?;

    let threshold = state.extractor.config().review_threshold;
    for holding in &mut data.holdings {
        holding.needs_review = holding.needs_review || holding.confidence < threshold;
    }
    Ok((upload, data, method))
}

fn respond(
    state: &AppState,
    outcome: Result<Extraction, AppError>,
    started: Instant,
) -> Response {
    let (upload, data, method) = match outcome {
        Ok(v) => v,
        Err(e) => return e.into_response_with(state.config.expose_error_details),
    };

    let result: ExtractionResult = state.extractor.score(&data);
    let metadata = ResponseMetadata {
        method,
        filename: upload.filename,
        file_size: upload.bytes.len(),
        processing_time_ms: started.elapsed().as_millis() as u64,
        securities_found: data.holdings.len(),
        needs_review: data.holdings.iter().filter(|s| s.needs_review).count(),
        total_value: result.total_value.round_dp(2).to_f64().unwrap_or(0.0),
        expected_total: result.expected_total.and_then(|d| d.to_f64()),
        accuracy: result.accuracy,
        extracted_at: Utc::now(),
    };

    info!(
        method = metadata.method.label(),
        securities = metadata.securities_found,
        total_value = metadata.total_value,
        accuracy = ?metadata.accuracy,
        elapsed_ms = metadata.processing_time_ms,
        "Extraction finished"
    );

    (StatusCode::OK, Json(ExtractionResponse { success: true, data, metadata })).into_response()
}

async fn read_upload(req: Request) -> Result<UploadedPdf, AppError> {
    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase();

    let upload = if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?;

        let mut found = None;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
        {
            if field.name() != Some("pdf") {
                continue;
            }
            let filename = field.file_name().unwrap_or("upload.pdf").to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("Failed to read upload: {}", e)))?;
            found = Some(UploadedPdf { filename, bytes });
            break;
        }
        found.ok_or(AppError::MissingFile)?
    } else if content_type.starts_with("application/json") {
        let Json(body) = Json::<UploadJson>::from_request(req, &())
            .await
            .map_err(|e| AppError::BadRequest(format!("Invalid JSON body: {}", e)))?;
        let encoded = body.pdf_base64.ok_or(AppError::MissingFile)?;
        UploadedPdf {
            filename: body.filename.unwrap_or_else(|| "upload.pdf".to_string()),
            bytes: Bytes::from(decode_base64_pdf(&encoded)?),
        }
    } else {
        return Err(AppError::MissingFile);
    };

    if upload.bytes.is_empty() {
        return Err(AppError::MissingFile);
    }
    info!(filename = %upload.filename, bytes = upload.bytes.len(), "Received PDF upload");
    Ok(upload)
}

async fn pdf_text(bytes: Bytes) -> Result<PdfContent, AppError> {
    tokio::task::spawn_blocking(move || extract_text_from_pdf(&bytes))
        .await
        .map_err(|e| AppError::Internal(anyhow!("PDF text extraction task failed: {}", e)))
}

/// Accepts bare base64 or a `data:application/pdf;base64,` URL.
fn decode_base64_pdf(encoded: &str) -> Result<Vec<u8>, AppError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| AppError::BadRequest(format!("Invalid base64 PDF: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_base64_variants() {
        assert_eq!(decode_base64_pdf("JVBERi0xLjQ=").unwrap(), b"%PDF-1.4");
        assert_eq!(
            decode_base64_pdf("data:application/pdf;base64,JVBERi0x\nLjQ=").unwrap(),
            b"%PDF-1.4"
        );
        assert!(decode_base64_pdf("not base64 !!").is_err());
    }
}
