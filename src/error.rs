use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use crate::ai::AiError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("No PDF file provided. Send a multipart 'pdf' field or JSON with 'pdfBase64'.")]
    MissingFile,

    #[error("{0}")]
    BadRequest(String),

    #[error("Method not allowed. Use POST.")]
    MethodNotAllowed,

    #[error("The PDF has no extractable text (scanned document). Use the claude or azure provider.")]
    ScannedPdf,

    #[error(transparent)]
    Provider(#[from] AiError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MissingFile | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::ScannedPdf => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Provider(AiError::Overloaded { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Provider(AiError::TextRequired { .. }) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Provider(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Render the JSON error body; the full error chain is only included when
    /// `expose_details` is set.
    pub fn into_response_with(self, expose_details: bool) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = ?self, "Request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let details = expose_details.then(|| match &self {
            AppError::Internal(e) => format!("{:?}", e),
            other => format!("{:?}", other),
        });
        let body = ErrorBody { success: false, error: self.to_string(), details };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.into_response_with(false)
    }
}
