//! API error types with structured JSON responses.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::extraction::ExtractionError;

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Upload exceeds the size limit")]
    PayloadTooLarge,
    #[error("Unsupported file: {0}")]
    UnsupportedMedia(String),
    #[error("Unreadable document: {0}")]
    Unprocessable(String),
    #[error("OCR unavailable: {0}")]
    OcrUnavailable(String),
    #[error("Processing exceeded {secs}s")]
    Timeout { secs: u64 },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                detail.clone(),
            ),
            ApiError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "PAYLOAD_TOO_LARGE",
                "The uploaded file is too large".to_string(),
            ),
            ApiError::UnsupportedMedia(detail) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_FORMAT",
                detail.clone(),
            ),
            ApiError::Unprocessable(detail) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNREADABLE_DOCUMENT",
                detail.clone(),
            ),
            ApiError::OcrUnavailable(detail) => {
                tracing::warn!(detail, "OCR backend unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "OCR_UNAVAILABLE",
                    "Text recognition is not available on this server".to_string(),
                )
            }
            ApiError::Timeout { secs } => (
                StatusCode::GATEWAY_TIMEOUT,
                "PROCESSING_TIMEOUT",
                format!("Processing did not finish within {secs}s"),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        match err {
            ExtractionError::UnsupportedFormat(detail) => ApiError::UnsupportedMedia(detail),
            ExtractionError::EmptyDocument => ApiError::BadRequest(err.to_string()),
            ExtractionError::OcrUnavailable(detail) => ApiError::OcrUnavailable(detail),
            ExtractionError::Io(e) => ApiError::Internal(e.to_string()),
            ExtractionError::PdfParsing(_)
            | ExtractionError::PdfRendering { .. }
            | ExtractionError::PdfEncrypted
            | ExtractionError::ImageProcessing(_)
            | ExtractionError::OcrProcessing(_)
            | ExtractionError::EncodingError(_) => ApiError::Unprocessable(err.to_string()),
        }
    }
}

fn from_status(status: StatusCode, text: String) -> ApiError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge
    } else {
        ApiError::BadRequest(text)
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        from_status(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        from_status(err.status(), err.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        from_status(rejection.status(), rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn bad_request_returns_400() {
        let response = ApiError::BadRequest("No file part".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "BAD_REQUEST");
        assert_eq!(json["error"]["message"], "No file part");
    }

    #[tokio::test]
    async fn too_large_returns_413() {
        let response = ApiError::PayloadTooLarge.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn unsupported_format_maps_to_415() {
        let api_err: ApiError = ExtractionError::UnsupportedFormat("extension docx".into()).into();
        let response = api_err.into_response();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "UNSUPPORTED_FORMAT");
    }

    #[tokio::test]
    async fn unreadable_documents_map_to_422() {
        for err in [
            ExtractionError::PdfEncrypted,
            ExtractionError::PdfParsing("bad xref".into()),
            ExtractionError::EncodingError("not utf-8".into()),
        ] {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        }
    }

    #[tokio::test]
    async fn ocr_unavailable_returns_503() {
        let api_err: ApiError = ExtractionError::OcrUnavailable("tesseract not found".into()).into();
        let response = api_err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "OCR_UNAVAILABLE");
    }

    #[tokio::test]
    async fn timeout_returns_504() {
        let response = ApiError::Timeout { secs: 60 }.into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "PROCESSING_TIMEOUT");
    }

    #[tokio::test]
    async fn internal_returns_500() {
        let response = ApiError::Internal("worker panicked".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        // Internal errors hide details from client
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[tokio::test]
    async fn empty_document_is_bad_request() {
        let response = ApiError::from(ExtractionError::EmptyDocument).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
