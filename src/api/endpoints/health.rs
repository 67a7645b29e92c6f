//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::api::types::ApiContext;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub ocr_backend: &'static str,
    pub pdf_renderer: bool,
    pub models_loaded: Vec<String>,
    pub dictionary_version: u32,
    pub uptime_secs: u64,
}

/// `GET /health`: liveness plus which optional backends are present.
pub async fn check(State(ctx): State<ApiContext>) -> Json<HealthResponse> {
    let core = &ctx.core;
    Json(HealthResponse {
        status: "ok",
        version: crate::config::APP_VERSION,
        ocr_backend: core.document_extractor().ocr_backend(),
        pdf_renderer: core.document_extractor().has_pdf_renderer(),
        models_loaded: core.assessor().registry().names(),
        dictionary_version: core.dictionary().version,
        uptime_secs: core.uptime_secs(),
    })
}
