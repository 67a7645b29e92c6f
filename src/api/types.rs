//! Shared types for the HTTP layer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Multipart;
use serde::Serialize;

use crate::api::error::ApiError;
use crate::core_state::{CoreState, UploadExtraction};
use crate::pipeline::extraction::{sanitize_filename, ExtractionMethod, ExtractionWarning};
use crate::pipeline::fields::{LabValue, SourceKind};
use crate::pipeline::risk::RiskReport;

/// Multipart field carrying the uploaded document.
pub const UPLOAD_FIELD: &str = "file";

/// Shared context for all routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }

    /// Run pipeline work on the blocking pool, bounded by the configured
    /// processing timeout.
    ///
    /// On expiry the request fails with `Timeout`. The blocking task is not
    /// cancelled and finishes in the background; its result is dropped.
    pub async fn run_blocking<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&CoreState) -> Result<T, ApiError> + Send + 'static,
    {
        let secs = self.core.config().server.processing_timeout_secs;
        let core = self.core.clone();
        let span = tracing::Span::current();
        let task = tokio::task::spawn_blocking(move || {
            let _entered = span.entered();
            work(&core)
        });

        match tokio::time::timeout(Duration::from_secs(secs), task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(ApiError::Internal(format!("processing task failed: {e}"))),
            Err(_) => {
                tracing::warn!(timeout_secs = secs, "Request processing timed out");
                Err(ApiError::Timeout { secs })
            }
        }
    }
}

/// One uploaded document, held in memory for the request only.
#[derive(Debug)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Pull the `file` part out of a multipart body.
///
/// Other parts are skipped. A missing part or an empty filename is a bad
/// request, as in a browser form submitted without choosing a file.
pub async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .filter(|name| !name.trim().is_empty())
            .map(sanitize_filename)
            .ok_or_else(|| ApiError::BadRequest("No selected file".into()))?;
        let bytes = field.bytes().await?;
        return Ok(Upload {
            filename,
            bytes: bytes.to_vec(),
        });
    }
    Err(ApiError::BadRequest("No file part".into()))
}

/// Body of `POST /extract`.
#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub filename: String,
    pub source: SourceKind,
    pub method: ExtractionMethod,
    pub page_count: usize,
    /// Canonical name → value, ready to post back to `/predict`.
    pub values: BTreeMap<String, f64>,
    pub fields: Vec<LabValue>,
    pub missing: Vec<String>,
    pub warnings: Vec<ExtractionWarning>,
    /// Raw text the fields were read from, for diagnostics.
    pub text: String,
}

impl ExtractResponse {
    pub fn new(filename: String, extraction: UploadExtraction) -> Self {
        let UploadExtraction {
            format,
            report,
            result,
        } = extraction;
        Self {
            filename,
            source: format.source,
            method: report.method,
            page_count: report.page_count,
            values: result.as_map(),
            missing: result.missing,
            fields: result.values,
            warnings: report.warnings,
            text: report.text,
        }
    }
}

/// Body of `POST /analyze`.
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub extraction: ExtractResponse,
    pub report: RiskReport,
}
