//! `POST /extract`: upload a report, get back the recognised lab values.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;

use crate::api::error::ApiError;
use crate::api::types::{read_upload, ApiContext, ExtractResponse, Upload};

pub async fn upload(
    State(ctx): State<ApiContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let upload = read_upload(multipart?).await?;
    let response = extract_in_background(&ctx, upload).await?;

    tracing::info!(
        source = response.source.as_str(),
        found = response.fields.len(),
        missing = response.missing.len(),
        "Extraction finished"
    );
    Ok(Json(response))
}

/// Detect, read and extract on the blocking pool.
pub(crate) async fn extract_in_background(
    ctx: &ApiContext,
    upload: Upload,
) -> Result<ExtractResponse, ApiError> {
    let Upload { filename, bytes } = upload;
    ctx.run_blocking(move |core| {
        let extraction = core.extract_upload(&filename, &bytes)?;
        Ok(ExtractResponse::new(filename, extraction))
    })
    .await
}
