//! `POST /analyze`: extraction and risk assessment in one request.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::Json;

use crate::api::endpoints::extract::extract_in_background;
use crate::api::error::ApiError;
use crate::api::types::{read_upload, AnalyzeResponse, ApiContext};

pub async fn upload(
    State(ctx): State<ApiContext>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let upload = read_upload(multipart?).await?;
    let extraction = extract_in_background(&ctx, upload).await?;

    let values = extraction.values.clone();
    let report = ctx
        .run_blocking(move |core| Ok(core.assessor().assess(&values)))
        .await?;

    Ok(Json(AnalyzeResponse { extraction, report }))
}
