//! `POST /predict`: risk assessment from manually entered values.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::pipeline::risk::{sanitize_manual_values, RiskReport};

/// Body is a JSON object of field name → number (or numeric string).
/// Invalid entries do not fail the request; they come back in
/// `ignored_fields`.
pub async fn manual(
    State(ctx): State<ApiContext>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<RiskReport>, ApiError> {
    let Json(body) = body?;
    let Value::Object(raw) = body else {
        return Err(ApiError::BadRequest(
            "Expected a JSON object of lab values".into(),
        ));
    };

    let report = ctx
        .run_blocking(move |core| {
            let (values, ignored) = sanitize_manual_values(core.dictionary(), &raw);
            if !ignored.is_empty() {
                tracing::info!(ignored = ignored.len(), "Manual values dropped");
            }
            let mut report = core.assessor().assess(&values);
            report.ignored_fields = ignored;
            Ok(report)
        })
        .await?;
    Ok(Json(report))
}
