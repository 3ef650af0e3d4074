//! Echo endpoint used to exercise the exchange pipeline.

use axum::Json;
use axum::body::Bytes;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::error::{AppError, AppResult};
use crate::models::EchoResponse;

/// `POST /echo`: return the JSON payload unchanged.
///
/// An empty body is rejected with 400; malformed JSON is reported through
/// [`AppError::SerializationError`].
#[instrument(skip(body), fields(body_len = body.len()))]
pub async fn echo(body: Bytes) -> AppResult<(StatusCode, Json<EchoResponse>)> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Request body is empty".to_string()));
    }

    let data: serde_json::Value = serde_json::from_slice(&body)?;

    Ok((
        StatusCode::OK,
        Json(EchoResponse {
            message: "echoed".to_string(),
            data,
            timestamp: Utc::now(),
        }),
    ))
}
