use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use parley_db::StoreError;
use parley_types::api::FieldErrors;

/// HTTP-facing error shape. Store failures are all-or-nothing per
/// request: nothing partial ever goes out with an error status.
#[derive(Debug)]
pub enum ApiError {
    /// Identity did not resolve to a user
    Unauthorized,
    /// Request failed validation; body carries the field errors
    Unprocessable(Vec<String>),
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
            ApiError::Unprocessable(errors) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(FieldErrors { errors })).into_response()
            }
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation { .. } => ApiError::Unprocessable(vec![err.to_string()]),
            StoreError::NotFound(_) => ApiError::Unauthorized,
            other => {
                error!("store failure: {}", other);
                ApiError::Internal
            }
        }
    }
}

/// spawn_blocking join failures are always a server-side bug.
pub fn join_error(err: tokio::task::JoinError) -> ApiError {
    error!("spawn_blocking join error: {}", err);
    ApiError::Internal
}
