//! Maps registry errors onto HTTP responses.
//!
//! Bodies use a `{"detail": ...}` envelope. Internal errors are logged
//! server-side and returned opaque.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::registry::RegistryError;

pub struct ApiError(RegistryError);

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self.0 {
            RegistryError::Validation(e) => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
            RegistryError::NotFound(_) => (StatusCode::NOT_FOUND, "Task not found".to_string()),
            RegistryError::NotReady { task_id, status } => (
                StatusCode::CONFLICT,
                format!("Task '{task_id}' is still {status}"),
            ),
            RegistryError::Analysis(msg) => {
                (StatusCode::BAD_GATEWAY, format!("Analysis failed: {msg}"))
            }
            RegistryError::Internal(e) => {
                error!("internal error: {e:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
