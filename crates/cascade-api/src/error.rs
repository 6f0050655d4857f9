//! API error taxonomy and HTTP mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use cascade_storage::StoreError;

/// Errors surfaced to API callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unknown workflow, execution, or job
    #[error("{0}")]
    NotFound(String),

    /// Malformed workflow or request
    #[error("{0}")]
    Validation(String),

    /// Authenticated but not the owner
    #[error("Access denied")]
    Forbidden,

    /// Missing or invalid credentials
    #[error("Invalid or missing credentials")]
    Unauthorized,

    /// Anything else
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WorkflowNotFound(_) => Self::NotFound("Workflow not found".into()),
            StoreError::ExecutionNotFound(_) => Self::NotFound("Execution not found".into()),
            other => Self::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal(e) => {
                tracing::error!("internal error: {e:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let detail = match &self {
            Self::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };
        (status, Json(json!({"detail": detail}))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_store_errors_map_to_404() {
        let err: ApiError = StoreError::WorkflowNotFound(Uuid::nil()).into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
