use crate::services::error::{FailureKind, UploadError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

/// HTTP status for a failed chunk request.
pub fn status_for(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::Validation => StatusCode::BAD_REQUEST,
        FailureKind::Assembly => StatusCode::CONFLICT,
        FailureKind::Integrity => StatusCode::UNPROCESSABLE_ENTITY,
        FailureKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Upload(e) => {
                if e.kind() == FailureKind::Io {
                    tracing::error!("Upload I/O error: {:?}", e);
                }
                (status_for(e.kind()), e.to_string())
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "status": "failure",
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(FailureKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(FailureKind::Assembly), StatusCode::CONFLICT);
        assert_eq!(
            status_for(FailureKind::Integrity),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(FailureKind::Io),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upload_error_response_status() {
        let response = AppError::from(UploadError::validation("fileType not set or empty"))
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response =
            AppError::PayloadTooLarge("Chunk exceeds the 16 byte limit".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = AppError::Internal("spool failed".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
