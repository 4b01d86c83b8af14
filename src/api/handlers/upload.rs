use crate::AppState;
use crate::api::error::{AppError, status_for};
use crate::models::{PayloadSource, UploadOutcome, UploadParams};
use crate::services::upload_service::ResponseSink;
use axum::{
    Json,
    body::Body,
    extract::{FromRequest, Multipart, Query, Request, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use http_body_util::{LengthLimitError, Limited};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    /// `success` or `failure`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<UploadOutcome> for UploadResponse {
    fn from(outcome: UploadOutcome) -> Self {
        match outcome {
            UploadOutcome::Success {
                message,
                chunk_number,
                final_path,
            } => UploadResponse {
                status: "success".to_string(),
                message: Some(message),
                chunk_number: Some(chunk_number),
                final_path,
                error: None,
            },
            UploadOutcome::Failure { error, .. } => UploadResponse {
                status: "failure".to_string(),
                message: None,
                chunk_number: None,
                final_path: None,
                error: Some(error),
            },
        }
    }
}

/// Turns the pipeline outcome into an HTTP response.
#[derive(Default)]
pub struct HttpResponseSink {
    response: Option<Response>,
}

impl ResponseSink for HttpResponseSink {
    fn deliver(&mut self, outcome: UploadOutcome) {
        let status = match &outcome {
            UploadOutcome::Success { .. } => StatusCode::OK,
            UploadOutcome::Failure { kind, .. } => status_for(*kind),
        };
        let mut response = (status, Json(UploadResponse::from(outcome))).into_response();
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store, no-cache, must-revalidate"),
        );
        self.response = Some(response);
    }
}

impl IntoResponse for HttpResponseSink {
    fn into_response(self) -> Response {
        match self.response {
            Some(response) => response,
            None => AppError::Internal("Upload produced no outcome".to_string()).into_response(),
        }
    }
}

#[utoipa::path(
    post,
    path = "/upload",
    params(UploadParams),
    request_body(
        content = Vec<u8>,
        description = "Chunk bytes, either as the raw body or as the `file` field of a multipart form carrying the same fields",
        content_type = "application/octet-stream"
    ),
    responses(
        (status = 200, description = "Chunk stored or upload completed", body = UploadResponse),
        (status = 400, description = "Invalid or missing fields", body = UploadResponse),
        (status = 409, description = "Last chunk arrived before all previous chunks", body = UploadResponse),
        (status = 413, description = "Chunk larger than the configured maximum", body = UploadResponse),
        (status = 422, description = "Assembled file failed integrity verification", body = UploadResponse),
        (status = 500, description = "Storage failure", body = UploadResponse)
    ),
    tag = "upload"
)]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Query(mut params): Query<UploadParams>,
    request: Request,
) -> Result<Response, AppError> {
    let limit = state.config.max_chunk_size;
    let mut sink = HttpResponseSink::default();

    if is_multipart(&request) {
        let mut multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        // The temp file lives until the pipeline has copied it.
        let spooled = spool_form(&mut multipart, &mut params, limit).await?;
        let spooled = spooled.ok_or(AppError::BadRequest("No file provided".to_string()))?;

        state
            .service
            .handle(&params, PayloadSource::file(spooled.path()), &mut sink)
            .await;
    } else {
        if declared_length(&request).is_some_and(|len| len > limit as u64) {
            return Err(too_large(limit));
        }

        // Body length is not always declared up front, so the stream is capped too.
        let exceeded = Arc::new(AtomicBool::new(false));
        let flag = exceeded.clone();
        let body = Body::new(Limited::new(request.into_body(), limit))
            .into_data_stream()
            .map_err(move |e| {
                if is_length_limit(&e) {
                    flag.store(true, Ordering::Relaxed);
                }
                std::io::Error::other(e)
            });
        let reader = StreamReader::new(body);

        state
            .service
            .handle(&params, PayloadSource::stream(reader), &mut sink)
            .await;

        if exceeded.load(Ordering::Relaxed) {
            return Err(too_large(limit));
        }
    }

    Ok(sink.into_response())
}

fn too_large(limit: usize) -> AppError {
    AppError::PayloadTooLarge(format!("Chunk exceeds the {} byte limit", limit))
}

fn declared_length(request: &Request) -> Option<u64> {
    request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn is_length_limit(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<LengthLimitError>() {
            return true;
        }
        current = e.source();
    }
    false
}

fn multipart_error(e: MultipartError) -> AppError {
    let err_msg = e.to_string();
    if err_msg.contains("length limit exceeded") {
        AppError::PayloadTooLarge("Request body exceeds the maximum allowed limit".to_string())
    } else {
        AppError::BadRequest(err_msg)
    }
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Reads every form field. Text fields land in `params`; the `file` field is
/// spooled to a temp file because later fields may still follow it.
async fn spool_form(
    multipart: &mut Multipart,
    params: &mut UploadParams,
    limit: usize,
) -> Result<Option<NamedTempFile>, AppError> {
    let mut spooled = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            let tmp = NamedTempFile::new()
                .map_err(|e| AppError::Internal(format!("Failed to create temp file: {}", e)))?;
            let std_file = tmp
                .reopen()
                .map_err(|e| AppError::Internal(format!("Failed to open temp file: {}", e)))?;
            let mut out = tokio::fs::File::from_std(std_file);
            let mut received = 0usize;

            while let Some(bytes) = field.chunk().await.map_err(multipart_error)? {
                received += bytes.len();
                if received > limit {
                    return Err(too_large(limit));
                }
                out.write_all(&bytes)
                    .await
                    .map_err(|e| AppError::Internal(format!("Failed to spool upload: {}", e)))?;
            }
            out.flush()
                .await
                .map_err(|e| AppError::Internal(format!("Failed to spool upload: {}", e)))?;
            spooled = Some(tmp);
        } else {
            let value = field.text().await.map_err(multipart_error)?;
            if !params.set_field(&name, value) {
                tracing::debug!("Ignoring unknown form field '{}'", name);
            }
        }
    }

    Ok(spooled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::error::FailureKind;

    #[test]
    fn test_sink_maps_failure_status() {
        let mut sink = HttpResponseSink::default();
        sink.deliver(UploadOutcome::Failure {
            error: "File integrity failed, please re-upload the file again".to_string(),
            kind: FailureKind::Integrity,
        });
        let response = sink.into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store, no-cache, must-revalidate"
        );
    }

    #[test]
    fn test_response_shape() {
        let partial = serde_json::to_value(UploadResponse::from(UploadOutcome::Success {
            message: "Chunk 3 uploaded successfully".to_string(),
            chunk_number: 3,
            final_path: None,
        }))
        .unwrap();
        assert_eq!(partial["status"], "success");
        assert_eq!(partial["chunkNumber"], 3);
        assert!(partial.get("finalPath").is_none());
        assert!(partial.get("error").is_none());

        let failed = serde_json::to_value(UploadResponse::from(UploadOutcome::Failure {
            error: "fileType not set or empty".to_string(),
            kind: FailureKind::Validation,
        }))
        .unwrap();
        assert_eq!(failed["status"], "failure");
        assert_eq!(failed["error"], "fileType not set or empty");
        assert!(failed.get("chunkNumber").is_none());
    }

    #[tokio::test]
    async fn test_length_limit_found_in_error_chain() {
        use http_body_util::BodyExt;

        let capped = Body::new(Limited::new(Body::from("0123456789"), 4));
        let err = capped.collect().await.unwrap_err();
        assert!(is_length_limit(&err));

        let other = axum::Error::new(std::io::Error::other("connection reset"));
        assert!(!is_length_limit(&other));
    }

    #[test]
    fn test_empty_sink_is_internal_error() {
        let response = HttpResponseSink::default().into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
