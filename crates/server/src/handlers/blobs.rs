//! Blob download handler.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use depot_core::SessionStatus;
use depot_storage::BlobStore;

/// Parse a single-range `Range: bytes=a-b` header. Returns the inclusive
/// start and optional inclusive end. Multi-range requests are rejected.
fn parse_range(headers: &HeaderMap) -> ApiResult<Option<(u64, Option<u64>)>> {
    let Some(value) = headers.get(header::RANGE) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::Validation("invalid Range header".to_string()))?;
    let byte_range = value
        .strip_prefix("bytes=")
        .ok_or_else(|| ApiError::Validation(format!("unsupported Range unit: {value}")))?;
    if byte_range.contains(',') {
        return Err(ApiError::Validation(
            "multi-range requests are not supported".to_string(),
        ));
    }
    let (start, end) = byte_range
        .split_once('-')
        .ok_or_else(|| ApiError::Validation(format!("malformed Range: {value}")))?;
    let start: u64 = start
        .parse()
        .map_err(|_| ApiError::Validation(format!("malformed Range: {value}")))?;
    let end = if end.is_empty() {
        None
    } else {
        Some(
            end.parse::<u64>()
                .map_err(|_| ApiError::Validation(format!("malformed Range: {value}")))?,
        )
    };
    Ok(Some((start, end)))
}

/// GET /v1/sessions/{session_id}/download - Stream a completed session's
/// blob, honoring an optional single byte range.
#[tracing::instrument(skip(state, headers), fields(session_id = %session_id))]
pub async fn download_blob(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let view = state.manager.get_status(&session_id).await?;
    if view.status != SessionStatus::Completed {
        return Err(ApiError::NotFound(format!(
            "session is {}, no blob available",
            view.status
        )));
    }
    let blob_ref = view
        .blob_ref
        .as_deref()
        .ok_or_else(|| ApiError::Internal("completed session has no blob reference".to_string()))?;

    let meta = state.blobs.head(blob_ref).await?;

    if let Some((start, end)) = parse_range(&headers)? {
        if start >= meta.size {
            return Err(ApiError::Storage(depot_storage::StorageError::InvalidRange(
                format!("start {start} beyond blob size {}", meta.size),
            )));
        }
        // Inclusive header range to exclusive store range, clamped to EOF.
        let end_exclusive = match end {
            Some(e) => (e + 1).min(meta.size),
            None => meta.size,
        };
        let bytes = state.blobs.get_range(blob_ref, start, end_exclusive).await?;

        let response = Response::builder()
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_TYPE, &view.mime_type)
            .header(header::CONTENT_LENGTH, bytes.len())
            .header(
                header::CONTENT_RANGE,
                format!("bytes {}-{}/{}", start, end_exclusive - 1, meta.size),
            )
            .header(header::ACCEPT_RANGES, "bytes")
            .body(Body::from(bytes))
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        return Ok(response);
    }

    let stream = state.blobs.get_stream(blob_ref).await?;
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &view.mime_type)
        .header(header::CONTENT_LENGTH, meta.size)
        .header(header::ACCEPT_RANGES, "bytes")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", view.original_name),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(response)
}
