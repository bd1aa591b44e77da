//! Session control plane handlers.

use crate::error::{ApiError, ApiResult};
use crate::manager::SessionListPage;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use depot_core::{
    ChunkProgress, OpenSessionRequest, OpenSessionResponse, SessionStatus, SessionView,
    StatusResponse,
};
use depot_metadata::{SessionFilter, SortBy, SortOrder};
use serde::Deserialize;

/// Header carrying the client's declared chunk count on each submission.
pub const TOTAL_CHUNKS_HEADER: &str = "x-total-chunks";

/// POST /v1/sessions - Open a new upload session.
#[tracing::instrument(skip(state, req))]
pub async fn open_session(
    State(state): State<AppState>,
    Json(req): Json<OpenSessionRequest>,
) -> ApiResult<(StatusCode, Json<OpenSessionResponse>)> {
    let session_id = state.manager.open(req).await?;
    Ok((
        StatusCode::CREATED,
        Json(OpenSessionResponse {
            session_id: session_id.to_string(),
        }),
    ))
}

/// PUT /v1/sessions/{session_id}/chunks/{chunk_index} - Submit one chunk.
#[tracing::instrument(skip(state, headers, body), fields(session_id = %session_id, chunk_index))]
pub async fn submit_chunk(
    State(state): State<AppState>,
    Path((session_id, chunk_index)): Path<(String, u32)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ChunkProgress>> {
    let total_chunks = headers
        .get(TOTAL_CHUNKS_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation(format!("missing {TOTAL_CHUNKS_HEADER} header")))?
        .parse::<u32>()
        .map_err(|e| ApiError::Validation(format!("invalid {TOTAL_CHUNKS_HEADER} header: {e}")))?;

    let progress = state
        .manager
        .submit_chunk(&session_id, chunk_index, total_chunks, body)
        .await?;
    Ok(Json(progress))
}

/// POST /v1/sessions/{session_id}/complete - Request merge.
#[tracing::instrument(skip(state), fields(session_id = %session_id))]
pub async fn complete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<(StatusCode, Json<StatusResponse>)> {
    let response = state.manager.complete(&session_id).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /v1/sessions/{session_id}/cancel - Cancel the session.
#[tracing::instrument(skip(state), fields(session_id = %session_id))]
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let response = state.manager.cancel(&session_id).await?;
    Ok(Json(response))
}

/// GET /v1/sessions/{session_id} - Read session status.
#[tracing::instrument(skip(state), fields(session_id = %session_id))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let view = state.manager.get_status(&session_id).await?;
    Ok(Json(view))
}

/// DELETE /v1/sessions/{session_id} - Delete a session and its storage.
#[tracing::instrument(skip(state), fields(session_id = %session_id))]
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.delete(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query parameters for session listings.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub sort_by: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
}

/// GET /v1/sessions - List sessions.
#[tracing::instrument(skip(state))]
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<SessionListPage>> {
    let mut filter = SessionFilter::default();

    if let Some(status) = &query.status {
        let parsed = SessionStatus::parse(status)
            .ok_or_else(|| ApiError::Validation(format!("unknown status filter: {status}")))?;
        filter.status = Some(parsed.as_str().to_string());
    }
    if let Some(page) = query.page {
        if page == 0 {
            return Err(ApiError::Validation("page is 1-based".to_string()));
        }
        filter.page = page;
    }
    if let Some(limit) = query.limit {
        filter.limit = limit;
    }
    if let Some(sort_by) = &query.sort_by {
        filter.sort_by = SortBy::parse(sort_by)
            .ok_or_else(|| ApiError::Validation(format!("unknown sort_by: {sort_by}")))?;
    }
    if let Some(sort_order) = &query.sort_order {
        filter.sort_order = SortOrder::parse(sort_order)
            .ok_or_else(|| ApiError::Validation(format!("unknown sort_order: {sort_order}")))?;
    }

    let page = state.manager.list(filter).await?;
    Ok(Json(page))
}
