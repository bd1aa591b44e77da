//! Upload session manager: session creation, chunk admission, completion
//! handoff, cancellation.
//!
//! The manager owns the session state machine. It checks the transition
//! table before issuing any store update, and all counter mutation goes
//! through the store's compare-and-set operations — never a local
//! read-modify-write.

use crate::error::{ApiError, ApiResult};
use crate::merge::MergeEngine;
use bytes::Bytes;
use depot_core::config::ServerConfig;
use depot_core::{
    ChunkProgress, DEFAULT_MIME_TYPE, OpenSessionRequest, SessionId, SessionStatus, SessionView,
    StatusResponse, UploadSession, sanitize_file_name,
};
use depot_metadata::{SessionFilter, SessionRepo, SessionRow, SessionStore};
use depot_storage::{BlobStore, ChunkStaging};
use std::sync::Arc;
use time::OffsetDateTime;

/// How many fresh ids to try when the store reports a collision.
const ID_COLLISION_RETRIES: u32 = 2;

/// One page of session views.
#[derive(Clone, Debug, serde::Serialize)]
pub struct SessionListPage {
    pub sessions: Vec<SessionView>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

pub struct UploadSessionManager {
    config: ServerConfig,
    store: Arc<dyn SessionStore>,
    staging: Arc<ChunkStaging>,
    merge: Arc<MergeEngine>,
}

impl UploadSessionManager {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn SessionStore>,
        staging: Arc<ChunkStaging>,
        merge: Arc<MergeEngine>,
    ) -> Self {
        Self {
            config,
            store,
            staging,
            merge,
        }
    }

    /// Open a new upload session in `pending`.
    pub async fn open(&self, req: OpenSessionRequest) -> ApiResult<SessionId> {
        let name = sanitize_file_name(&req.file_name)
            .map_err(|e| ApiError::Validation(e.to_string()))?;

        if req.declared_size == 0 || req.declared_size > self.config.max_file_size {
            return Err(ApiError::Validation(format!(
                "declared_size must be between 1 and {}",
                self.config.max_file_size
            )));
        }
        if req.total_chunks == 0 || req.total_chunks > self.config.max_chunks {
            return Err(ApiError::Validation(format!(
                "total_chunks must be between 1 and {}",
                self.config.max_chunks
            )));
        }

        let mime_type = req
            .mime_type
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

        // Random 128-bit ids make collisions negligible, but the store's
        // uniqueness constraint is the authoritative guard.
        let mut attempts = 0;
        loop {
            let session = UploadSession::new(
                name.clone(),
                req.declared_size,
                mime_type.clone(),
                req.total_chunks,
                req.uploaded_by.clone(),
                self.config.session_ttl(),
            );
            let row = SessionRow::from_session(&session);
            match self.store.create_session(&row).await {
                Ok(()) => {
                    tracing::info!(
                        session_id = %session.id,
                        original_name = %name,
                        declared_size = req.declared_size,
                        total_chunks = req.total_chunks,
                        "upload session opened"
                    );
                    return Ok(session.id);
                }
                Err(depot_metadata::MetadataError::AlreadyExists(_))
                    if attempts < ID_COLLISION_RETRIES =>
                {
                    attempts += 1;
                }
                Err(depot_metadata::MetadataError::AlreadyExists(msg)) => {
                    return Err(ApiError::Conflict(msg));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Accept one chunk: stage its bytes durably, then advance the
    /// contiguous-prefix progress counter as far as staged chunks allow.
    pub async fn submit_chunk(
        &self,
        session_id: &str,
        chunk_index: u32,
        total_chunks_header: u32,
        data: Bytes,
    ) -> ApiResult<ChunkProgress> {
        let id = SessionId::parse(session_id).map_err(|e| ApiError::Validation(e.to_string()))?;

        if data.len() as u64 > self.config.max_chunk_size {
            return Err(ApiError::Validation(format!(
                "chunk size {} exceeds maximum {}",
                data.len(),
                self.config.max_chunk_size
            )));
        }

        let session = self.load(&id).await?;

        if total_chunks_header != session.total_chunks {
            return Err(ApiError::Validation(format!(
                "declared total_chunks {} does not match session total_chunks {}",
                total_chunks_header, session.total_chunks
            )));
        }
        if chunk_index >= session.total_chunks {
            return Err(ApiError::Validation(format!(
                "chunk index {} out of range for {} chunks",
                chunk_index, session.total_chunks
            )));
        }
        if !session.status.accepts_chunks() {
            return Err(ApiError::Upload(format!(
                "session is {}, not accepting chunks",
                session.status
            )));
        }
        if session.is_expired() {
            return Err(ApiError::Upload("session expired".to_string()));
        }

        // Bytes are staged before any counter update, so a crash between
        // staging and the update never loses data; re-staging the same
        // index is idempotent.
        if let Err(e) = self.staging.write_chunk(&id, chunk_index, data).await {
            // Local cleanup before propagating: no torn chunk left behind.
            let _ = self.staging.remove_chunk(&id, chunk_index).await;
            return Err(e.into());
        }

        let now = OffsetDateTime::now_utc();
        // First accepted chunk flips pending -> uploading; an accepted
        // chunk for a failed session flips it back for re-submission.
        self.store.mark_uploading(&id.to_string(), now).await?;

        let progress = self.extend_prefix(&id, session.total_chunks).await?;

        tracing::debug!(
            session_id = %id,
            chunk_index,
            uploaded_chunks = progress.uploaded_chunks,
            total_chunks = progress.total_chunks,
            "chunk accepted"
        );
        Ok(progress)
    }

    /// Extend the confirmed prefix over contiguously staged chunks.
    ///
    /// Each step is a compare-and-set against the stored counter; losing
    /// the CAS means a concurrent submission advanced it, so we re-read
    /// and continue. Out-of-order submissions stage bytes but the counter
    /// only ever reflects a contiguous prefix starting at index 0.
    async fn extend_prefix(&self, id: &SessionId, total_chunks: u32) -> ApiResult<ChunkProgress> {
        let key = id.to_string();
        // Every iteration either advances the global counter or stops, so
        // total_chunks + 1 rounds always suffice.
        for _ in 0..=total_chunks {
            let Some(row) = self.store.get_session(&key).await? else {
                // Session deleted out from under us; discard staged bytes
                // so nothing is orphaned.
                let _ = self.staging.remove_session(id).await;
                return Err(ApiError::NotFound("upload session not found".to_string()));
            };
            let current = row.uploaded_chunks;
            if current >= i64::from(total_chunks) {
                break;
            }
            let next_index = current as u32;
            if !self.staging.has_chunk(id, next_index).await? {
                break;
            }
            // A lost CAS is fine: someone else advanced past this index.
            let _ = self
                .store
                .advance_progress(&key, current, OffsetDateTime::now_utc())
                .await?;
        }

        let session = self.load(id).await?;
        Ok(ChunkProgress {
            uploaded_chunks: session.uploaded_chunks,
            total_chunks: session.total_chunks,
            progress: session.progress(),
        })
    }

    /// Request completion: verify every chunk arrived, hand the session to
    /// the merge engine, and return immediately with `processing`.
    ///
    /// The merge runs as a detached background task; callers observe its
    /// outcome by polling [`Self::get_status`].
    pub async fn complete(&self, session_id: &str) -> ApiResult<StatusResponse> {
        let id = SessionId::parse(session_id).map_err(|e| ApiError::Validation(e.to_string()))?;
        let session = self.load(&id).await?;

        match session.status {
            // Idempotent: already merged, or a merge is already in flight.
            SessionStatus::Completed | SessionStatus::Processing => {
                return Ok(StatusResponse {
                    status: session.status,
                });
            }
            SessionStatus::Cancelled => {
                return Err(ApiError::Upload("session is cancelled".to_string()));
            }
            SessionStatus::Pending | SessionStatus::Uploading | SessionStatus::Failed => {}
        }

        if !session.is_complete() {
            return Err(ApiError::Upload(format!(
                "upload incomplete: {} of {} chunks received",
                session.uploaded_chunks, session.total_chunks
            )));
        }

        // The counter says every chunk arrived; verify each one is still
        // physically present in case something deleted staged files
        // out-of-band.
        for index in 0..session.total_chunks {
            if !self.staging.has_chunk(&id, index).await? {
                return Err(ApiError::Upload(format!(
                    "chunk {index} missing from staging, re-upload"
                )));
            }
        }

        let now = OffsetDateTime::now_utc();
        let key = id.to_string();

        // A failed session re-enters through uploading per the transition
        // table; complete() is the manual re-drive after a failed merge.
        if session.status == SessionStatus::Failed {
            self.store.mark_uploading(&key, now).await?;
        }

        if !self.store.begin_processing(&key, now).await? {
            // Lost the handoff race: a concurrent complete() got there
            // first, or the status moved. Report the authoritative state.
            let session = self.load(&id).await?;
            return match session.status {
                SessionStatus::Processing | SessionStatus::Completed => Ok(StatusResponse {
                    status: session.status,
                }),
                other => Err(ApiError::Upload(format!(
                    "session is {other}, cannot complete"
                ))),
            };
        }

        tracing::info!(session_id = %id, "all chunks received, dispatching merge");
        self.merge.dispatch(id);

        Ok(StatusResponse {
            status: SessionStatus::Processing,
        })
    }

    /// Cancel a session. Terminal: nothing transitions out of `cancelled`.
    pub async fn cancel(&self, session_id: &str) -> ApiResult<StatusResponse> {
        let id = SessionId::parse(session_id).map_err(|e| ApiError::Validation(e.to_string()))?;
        let session = self.load(&id).await?;

        match session.status {
            SessionStatus::Completed => {
                return Err(ApiError::Upload(
                    "session already completed, cannot cancel".to_string(),
                ));
            }
            // Cancelling twice is a no-op success.
            SessionStatus::Cancelled => {
                return Ok(StatusResponse {
                    status: SessionStatus::Cancelled,
                });
            }
            _ => {}
        }

        let now = OffsetDateTime::now_utc();
        if !self.store.cancel_session(&id.to_string(), now).await? {
            // A dispatched merge is never interrupted; it runs to its own
            // completion or failure independently.
            let session = self.load(&id).await?;
            return Err(ApiError::Upload(format!(
                "session is {}, cannot cancel",
                session.status
            )));
        }

        // Staged chunks are reclaimed asynchronously, best-effort; the
        // janitor covers anything this misses.
        let staging = self.staging.clone();
        tokio::spawn(async move {
            if let Err(e) = staging.remove_session(&id).await {
                tracing::warn!(session_id = %id, error = %e, "failed to remove staged chunks after cancel");
            }
        });

        tracing::info!(session_id = %id, "upload session cancelled");
        Ok(StatusResponse {
            status: SessionStatus::Cancelled,
        })
    }

    /// Pure read of a session's externally visible state.
    pub async fn get_status(&self, session_id: &str) -> ApiResult<SessionView> {
        let id = SessionId::parse(session_id).map_err(|e| ApiError::Validation(e.to_string()))?;
        Ok(self.load(&id).await?.view())
    }

    /// Delete a session record along with its staged chunks and, when
    /// completed, its stored blob.
    pub async fn delete(&self, session_id: &str) -> ApiResult<()> {
        let id = SessionId::parse(session_id).map_err(|e| ApiError::Validation(e.to_string()))?;
        let session = self.load(&id).await?;

        // Record first: once it is gone no new chunks are accepted, and
        // the janitor's orphan sweep covers any cleanup we fail below.
        if !self.store.delete_session(&id.to_string()).await? {
            return Err(ApiError::NotFound("upload session not found".to_string()));
        }

        if let Err(e) = self.staging.remove_session(&id).await {
            tracing::warn!(session_id = %id, error = %e, "failed to remove staged chunks on delete");
        }
        if let Some(blob_ref) = &session.blob_ref {
            if let Err(e) = self.merge.blobs().delete(blob_ref).await {
                tracing::warn!(session_id = %id, blob_ref = %blob_ref, error = %e, "failed to remove blob on delete");
            }
        }

        tracing::info!(session_id = %id, "upload session deleted");
        Ok(())
    }

    /// List sessions with filtering, sorting, and pagination.
    pub async fn list(&self, filter: SessionFilter) -> ApiResult<SessionListPage> {
        let page = self.store.list_sessions(&filter).await?;
        let mut sessions = Vec::with_capacity(page.rows.len());
        for row in page.rows {
            sessions.push(row.into_session()?.view());
        }
        Ok(SessionListPage {
            sessions,
            page: filter.page.max(1),
            limit: filter.normalized_limit(),
            total: page.total,
        })
    }

    async fn load(&self, id: &SessionId) -> ApiResult<UploadSession> {
        let row = self
            .store
            .get_session(&id.to_string())
            .await?
            .ok_or_else(|| ApiError::NotFound("upload session not found".to_string()))?;
        Ok(row.into_session()?)
    }
}
