//! Merge engine: ordered assembly of staged chunks into one blob.

use crate::error::{ApiError, ApiResult};
use depot_core::{DECLARED_SIZE_TOLERANCE, SessionId, SessionStatus, UploadSession};
use depot_metadata::{SessionRepo, SessionStore};
use depot_storage::{BlobStore, BlobTags, ChunkStaging, StreamingUpload};
use futures::StreamExt;
use std::sync::Arc;
use time::OffsetDateTime;

pub struct MergeEngine {
    store: Arc<dyn SessionStore>,
    staging: Arc<ChunkStaging>,
    blobs: Arc<dyn BlobStore>,
}

impl MergeEngine {
    pub fn new(
        store: Arc<dyn SessionStore>,
        staging: Arc<ChunkStaging>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            store,
            staging,
            blobs,
        }
    }

    /// The blob store finalized objects land in.
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Storage key for a session's finalized blob.
    pub fn blob_key(session_id: &SessionId) -> String {
        format!("objects/{session_id}")
    }

    /// Fire-and-forget merge dispatch. The spawning request returns
    /// without waiting; failures are recorded on the session and logged
    /// here, never surfaced to the dispatching caller.
    pub fn dispatch(self: &Arc<Self>, session_id: SessionId) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = engine.merge(session_id).await {
                tracing::error!(session_id = %session_id, error = %e, "merge failed");
            }
        });
    }

    /// Stream every staged chunk, in index order, into one blob, then
    /// finalize the session record and clear staging.
    pub async fn merge(&self, session_id: SessionId) -> ApiResult<()> {
        let row = self
            .store
            .get_session(&session_id.to_string())
            .await?
            .ok_or_else(|| ApiError::NotFound("upload session not found".to_string()))?;
        let session = row.into_session()?;

        // Duplicate-handoff guard.
        if session.status == SessionStatus::Completed {
            tracing::debug!(session_id = %session_id, "merge skipped, session already completed");
            return Ok(());
        }

        let blob_key = Self::blob_key(&session_id);
        let tags = BlobTags {
            original_name: Some(session.original_name.clone()),
            mime_type: Some(session.mime_type.clone()),
            uploaded_by: session.uploaded_by.clone(),
        };

        let mut upload = match self.blobs.put_stream(&blob_key, tags).await {
            Ok(upload) => upload,
            Err(e) => {
                let err = ApiError::from(e);
                self.record_failure(&session_id, &err).await;
                return Err(err);
            }
        };

        match self.stream_chunks(&session_id, &session, upload.as_mut()).await {
            Ok(()) => {}
            Err(e) => {
                // No partial object may remain reachable.
                if let Err(abort_err) = upload.abort().await {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %abort_err,
                        "failed to abort partial blob after merge error"
                    );
                }
                self.record_failure(&session_id, &e).await;
                return Err(e);
            }
        }

        let written = match upload.finish().await {
            Ok(written) => written,
            Err(e) => {
                // finish() consumed the upload; the backend guarantees an
                // unfinished write is never visible under the final key.
                let err = ApiError::from(e);
                self.record_failure(&session_id, &err).await;
                return Err(err);
            }
        };

        // Declared size is advisory: warn on large deviation, never fail.
        if written.abs_diff(session.declared_size) > DECLARED_SIZE_TOLERANCE {
            tracing::warn!(
                session_id = %session_id,
                declared_size = session.declared_size,
                merged_size = written,
                "merged size deviates from declared size"
            );
        }

        let now = OffsetDateTime::now_utc();
        let completed = self
            .store
            .complete_session(&session_id.to_string(), &blob_key, now)
            .await?;

        if !completed {
            // The record moved out of processing under us (janitor
            // reclaimed it, or the session was deleted). The blob would be
            // unreachable; remove it.
            tracing::warn!(
                session_id = %session_id,
                "session left processing during merge, discarding merged blob"
            );
            if let Err(e) = self.blobs.delete(&blob_key).await {
                tracing::warn!(session_id = %session_id, error = %e, "failed to discard merged blob");
            }
            return Ok(());
        }

        tracing::info!(
            session_id = %session_id,
            blob_ref = %blob_key,
            merged_size = written,
            "merge completed"
        );

        // The object is durably stored; cleanup failure must not revert
        // the completed status.
        if let Err(e) = self.staging.remove_session(&session_id).await {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "failed to remove staged chunks after merge"
            );
        }

        Ok(())
    }

    /// Stream chunk files in index order into the blob write stream.
    /// Awaiting each write is the backpressure point: the next chunk read
    /// does not start until the sink accepted the previous bytes, so
    /// memory stays bounded regardless of file size.
    async fn stream_chunks(
        &self,
        session_id: &SessionId,
        session: &UploadSession,
        upload: &mut dyn StreamingUpload,
    ) -> ApiResult<()> {
        for index in 0..session.total_chunks {
            let mut stream = self.staging.read_chunk(session_id, index).await?;
            while let Some(chunk) = stream.next().await {
                upload.write(chunk?).await?;
            }
        }
        Ok(())
    }

    /// Persist a merge failure: `processing -> failed` with the message
    /// recorded and the retry counter incremented.
    async fn record_failure(&self, session_id: &SessionId, error: &ApiError) {
        let now = OffsetDateTime::now_utc();
        match self
            .store
            .fail_session(&session_id.to_string(), &error.to_string(), true, now)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    session_id = %session_id,
                    "session was not in processing when recording merge failure"
                );
            }
            Err(e) => {
                // The session stays in processing; the stale sweep will
                // reclaim it.
                tracing::error!(
                    session_id = %session_id,
                    error = %e,
                    "failed to persist merge failure"
                );
            }
        }
    }
}
