//! Janitor service: reclaims storage from expired, abandoned, and
//! orphaned upload state without manual intervention.

use depot_core::SessionId;
use depot_core::config::JanitorConfig;
use depot_metadata::{SessionRepo, SessionRow, SessionStore};
use depot_storage::{BlobStore, ChunkStaging};
use std::collections::HashSet;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;

/// Outcome counters for one sweep cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Items matched by the sweep query or listing.
    pub examined: u64,
    /// Sessions/directories fully removed.
    pub removed: u64,
    /// Stuck processing sessions marked failed.
    pub reclaimed: u64,
    /// Per-item failures; a failure never aborts the rest of the sweep.
    pub errors: u64,
}

pub struct JanitorService {
    store: Arc<dyn SessionStore>,
    staging: Arc<ChunkStaging>,
    blobs: Arc<dyn BlobStore>,
    config: JanitorConfig,
}

impl JanitorService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        staging: Arc<ChunkStaging>,
        blobs: Arc<dyn BlobStore>,
        config: JanitorConfig,
    ) -> Self {
        Self {
            store,
            staging,
            blobs,
            config,
        }
    }

    /// Spawn the three sweep loops. The orphan loop runs once immediately,
    /// since a prior crash may have left staging directories behind.
    pub fn spawn(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let expire = {
            let janitor = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(janitor.config.expire_interval()).await;
                    let stats = janitor.run_expire_sweep().await;
                    tracing::info!(?stats, "expire sweep finished");
                }
            })
        };

        let stale = {
            let janitor = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(janitor.config.stale_interval()).await;
                    let stats = janitor.run_stale_sweep().await;
                    tracing::info!(?stats, "stale sweep finished");
                }
            })
        };

        let orphan = {
            let janitor = Arc::clone(&self);
            tokio::spawn(async move {
                loop {
                    let stats = janitor.run_orphan_sweep().await;
                    tracing::info!(?stats, "orphan sweep finished");
                    tokio::time::sleep(janitor.config.orphan_interval()).await;
                }
            })
        };

        vec![expire, stale, orphan]
    }

    /// Delete sessions whose deadline has passed, regardless of status.
    pub async fn run_expire_sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let now = OffsetDateTime::now_utc();

        let rows = match self.store.expired_sessions(now, self.config.batch_size).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!(error = %e, "expire sweep query failed");
                stats.errors += 1;
                return stats;
            }
        };

        for row in rows {
            stats.examined += 1;
            if self.reap_session(&row).await {
                stats.removed += 1;
            } else {
                stats.errors += 1;
            }
        }
        stats
    }

    /// Delete abandoned in-flight sessions and reclaim stuck merges.
    ///
    /// Pending/uploading sessions untouched past the staleness window are
    /// deleted. Processing sessions untouched that long mean the process
    /// died between merge dispatch and terminal persistence; they are
    /// marked failed (retryable) rather than deleted, since their staged
    /// chunks may still be complete.
    pub async fn run_stale_sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();
        let cutoff = OffsetDateTime::now_utc() - self.config.stale_window();

        match self.store.stale_sessions(cutoff, self.config.batch_size).await {
            Ok(rows) => {
                for row in rows {
                    stats.examined += 1;
                    if self.reap_session(&row).await {
                        stats.removed += 1;
                    } else {
                        stats.errors += 1;
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "stale sweep query failed");
                stats.errors += 1;
            }
        }

        match self
            .store
            .stuck_processing_sessions(cutoff, self.config.batch_size)
            .await
        {
            Ok(rows) => {
                for row in rows {
                    stats.examined += 1;
                    let now = OffsetDateTime::now_utc();
                    match self
                        .store
                        .fail_session(&row.session_id, "merge interrupted, retry upload", false, now)
                        .await
                    {
                        Ok(true) => {
                            tracing::warn!(session_id = %row.session_id, "reclaimed stuck processing session");
                            stats.reclaimed += 1;
                        }
                        // The merge finished between query and update.
                        Ok(false) => {}
                        Err(e) => {
                            tracing::warn!(session_id = %row.session_id, error = %e, "failed to reclaim stuck session");
                            stats.errors += 1;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "stuck processing query failed");
                stats.errors += 1;
            }
        }

        stats
    }

    /// Remove staging directories with no matching session record.
    pub async fn run_orphan_sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let dirs = match self.staging.list_session_dirs().await {
            Ok(dirs) => dirs,
            Err(e) => {
                tracing::error!(error = %e, "orphan sweep listing failed");
                stats.errors += 1;
                return stats;
            }
        };
        let known: HashSet<String> = match self.store.list_session_ids().await {
            Ok(ids) => ids.into_iter().collect(),
            Err(e) => {
                tracing::error!(error = %e, "orphan sweep id query failed");
                stats.errors += 1;
                return stats;
            }
        };

        for dir in dirs {
            if known.contains(&dir) {
                continue;
            }
            stats.examined += 1;
            match self.staging.remove_dir_by_name(&dir).await {
                Ok(()) => {
                    tracing::info!(dir = %dir, "removed orphaned staging directory");
                    stats.removed += 1;
                }
                Err(e) => {
                    tracing::warn!(dir = %dir, error = %e, "failed to remove orphaned staging directory");
                    stats.errors += 1;
                }
            }
        }
        stats
    }

    /// Remove one session: staged chunks, blob if any, then the record.
    /// The record goes last so a partial failure leaves the session
    /// visible to the next sweep instead of orphaning storage.
    async fn reap_session(&self, row: &SessionRow) -> bool {
        let mut ok = true;

        match SessionId::parse(&row.session_id) {
            Ok(id) => {
                if let Err(e) = self.staging.remove_session(&id).await {
                    tracing::warn!(session_id = %row.session_id, error = %e, "sweep failed to remove staged chunks");
                    ok = false;
                }
            }
            Err(e) => {
                tracing::warn!(session_id = %row.session_id, error = %e, "sweep found unparseable session id");
            }
        }

        if let Some(blob_ref) = &row.blob_ref {
            match self.blobs.delete(blob_ref).await {
                Ok(()) => {}
                Err(depot_storage::StorageError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(session_id = %row.session_id, blob_ref = %blob_ref, error = %e, "sweep failed to remove blob");
                    ok = false;
                }
            }
        }

        if !ok {
            return false;
        }

        match self.store.delete_session(&row.session_id).await {
            Ok(_) => {
                tracing::info!(session_id = %row.session_id, status = %row.status, "swept session");
                true
            }
            Err(e) => {
                tracing::warn!(session_id = %row.session_id, error = %e, "sweep failed to delete session record");
                false
            }
        }
    }
}
