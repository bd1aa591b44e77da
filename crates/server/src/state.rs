//! Application state shared across handlers.

use crate::admission::{AdmissionControl, SharedAdmission};
use crate::manager::UploadSessionManager;
use crate::merge::MergeEngine;
use depot_core::config::AppConfig;
use depot_metadata::SessionStore;
use depot_storage::{BlobStore, ChunkStaging};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Chunk staging scratch area.
    pub staging: Arc<ChunkStaging>,
    /// Blob storage backend.
    pub blobs: Arc<dyn BlobStore>,
    /// Session metadata store.
    pub metadata: Arc<dyn SessionStore>,
    /// The upload session manager.
    pub manager: Arc<UploadSessionManager>,
    /// The merge engine (shared with the manager).
    pub merge: Arc<MergeEngine>,
    /// Admission control policy.
    pub admission: SharedAdmission,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Panics
    ///
    /// Panics if configuration validation fails; startup must not proceed
    /// on an invalid config.
    pub fn new(
        config: AppConfig,
        blobs: Arc<dyn BlobStore>,
        metadata: Arc<dyn SessionStore>,
        staging: Arc<ChunkStaging>,
        admission: Arc<dyn AdmissionControl>,
    ) -> Self {
        if let Err(error) = config.validate() {
            panic!("Invalid configuration: {error}");
        }

        let merge = Arc::new(MergeEngine::new(
            metadata.clone(),
            staging.clone(),
            blobs.clone(),
        ));
        let manager = Arc::new(UploadSessionManager::new(
            config.server.clone(),
            metadata.clone(),
            staging.clone(),
            merge.clone(),
        ));

        Self {
            config: Arc::new(config),
            staging,
            blobs,
            metadata,
            manager,
            merge,
            admission,
        }
    }
}
