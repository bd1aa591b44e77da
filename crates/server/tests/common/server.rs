//! Server test utilities.

use depot_core::SessionStatus;
use depot_core::config::{AppConfig, JanitorConfig};
use depot_metadata::{SessionStore, SqliteStore};
use depot_server::admission::AllowAll;
use depot_server::{AppState, JanitorService, create_router};
use depot_storage::{BlobStore, ChunkStaging, FilesystemBackend};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        Self::with_blobs(|inner| inner).await
    }

    /// Create a test server with a wrapped blob store (for failure
    /// injection).
    pub async fn with_blobs<F>(wrap: F) -> Self
    where
        F: FnOnce(Arc<dyn BlobStore>) -> Arc<dyn BlobStore>,
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let inner: Arc<dyn BlobStore> = Arc::new(
            FilesystemBackend::new(temp_dir.path().join("blobs"))
                .await
                .expect("Failed to create blob backend"),
        );
        let blobs = wrap(inner);

        let staging = Arc::new(
            ChunkStaging::new(temp_dir.path().join("staging"))
                .await
                .expect("Failed to create chunk staging"),
        );

        let metadata: Arc<dyn SessionStore> = Arc::new(
            SqliteStore::new(temp_dir.path().join("metadata.db"))
                .await
                .expect("Failed to create metadata store"),
        );

        let state = AppState::new(
            AppConfig::default(),
            blobs,
            metadata,
            staging,
            Arc::new(AllowAll),
        );
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    /// Build a janitor over this server's backends.
    pub fn janitor(&self, config: JanitorConfig) -> JanitorService {
        JanitorService::new(
            self.state.metadata.clone(),
            self.state.staging.clone(),
            self.state.blobs.clone(),
            config,
        )
    }

    /// Poll until the session's background merge reaches a terminal-or-
    /// failed status, panicking after a deadline.
    pub async fn wait_for_merge(&self, session_id: &str) -> depot_core::SessionView {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let view = self
                .state
                .manager
                .get_status(session_id)
                .await
                .expect("session disappeared while waiting for merge");
            if matches!(view.status, SessionStatus::Completed | SessionStatus::Failed) {
                return view;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("merge did not finish in time (status: {})", view.status);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Collect a byte stream into a buffer.
#[allow(dead_code)]
pub async fn collect_stream(mut stream: depot_storage::ByteStream) -> Vec<u8> {
    use futures::StreamExt;
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk.expect("stream error"));
    }
    out
}
