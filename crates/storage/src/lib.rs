//! Blob storage and chunk staging for the depot chunked-upload service.
//!
//! This crate provides:
//! - The [`BlobStore`] abstraction finalized uploads are merged into
//! - A local filesystem backend with atomic streaming writes
//! - The [`ChunkStaging`] scratch area for in-flight sessions

pub mod backends;
pub mod error;
pub mod staging;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use staging::ChunkStaging;
pub use traits::{BlobMeta, BlobStore, BlobTags, ByteStream, StreamingUpload};

use depot_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("blobs"),
        };

        let store = from_config(&config).await.unwrap();
        let mut upload = store
            .put_stream("objects/test", BlobTags::default())
            .await
            .unwrap();
        upload.write(Bytes::from_static(b"hi")).await.unwrap();
        upload.finish().await.unwrap();
        assert!(store.exists("objects/test").await.unwrap());
        store.health_check().await.unwrap();
    }
}
