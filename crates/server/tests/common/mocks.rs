//! Mock backends for failure injection.

use async_trait::async_trait;
use bytes::Bytes;
use depot_storage::{BlobMeta, BlobStore, BlobTags, ByteStream, StorageResult, StreamingUpload};
use std::sync::{Arc, Mutex};

/// Write-failure schedule shared across a store's uploads: let the first
/// `allow` writes through, fail the next `fail` writes, then succeed.
struct FailurePlan {
    allow: usize,
    fail: usize,
}

impl FailurePlan {
    /// Whether the next write should fail.
    fn next_write_fails(&mut self) -> bool {
        if self.allow > 0 {
            self.allow -= 1;
            return false;
        }
        if self.fail > 0 {
            self.fail -= 1;
            return true;
        }
        false
    }
}

/// Blob store wrapper whose write streams fail on a schedule. Used to
/// simulate a sink error mid-merge.
pub struct FailingBlobStore {
    inner: Arc<dyn BlobStore>,
    plan: Arc<Mutex<FailurePlan>>,
}

impl FailingBlobStore {
    /// Wrap `inner`: the first `allow` stream writes succeed, the next
    /// `fail` writes error, and everything after succeeds again.
    /// Note: #[allow(dead_code)] because each test file compiles common/ separately.
    #[allow(dead_code)]
    pub fn wrap(inner: Arc<dyn BlobStore>, allow: usize, fail: usize) -> Arc<Self> {
        Arc::new(Self {
            inner,
            plan: Arc::new(Mutex::new(FailurePlan { allow, fail })),
        })
    }
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<BlobMeta> {
        self.inner.head(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        self.inner.get_range(key, start, end).await
    }

    async fn put_stream(
        &self,
        key: &str,
        tags: BlobTags,
    ) -> StorageResult<Box<dyn StreamingUpload>> {
        let inner = self.inner.put_stream(key, tags).await?;
        Ok(Box::new(FailingUpload {
            inner,
            plan: self.plan.clone(),
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

struct FailingUpload {
    inner: Box<dyn StreamingUpload>,
    plan: Arc<Mutex<FailurePlan>>,
}

#[async_trait]
impl StreamingUpload for FailingUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let fails = self.plan.lock().unwrap().next_write_fails();
        if fails {
            return Err(depot_storage::StorageError::Io(std::io::Error::other(
                "injected write failure",
            )));
        }
        self.inner.write(data).await
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        self.inner.finish().await
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        self.inner.abort().await
    }
}
