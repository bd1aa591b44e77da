//! Blob store trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Metadata about a stored blob.
#[derive(Clone, Debug)]
pub struct BlobMeta {
    /// Blob size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
}

/// Descriptive metadata attached to a blob at write time.
///
/// The filesystem backend records this alongside the object; other
/// backends may map it onto native object tags. The merge path tags each
/// finalized blob with the session it came from.
#[derive(Clone, Debug, Default)]
pub struct BlobTags {
    /// Display name of the original file.
    pub original_name: Option<String>,
    /// Advisory content type.
    pub mime_type: Option<String>,
    /// Who uploaded the file.
    pub uploaded_by: Option<String>,
}

/// Append-capable blob store abstraction.
///
/// The upload core treats this as opaque: open a write stream, open a read
/// stream, delete by key. Keys are flat, `/`-separated strings.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Check if a blob exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get a blob's size without fetching content.
    async fn head(&self, key: &str) -> StorageResult<BlobMeta>;

    /// Get a blob as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Get a range of bytes from a blob. `end` is exclusive.
    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes>;

    /// Start a streaming write. Nothing is visible under `key` until the
    /// returned upload is finished; an aborted or dropped upload leaves no
    /// readable object behind.
    async fn put_stream(&self, key: &str, tags: BlobTags) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete a blob.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Get the name of this storage backend, for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity. Called at startup before the
    /// server accepts requests.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Trait for streaming blob writes.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data. The call resolves only once the sink has
    /// accepted the bytes, so awaiting it is the backpressure point.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload, making the blob visible, and return the total
    /// bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload, discarding anything written so far.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
