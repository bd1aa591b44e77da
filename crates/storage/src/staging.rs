//! Per-session chunk staging area.
//!
//! One directory per session id, one file per chunk index, named
//! deterministically by the index. The layout is load-bearing: it enables
//! direct existence checks during completion and ordered iteration during
//! merge, and it lets the orphan sweep compare directory names against
//! known session ids.

use crate::error::{StorageError, StorageResult};
use crate::traits::ByteStream;
use bytes::Bytes;
use depot_core::SessionId;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Read buffer size for streaming chunk files (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Filesystem scratch area holding staged chunks for incomplete sessions.
pub struct ChunkStaging {
    root: PathBuf,
}

impl ChunkStaging {
    /// Create a new staging area rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Directory for one session. Session ids are 32 lowercase hex chars,
    /// so joining them cannot escape the root.
    fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    fn chunk_path(&self, session_id: &SessionId, chunk_index: u32) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{chunk_index}.chunk"))
    }

    /// Durably write one chunk's bytes.
    ///
    /// Writes to a uniquely named temp file, fsyncs, then renames into
    /// place, so a crash mid-write never leaves a torn chunk file and
    /// rewriting the same index is idempotent.
    pub async fn write_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u32,
        data: Bytes,
    ) -> StorageResult<()> {
        let path = self.chunk_path(session_id, chunk_index);
        fs::create_dir_all(self.session_dir(session_id)).await?;

        let temp_path = path.with_file_name(format!("{chunk_index}.tmp.{}", Uuid::new_v4()));
        {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
        }
        fs::rename(&temp_path, &path).await?;
        Ok(())
    }

    /// Check whether a chunk file is physically present.
    pub async fn has_chunk(&self, session_id: &SessionId, chunk_index: u32) -> StorageResult<bool> {
        let path = self.chunk_path(session_id, chunk_index);
        fs::try_exists(&path).await.map_err(StorageError::Io)
    }

    /// Stream one chunk's bytes.
    pub async fn read_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u32,
    ) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.chunk_path(session_id, chunk_index);
        let file = fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(format!("{session_id}/{chunk_index}"))
            } else {
                StorageError::Io(e)
            }
        })?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    /// Delete one chunk file. Missing files are not an error.
    pub async fn remove_chunk(
        &self,
        session_id: &SessionId,
        chunk_index: u32,
    ) -> StorageResult<()> {
        let path = self.chunk_path(session_id, chunk_index);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// Delete a session's entire staging directory. Missing directories
    /// are not an error.
    pub async fn remove_session(&self, session_id: &SessionId) -> StorageResult<()> {
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    /// List the session directories physically present in the staging
    /// root. Used by the orphan sweep; entries that do not parse as
    /// session ids are returned as raw names so the sweep can remove them.
    pub async fn list_session_dirs(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(names)
    }

    /// Remove a staging directory by raw name. Only used by the orphan
    /// sweep for directories whose name may not parse as a session id;
    /// the name must be a single path component.
    pub async fn remove_dir_by_name(&self, name: &str) -> StorageResult<()> {
        if name.is_empty()
            || name.contains(['/', '\\'])
            || name.contains("..")
        {
            return Err(StorageError::InvalidKey(format!(
                "unsafe staging directory name: {name}"
            )));
        }
        match fs::remove_dir_all(self.root.join(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}
