//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum declared size for a single uploaded file, in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Maximum size of a single chunk body, in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Maximum number of chunks a session may declare.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: u32,
    /// Session time-to-live in seconds; sessions past this deadline are
    /// eligible for deletion regardless of status.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}

fn default_max_chunk_size() -> u64 {
    32 * 1024 * 1024 // 32 MiB
}

fn default_max_chunks() -> u32 {
    10_000
}

fn default_session_ttl_secs() -> u64 {
    86400 // 24 hours
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_file_size: default_max_file_size(),
            max_chunk_size: default_max_chunk_size(),
            max_chunks: default_max_chunks(),
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl ServerConfig {
    /// Get the session TTL as a Duration.
    pub fn session_ttl(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_file_size == 0 {
            return Err("server.max_file_size cannot be 0".to_string());
        }
        if self.max_chunk_size == 0 {
            return Err("server.max_chunk_size cannot be 0".to_string());
        }
        if self.max_chunks == 0 {
            return Err("server.max_chunks cannot be 0".to_string());
        }
        if self.session_ttl_secs == 0 {
            return Err("server.session_ttl_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Blob storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage.
    Filesystem {
        /// Root directory for finalized blobs.
        path: PathBuf,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/blobs"),
        }
    }
}

/// Chunk staging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Root directory for the per-session chunk scratch area.
    #[serde(default = "default_staging_path")]
    pub path: PathBuf,
}

fn default_staging_path() -> PathBuf {
    PathBuf::from("./data/staging")
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            path: default_staging_path(),
        }
    }
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
        }
    }
}

/// Janitor sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Interval in seconds between expiry sweeps.
    #[serde(default = "default_expire_interval_secs")]
    pub expire_interval_secs: u64,
    /// Interval in seconds between staleness sweeps.
    #[serde(default = "default_stale_interval_secs")]
    pub stale_interval_secs: u64,
    /// Age in seconds past which an untouched in-flight session is
    /// considered abandoned.
    #[serde(default = "default_stale_window_secs")]
    pub stale_window_secs: u64,
    /// Interval in seconds between orphan reconciliation sweeps.
    #[serde(default = "default_orphan_interval_secs")]
    pub orphan_interval_secs: u64,
    /// Maximum sessions processed per sweep cycle.
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: u32,
}

fn default_expire_interval_secs() -> u64 {
    3600 // hourly
}

fn default_stale_interval_secs() -> u64 {
    7200 // every 2 hours
}

fn default_stale_window_secs() -> u64 {
    7200 // 2 hours
}

fn default_orphan_interval_secs() -> u64 {
    21600 // every 6 hours
}

fn default_sweep_batch_size() -> u32 {
    500
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            expire_interval_secs: default_expire_interval_secs(),
            stale_interval_secs: default_stale_interval_secs(),
            stale_window_secs: default_stale_window_secs(),
            orphan_interval_secs: default_orphan_interval_secs(),
            batch_size: default_sweep_batch_size(),
        }
    }
}

impl JanitorConfig {
    /// Get the expiry sweep interval as a std Duration.
    pub fn expire_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.expire_interval_secs)
    }

    /// Get the staleness sweep interval as a std Duration.
    pub fn stale_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stale_interval_secs)
    }

    /// Get the staleness window as a time Duration.
    pub fn stale_window(&self) -> Duration {
        let secs = i64::try_from(self.stale_window_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Get the orphan sweep interval as a std Duration.
    pub fn orphan_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.orphan_interval_secs)
    }

    /// Validate janitor configuration for dangerous settings.
    pub fn validate(&self) -> Result<(), String> {
        // A zero interval would make tokio::time::interval panic.
        for (name, value) in [
            ("janitor.expire_interval_secs", self.expire_interval_secs),
            ("janitor.stale_interval_secs", self.stale_interval_secs),
            ("janitor.orphan_interval_secs", self.orphan_interval_secs),
        ] {
            if value == 0 {
                return Err(format!("{name} cannot be 0"));
            }
        }
        if self.batch_size == 0 {
            return Err("janitor.batch_size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Blob storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chunk staging configuration.
    #[serde(default)]
    pub staging: StagingConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Janitor sweep configuration.
    #[serde(default)]
    pub janitor: JanitorConfig,
}

impl AppConfig {
    /// Validate all sections, failing on the first error.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.janitor.validate()?;
        Ok(())
    }
}
