//! Durable session metadata store for the depot chunked-upload service.
//!
//! One record per upload session, mutated exclusively through atomic
//! single-record conditional updates. The compare-and-set progress update
//! in [`repos::SessionRepo::advance_progress`] is the synchronization
//! point for concurrent chunk submissions.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::SessionRow;
pub use repos::{SessionFilter, SessionPage, SessionRepo, SortBy, SortOrder};
pub use store::{SessionStore, SqliteStore};

use depot_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a session store from configuration.
pub async fn from_config(config: &MetadataConfig) -> MetadataResult<Arc<dyn SessionStore>> {
    match config {
        MetadataConfig::Sqlite { path } => {
            let store = SqliteStore::new(path).await?;
            Ok(Arc::new(store))
        }
    }
}
