//! HTTP server and upload engine for the depot chunked-upload service.
//!
//! The session manager, merge engine, and janitor live here; the HTTP
//! handlers are thin adapters over them.

pub mod admission;
pub mod error;
pub mod handlers;
pub mod janitor;
pub mod manager;
pub mod merge;
pub mod routes;
pub mod state;

pub use admission::{AdmissionControl, AllowAll};
pub use error::{ApiError, ApiResult};
pub use janitor::JanitorService;
pub use manager::UploadSessionManager;
pub use merge::MergeEngine;
pub use routes::create_router;
pub use state::AppState;
