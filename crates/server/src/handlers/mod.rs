//! HTTP handlers. Thin wrappers: transport decoding here, semantics in
//! the manager and merge engine.

pub mod blobs;
pub mod health;
pub mod sessions;

pub use blobs::download_blob;
pub use health::health_check;
pub use sessions::{
    cancel_session, complete_session, delete_session, get_session, list_sessions, open_session,
    submit_chunk,
};
