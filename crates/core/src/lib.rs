//! Core domain types and shared logic for the depot chunked-upload service.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Session identifiers and the upload session lifecycle
//! - The session status state machine
//! - Display-name sanitization
//! - Configuration types

pub mod config;
pub mod error;
pub mod filename;
pub mod session;

pub use error::{Error, Result};
pub use filename::sanitize_file_name;
pub use session::{
    ChunkProgress, OpenSessionRequest, OpenSessionResponse, SessionId, SessionStatus, SessionView,
    StatusResponse, UploadSession,
};

/// Default MIME type when the client declares none.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Maximum length of a sanitized display name.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Tolerance between declared and merged size before a warning is logged (bytes).
pub const DECLARED_SIZE_TOLERANCE: u64 = 1024;
