//! Upload session types and lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;
use uuid::Uuid;

/// Unique identifier for an upload session.
///
/// A 128-bit random value rendered as 32 lowercase hex characters. The
/// encoding is part of the public surface: ids round-trip through URLs and
/// staging directory names, so parsing is strict.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from a string. Accepts exactly 32 lowercase hex characters.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.len() != 32 || !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(crate::Error::InvalidSessionId(format!(
                "expected 32 lowercase hex characters, got {:?}",
                s
            )));
        }
        Uuid::try_parse(s)
            .map(Self)
            .map_err(|e| crate::Error::InvalidSessionId(e.to_string()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0.simple())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Upload session status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session created, no chunk accepted yet.
    Pending,
    /// At least one chunk accepted, not all confirmed.
    Uploading,
    /// All chunks confirmed; merge in flight.
    Processing,
    /// Merge finished; blob stored.
    Completed,
    /// Merge failed; chunks retained for re-submission.
    Failed,
    /// Explicitly cancelled by the client.
    Cancelled,
}

impl SessionStatus {
    /// Stable string form used in the store and API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "uploading" => Some(Self::Uploading),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if the session reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Check if the session can still accept chunk submissions.
    pub fn accepts_chunks(&self) -> bool {
        matches!(self, Self::Pending | Self::Uploading | Self::Failed)
    }

    /// The status transition table. The manager consults this before
    /// issuing any store update; the store itself never validates
    /// transitions.
    pub fn can_transition(self, to: Self) -> bool {
        use SessionStatus::*;
        matches!(
            (self, to),
            (Pending, Uploading)
                | (Uploading, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Uploading)
                | (Pending, Cancelled)
                | (Uploading, Cancelled)
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upload session tracking chunked-upload state.
#[derive(Clone, Debug)]
pub struct UploadSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Sanitized display name for the uploaded file.
    pub original_name: String,
    /// Advisory content type.
    pub mime_type: String,
    /// Total byte count declared by the client at creation.
    pub declared_size: u64,
    /// Number of chunks declared at creation; immutable thereafter.
    pub total_chunks: u32,
    /// Count of the contiguous prefix of confirmed chunk indices.
    pub uploaded_chunks: u32,
    /// Current session status.
    pub status: SessionStatus,
    /// Identifier of the finalized blob; set only on completion.
    pub blob_ref: Option<String>,
    /// Who opened the session.
    pub uploaded_by: Option<String>,
    /// Last failure reason.
    pub error_message: Option<String>,
    /// Count of failed merge attempts.
    pub retry_count: u32,
    /// When the session was created.
    pub created_at: OffsetDateTime,
    /// When the session was last updated.
    pub updated_at: OffsetDateTime,
    /// Absolute deadline after which the session is eligible for deletion.
    pub expires_at: OffsetDateTime,
}

impl UploadSession {
    /// Create a new pending session.
    pub fn new(
        original_name: String,
        declared_size: u64,
        mime_type: String,
        total_chunks: u32,
        uploaded_by: Option<String>,
        expires_in: time::Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: SessionId::new(),
            original_name,
            mime_type,
            declared_size,
            total_chunks,
            uploaded_chunks: 0,
            status: SessionStatus::Pending,
            blob_ref: None,
            uploaded_by,
            error_message: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + expires_in,
        }
    }

    /// Fraction of chunks confirmed, computed on read and never stored.
    pub fn progress(&self) -> f64 {
        f64::from(self.uploaded_chunks) / f64::from(self.total_chunks)
    }

    /// Check if the session has passed its deadline.
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }

    /// Whether every declared chunk index has been confirmed.
    pub fn is_complete(&self) -> bool {
        self.uploaded_chunks == self.total_chunks
    }

    /// Build the externally visible view of this session.
    pub fn view(&self) -> SessionView {
        SessionView {
            session_id: self.id.to_string(),
            original_name: self.original_name.clone(),
            mime_type: self.mime_type.clone(),
            declared_size: self.declared_size,
            uploaded_chunks: self.uploaded_chunks,
            total_chunks: self.total_chunks,
            progress: self.progress(),
            status: self.status,
            blob_ref: self.blob_ref.clone(),
            uploaded_by: self.uploaded_by.clone(),
            error_message: self.error_message.clone(),
            retry_count: self.retry_count,
            is_expired: self.is_expired(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        }
    }
}

/// Externally visible session state, as returned by status and list calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionView {
    pub session_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub declared_size: u64,
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub progress: f64,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub is_expired: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

/// Request to open an upload session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenSessionRequest {
    /// Display name for the file; sanitized before storage.
    pub file_name: String,
    /// Total byte count the client intends to upload.
    pub declared_size: u64,
    /// Advisory content type; defaults to a generic binary type.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Number of chunks the client will submit.
    pub total_chunks: u32,
    /// Who is uploading.
    #[serde(default)]
    pub uploaded_by: Option<String>,
}

/// Response from opening a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OpenSessionResponse {
    pub session_id: String,
}

/// Progress snapshot returned from a chunk submission.
///
/// Reports the session's authoritative contiguous-prefix progress, which
/// may be behind the submitted index when chunks arrive out of order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkProgress {
    pub uploaded_chunks: u32,
    pub total_chunks: u32,
    pub progress: f64,
}

/// Response from a completion or cancellation request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
}
