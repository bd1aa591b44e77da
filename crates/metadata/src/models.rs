//! Database models mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use depot_core::{SessionId, SessionStatus, UploadSession};
use sqlx::FromRow;
use time::OffsetDateTime;

/// Upload session record.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub original_name: String,
    pub mime_type: String,
    pub declared_size: i64,
    pub uploaded_chunks: i64,
    pub total_chunks: i64,
    pub status: String,
    pub blob_ref: Option<String>,
    pub uploaded_by: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

impl SessionRow {
    /// Build a row from a domain session.
    pub fn from_session(session: &UploadSession) -> Self {
        Self {
            session_id: session.id.to_string(),
            original_name: session.original_name.clone(),
            mime_type: session.mime_type.clone(),
            declared_size: session.declared_size as i64,
            uploaded_chunks: i64::from(session.uploaded_chunks),
            total_chunks: i64::from(session.total_chunks),
            status: session.status.as_str().to_string(),
            blob_ref: session.blob_ref.clone(),
            uploaded_by: session.uploaded_by.clone(),
            error_message: session.error_message.clone(),
            retry_count: i64::from(session.retry_count),
            created_at: session.created_at,
            updated_at: session.updated_at,
            expires_at: session.expires_at,
        }
    }

    /// Convert back to the domain type, validating stored fields.
    pub fn into_session(self) -> MetadataResult<UploadSession> {
        let id = SessionId::parse(&self.session_id)
            .map_err(|e| MetadataError::Corrupt(format!("bad session_id: {e}")))?;
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| MetadataError::Corrupt(format!("bad status: {}", self.status)))?;
        let total_chunks = u32::try_from(self.total_chunks)
            .map_err(|_| MetadataError::Corrupt(format!("bad total_chunks: {}", self.total_chunks)))?;
        let uploaded_chunks = u32::try_from(self.uploaded_chunks).map_err(|_| {
            MetadataError::Corrupt(format!("bad uploaded_chunks: {}", self.uploaded_chunks))
        })?;
        let declared_size = u64::try_from(self.declared_size)
            .map_err(|_| MetadataError::Corrupt(format!("bad declared_size: {}", self.declared_size)))?;
        let retry_count = u32::try_from(self.retry_count)
            .map_err(|_| MetadataError::Corrupt(format!("bad retry_count: {}", self.retry_count)))?;

        Ok(UploadSession {
            id,
            original_name: self.original_name,
            mime_type: self.mime_type,
            declared_size,
            total_chunks,
            uploaded_chunks,
            status,
            blob_ref: self.blob_ref,
            uploaded_by: self.uploaded_by,
            error_message: self.error_message,
            retry_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UploadSession {
        UploadSession::new(
            "a.bin".to_string(),
            300,
            "application/octet-stream".to_string(),
            3,
            None,
            time::Duration::hours(24),
        )
    }

    #[test]
    fn test_row_roundtrip() {
        let session = sample();
        let row = SessionRow::from_session(&session);
        let back = row.into_session().unwrap();
        assert_eq!(back.id, session.id);
        assert_eq!(back.status, session.status);
        assert_eq!(back.total_chunks, 3);
        assert_eq!(back.declared_size, 300);
    }

    #[test]
    fn test_corrupt_rows_rejected() {
        let session = sample();

        let mut row = SessionRow::from_session(&session);
        row.status = "open".to_string();
        assert!(matches!(row.into_session(), Err(MetadataError::Corrupt(_))));

        let mut row = SessionRow::from_session(&session);
        row.session_id = "nope".to_string();
        assert!(matches!(row.into_session(), Err(MetadataError::Corrupt(_))));

        let mut row = SessionRow::from_session(&session);
        row.uploaded_chunks = -1;
        assert!(matches!(row.into_session(), Err(MetadataError::Corrupt(_))));
    }
}
