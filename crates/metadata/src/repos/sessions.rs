//! Upload session repository.

use crate::error::MetadataResult;
use crate::models::SessionRow;
use async_trait::async_trait;
use time::OffsetDateTime;

/// Sort column for session listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    CreatedAt,
    UpdatedAt,
}

impl SortBy {
    pub fn as_column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created_at" => Some(Self::CreatedAt),
            "updated_at" => Some(Self::UpdatedAt),
            _ => None,
        }
    }
}

/// Sort direction for session listings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// Filter and pagination for session listings.
#[derive(Clone, Debug)]
pub struct SessionFilter {
    /// Restrict to one status (stable string form).
    pub status: Option<String>,
    /// 1-based page number.
    pub page: u32,
    /// Page size; clamped to [1, 500].
    pub limit: u32,
    pub sort_by: SortBy,
    pub sort_order: SortOrder,
}

impl Default for SessionFilter {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            limit: 50,
            sort_by: SortBy::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl SessionFilter {
    /// Clamped page size.
    pub fn normalized_limit(&self) -> u32 {
        self.limit.clamp(1, 500)
    }

    /// Row offset for the requested page.
    pub fn offset(&self) -> u32 {
        self.page.saturating_sub(1).saturating_mul(self.normalized_limit())
    }
}

/// One page of session rows plus the unpaginated total.
#[derive(Clone, Debug)]
pub struct SessionPage {
    pub rows: Vec<SessionRow>,
    pub total: u64,
}

/// Repository for upload session records.
///
/// All mutation goes through single-record conditional updates; the
/// `bool` returns report whether the condition held (`rows_affected > 0`).
/// Callers decide what a failed condition means — the store never
/// interprets the state machine.
#[async_trait]
pub trait SessionRepo: Send + Sync {
    /// Insert a new session record. Fails with `AlreadyExists` on a
    /// session-id collision; the uniqueness constraint at the store level
    /// is the authoritative collision guard.
    async fn create_session(&self, session: &SessionRow) -> MetadataResult<()>;

    /// Get a session by ID.
    async fn get_session(&self, session_id: &str) -> MetadataResult<Option<SessionRow>>;

    /// Atomically advance the progress counter from `current` to
    /// `current + 1`. Applied only if the stored counter still equals
    /// `current` and the session is in `uploading` — a compare-and-set,
    /// never a read-modify-write. Returns whether the update applied.
    async fn advance_progress(
        &self,
        session_id: &str,
        current: i64,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Conditionally flip a `pending` or `failed` session to `uploading`
    /// (first accepted chunk, or re-submission after a failed merge).
    /// Clears any previous error message. Returns whether the flip applied.
    async fn mark_uploading(
        &self,
        session_id: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Conditionally transition `uploading` -> `processing` for merge
    /// handoff. Returns whether the transition applied; a false return
    /// means a concurrent caller won or the session moved on.
    async fn begin_processing(
        &self,
        session_id: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Conditionally transition `processing` -> `completed`, recording the
    /// blob reference. Returns whether the transition applied.
    async fn complete_session(
        &self,
        session_id: &str,
        blob_ref: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Conditionally transition `processing` -> `failed`, recording the
    /// error. `count_retry` controls whether the merge retry counter is
    /// incremented (merge failures) or left alone (janitor reclaiming a
    /// stuck session). Returns whether the transition applied.
    async fn fail_session(
        &self,
        session_id: &str,
        error_message: &str,
        count_retry: bool,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Conditionally transition `pending`/`uploading` -> `cancelled`.
    /// Returns whether the transition applied.
    async fn cancel_session(
        &self,
        session_id: &str,
        updated_at: OffsetDateTime,
    ) -> MetadataResult<bool>;

    /// Delete a session record. Returns whether a record existed.
    async fn delete_session(&self, session_id: &str) -> MetadataResult<bool>;

    /// List sessions with filtering, sorting, and pagination.
    async fn list_sessions(&self, filter: &SessionFilter) -> MetadataResult<SessionPage>;

    /// All known session ids. Used by the orphan sweep to reconcile the
    /// staging area against the store.
    async fn list_session_ids(&self) -> MetadataResult<Vec<String>>;

    /// Sessions whose deadline has passed, regardless of status.
    async fn expired_sessions(
        &self,
        now: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<SessionRow>>;

    /// `pending`/`uploading` sessions untouched since `older_than` —
    /// abandoned uploads that never reached completion.
    async fn stale_sessions(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<SessionRow>>;

    /// `processing` sessions untouched since `older_than` — merges whose
    /// process crashed between dispatch and terminal persistence.
    async fn stuck_processing_sessions(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<SessionRow>>;
}
