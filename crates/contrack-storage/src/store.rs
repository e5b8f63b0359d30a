use async_trait::async_trait;
use contrack_core::{Bookmark, Contest, ContestId, UserId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable during {operation}: {reason}")]
    Unavailable {
        operation: &'static str,
        reason: String,
    },
    #[error("stored row is corrupt: {0}")]
    CorruptRow(String),
    #[error("no contest with id {0}")]
    UnknownContest(ContestId),
}

impl StoreError {
    pub fn unavailable(operation: &'static str, reason: impl ToString) -> Self {
        Self::Unavailable {
            operation,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Contest reads. Every identity, signed in or not, may hold one.
#[async_trait]
pub trait ContestReader: Send + Sync {
    async fn all_contests(&self) -> Result<Vec<Contest>, StoreError>;

    async fn contest(&self, id: &ContestId) -> Result<Option<Contest>, StoreError>;
}

/// Contest writes, reserved for the privileged aggregation and curation workflows.
#[async_trait]
pub trait ContestWriter: ContestReader {
    /// Insert-or-update keyed by id. A stored non-null `solution_link` is never replaced.
    async fn upsert_contests(&self, contests: &[Contest]) -> Result<UpsertCounts, StoreError>;

    /// Sets the link only when none is stored yet. Returns whether a row changed.
    async fn set_solution_link(&self, id: &ContestId, link: &str) -> Result<bool, StoreError>;
}

/// Bookmark rows. Callers only ever pass their own `UserId`.
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// Inserts if absent. Returns whether a row was created. Fails with `UnknownContest` when the
    /// contest is not stored.
    async fn insert_bookmark(&self, bookmark: &Bookmark) -> Result<bool, StoreError>;

    /// Deletes if present. Returns whether a row was removed.
    async fn delete_bookmark(&self, user: &UserId, contest: &ContestId) -> Result<bool, StoreError>;

    async fn bookmarks_for(&self, user: &UserId) -> Result<Vec<Bookmark>, StoreError>;
}
