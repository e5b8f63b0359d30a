use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use contrack_core::{Bookmark, Contest, ContestId, UserId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{BookmarkStore, ContestReader, ContestWriter, StoreError, UpsertCounts};

/// In-process store with the same upsert semantics as the Postgres store.
///
/// Used when no `DATABASE_URL` is configured and throughout the tests. `set_available(false)`
/// makes every call fail with `StoreError::Unavailable`.
#[derive(Debug)]
pub struct MemoryStore {
    contests: RwLock<BTreeMap<ContestId, Contest>>,
    bookmarks: RwLock<BTreeMap<Uuid, Bookmark>>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            contests: RwLock::new(BTreeMap::new()),
            bookmarks: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn with_contests(contests: impl IntoIterator<Item = Contest>) -> Self {
        let map = contests.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            contests: RwLock::new(map),
            ..Self::new()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::unavailable(operation, "memory store switched offline"))
        }
    }
}

#[async_trait]
impl ContestReader for MemoryStore {
    async fn all_contests(&self) -> Result<Vec<Contest>, StoreError> {
        self.check("all_contests")?;
        Ok(self.contests.read().await.values().cloned().collect())
    }

    async fn contest(&self, id: &ContestId) -> Result<Option<Contest>, StoreError> {
        self.check("contest")?;
        Ok(self.contests.read().await.get(id).cloned())
    }
}

#[async_trait]
impl ContestWriter for MemoryStore {
    async fn upsert_contests(&self, contests: &[Contest]) -> Result<UpsertCounts, StoreError> {
        self.check("upsert_contests")?;
        let mut rows = self.contests.write().await;
        let mut counts = UpsertCounts::default();
        for incoming in contests {
            match rows.get_mut(&incoming.id) {
                Some(existing) => {
                    let mut merged = incoming.clone();
                    if existing.solution_link.is_some() {
                        merged.solution_link = existing.solution_link.clone();
                    }
                    if *existing == merged {
                        counts.unchanged += 1;
                    } else {
                        *existing = merged;
                        counts.updated += 1;
                    }
                }
                None => {
                    rows.insert(incoming.id.clone(), incoming.clone());
                    counts.inserted += 1;
                }
            }
        }
        Ok(counts)
    }

    async fn set_solution_link(&self, id: &ContestId, link: &str) -> Result<bool, StoreError> {
        self.check("set_solution_link")?;
        let mut rows = self.contests.write().await;
        match rows.get_mut(id) {
            Some(contest) if contest.solution_link.is_none() => {
                contest.solution_link = Some(link.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl BookmarkStore for MemoryStore {
    async fn insert_bookmark(&self, bookmark: &Bookmark) -> Result<bool, StoreError> {
        self.check("insert_bookmark")?;
        if !self.contests.read().await.contains_key(&bookmark.contest_id) {
            return Err(StoreError::UnknownContest(bookmark.contest_id.clone()));
        }
        let mut rows = self.bookmarks.write().await;
        if rows.contains_key(&bookmark.id) {
            return Ok(false);
        }
        rows.insert(bookmark.id, bookmark.clone());
        Ok(true)
    }

    async fn delete_bookmark(&self, user: &UserId, contest: &ContestId) -> Result<bool, StoreError> {
        self.check("delete_bookmark")?;
        let key = Bookmark::key(user, contest);
        Ok(self.bookmarks.write().await.remove(&key).is_some())
    }

    async fn bookmarks_for(&self, user: &UserId) -> Result<Vec<Bookmark>, StoreError> {
        self.check("bookmarks_for")?;
        let mut out = self
            .bookmarks
            .read()
            .await
            .values()
            .filter(|b| &b.user_id == user)
            .cloned()
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.contest_id.cmp(&b.contest_id)));
        Ok(out)
    }
}
