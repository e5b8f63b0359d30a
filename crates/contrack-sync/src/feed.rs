//! Read path: store-backed contest listing with status computed at read time.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use contrack_core::{classify, Contest, ContestId, ContestStatus, Platform, TimeRemaining, UserId};
use contrack_storage::{BookmarkStore, ContestReader, SnapshotCache, StoreError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("contest store unavailable and no cached snapshot to fall back on: {0}")]
    NoData(StoreError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContestQuery {
    #[serde(default)]
    pub status: Option<ContestStatus>,
    #[serde(default)]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub bookmarked_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContestView {
    #[serde(flatten)]
    pub contest: Contest,
    pub status: ContestStatus,
    /// Only set for upcoming contests.
    pub time_remaining: Option<String>,
}

impl ContestView {
    pub fn at(contest: Contest, now: DateTime<Utc>) -> Self {
        let status = classify(&contest, now);
        let time_remaining = (status == ContestStatus::Upcoming)
            .then(|| TimeRemaining::until(contest.start_time, now).to_string());
        Self {
            contest,
            status,
            time_remaining,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    pub contests: Vec<ContestView>,
    /// True when served from the snapshot cache instead of the store.
    pub stale: bool,
    pub warning: Option<String>,
}

pub struct ContestFeed {
    contests: Arc<dyn ContestReader>,
    bookmarks: Arc<dyn BookmarkStore>,
    snapshots: Option<SnapshotCache>,
}

impl ContestFeed {
    pub fn new(contests: Arc<dyn ContestReader>, bookmarks: Arc<dyn BookmarkStore>) -> Self {
        Self {
            contests,
            bookmarks,
            snapshots: None,
        }
    }

    pub fn with_snapshot_cache(mut self, cache: SnapshotCache) -> Self {
        self.snapshots = Some(cache);
        self
    }

    pub async fn list(&self, query: &ContestQuery, now: DateTime<Utc>) -> Result<FeedPage, FeedError> {
        let (contests, stale, warning) = self.load_contests().await?;

        let bookmarked: Option<HashSet<ContestId>> = match &query.bookmarked_by {
            Some(user) => Some(
                self.bookmarks
                    .bookmarks_for(user)
                    .await?
                    .into_iter()
                    .map(|b| b.contest_id)
                    .collect(),
            ),
            None => None,
        };

        let mut views = contests
            .into_iter()
            .filter(|c| query.platform.map_or(true, |p| c.platform == p))
            .filter(|c| bookmarked.as_ref().map_or(true, |ids| ids.contains(&c.id)))
            .map(|c| ContestView::at(c, now))
            .filter(|v| query.status.map_or(true, |s| v.status == s))
            .collect::<Vec<_>>();
        sort_views(&mut views);

        Ok(FeedPage {
            contests: views,
            stale,
            warning,
        })
    }

    pub async fn get(&self, id: &ContestId, now: DateTime<Utc>) -> Result<Option<ContestView>, FeedError> {
        match self.contests.contest(id).await {
            Ok(found) => Ok(found.map(|c| ContestView::at(c, now))),
            Err(err) => {
                let (contests, _, _) = self.fallback(err).await?;
                Ok(contests.into_iter().find(|c| &c.id == id).map(|c| ContestView::at(c, now)))
            }
        }
    }

    async fn load_contests(&self) -> Result<(Vec<Contest>, bool, Option<String>), FeedError> {
        match self.contests.all_contests().await {
            Ok(contests) => Ok((contests, false, None)),
            Err(err) => self.fallback(err).await,
        }
    }

    async fn fallback(&self, err: StoreError) -> Result<(Vec<Contest>, bool, Option<String>), FeedError> {
        warn!(%err, "contest store unavailable; falling back to snapshot cache");
        let Some(cache) = &self.snapshots else {
            return Err(FeedError::NoData(err));
        };
        match cache.load().await {
            Ok(Some(snapshot)) => Ok((
                snapshot.contests,
                true,
                Some(format!(
                    "contest data may be out of date; showing the list saved at {}",
                    snapshot.taken_at.format("%Y-%m-%d %H:%M UTC")
                )),
            )),
            Ok(None) => Err(FeedError::NoData(err)),
            Err(load_err) => {
                warn!(error = %load_err, "snapshot cache unreadable");
                Err(FeedError::NoData(err))
            }
        }
    }
}

/// Ongoing first, then upcoming by soonest start, then past by most recent start.
fn sort_views(views: &mut [ContestView]) {
    views.sort_by_key(|v| {
        let rank = match v.status {
            ContestStatus::Ongoing => 0,
            ContestStatus::Upcoming => 1,
            ContestStatus::Past => 2,
        };
        let ts = v.contest.start_time.timestamp();
        let key = if v.status == ContestStatus::Past { -ts } else { ts };
        (rank, key, v.contest.id.clone())
    });
}
