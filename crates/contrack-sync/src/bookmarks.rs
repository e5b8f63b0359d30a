//! Bookmark coordinator: store-backed add/remove/list plus the client-side view that follows the
//! signed-in identity.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use contrack_core::{Bookmark, ContestId, Identity, UserId};
use contrack_storage::{BookmarkStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum BookmarkError {
    #[error("sign in to manage bookmarks")]
    NotAuthenticated,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(UserId),
    SignedOut,
}

/// Publisher side of the auth/session provider. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: Arc<watch::Sender<Identity>>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Identity::Anonymous);
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> Identity {
        self.tx.borrow().clone()
    }

    pub fn publish(&self, event: SessionEvent) {
        let identity = match event {
            SessionEvent::SignedIn(user) => Identity::User(user),
            SessionEvent::SignedOut => Identity::Anonymous,
        };
        self.tx.send_replace(identity);
    }

    pub fn subscribe(&self) -> watch::Receiver<Identity> {
        self.tx.subscribe()
    }
}

/// What the client currently shows. `pending` holds optimistic toggles not yet confirmed by a
/// refetch; `bookmarked` is the persisted set as of the last fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BookmarkView {
    pub identity: Identity,
    pub bookmarked: BTreeSet<ContestId>,
    pub pending: BTreeMap<ContestId, bool>,
}

impl BookmarkView {
    pub fn is_bookmarked(&self, contest: &ContestId) -> bool {
        self.pending
            .get(contest)
            .copied()
            .unwrap_or_else(|| self.bookmarked.contains(contest))
    }
}

/// Stops the session listener when dropped.
pub struct SessionSubscription {
    task: JoinHandle<()>,
}

impl SessionSubscription {
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct BookmarkCoordinator {
    store: Arc<dyn BookmarkStore>,
    view: Arc<watch::Sender<BookmarkView>>,
}

impl BookmarkCoordinator {
    pub fn new(store: Arc<dyn BookmarkStore>) -> Self {
        let (view, _rx) = watch::channel(BookmarkView::default());
        Self {
            store,
            view: Arc::new(view),
        }
    }

    pub async fn add(&self, identity: &Identity, contest: &ContestId) -> Result<(), BookmarkError> {
        let user = identity.user().ok_or(BookmarkError::NotAuthenticated)?;
        let created = self
            .store
            .insert_bookmark(&Bookmark::new(user.clone(), contest.clone(), Utc::now()))
            .await?;
        debug!(user = %user, contest = %contest.as_str(), created, "bookmark add");
        Ok(())
    }

    pub async fn remove(&self, identity: &Identity, contest: &ContestId) -> Result<(), BookmarkError> {
        let user = identity.user().ok_or(BookmarkError::NotAuthenticated)?;
        let removed = self.store.delete_bookmark(user, contest).await?;
        debug!(user = %user, contest = %contest.as_str(), removed, "bookmark remove");
        Ok(())
    }

    pub async fn list(&self, identity: &Identity) -> Result<BTreeSet<ContestId>, BookmarkError> {
        let user = identity.user().ok_or(BookmarkError::NotAuthenticated)?;
        Ok(self
            .store
            .bookmarks_for(user)
            .await?
            .into_iter()
            .map(|b| b.contest_id)
            .collect())
    }

    pub fn view(&self) -> BookmarkView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<BookmarkView> {
        self.view.subscribe()
    }

    /// Switches the view to `identity`, dropping everything held for the previous one.
    pub async fn set_identity(&self, identity: Identity) -> Result<BookmarkView, BookmarkError> {
        self.view.send_replace(BookmarkView {
            identity,
            ..BookmarkView::default()
        });
        self.refresh().await
    }

    /// Replaces the view with the persisted set, discarding any pending toggles.
    pub async fn refresh(&self) -> Result<BookmarkView, BookmarkError> {
        let identity = self.view.borrow().identity.clone();
        let bookmarked = match identity.user() {
            Some(_) => self.list(&identity).await?,
            None => BTreeSet::new(),
        };
        self.view.send_modify(|view| {
            // a session switch may have raced this fetch
            if view.identity == identity {
                view.bookmarked = bookmarked;
                view.pending.clear();
            }
        });
        Ok(self.view())
    }

    /// Flips the bookmark for the signed-in user: optimistic pending state, write-through, then
    /// refetch so the view ends up equal to the persisted set. Returns the persisted state.
    pub async fn toggle(&self, contest: &ContestId) -> Result<bool, BookmarkError> {
        let current = self.view();
        if current.identity.user().is_none() {
            return Err(BookmarkError::NotAuthenticated);
        }
        let desired = !current.is_bookmarked(contest);
        self.view.send_modify(|view| {
            view.pending.insert(contest.clone(), desired);
        });

        let written = if desired {
            self.add(&current.identity, contest).await
        } else {
            self.remove(&current.identity, contest).await
        };
        if let Err(err) = written {
            warn!(contest = %contest.as_str(), %err, "bookmark toggle failed; reverting optimistic state");
            self.view.send_modify(|view| {
                view.pending.remove(contest);
            });
            return Err(err);
        }

        match self.refresh().await {
            Ok(view) => Ok(view.bookmarked.contains(contest)),
            Err(err) => {
                self.view.send_modify(|view| {
                    view.pending.remove(contest);
                });
                Err(err)
            }
        }
    }

    /// Follows session transitions until the returned subscription is dropped.
    pub fn watch_session(&self, session: &SessionHandle) -> SessionSubscription {
        let mut rx = session.subscribe();
        let coordinator = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let identity = rx.borrow_and_update().clone();
                info!(signed_in = identity.user().is_some(), "session identity changed; refetching bookmarks");
                if let Err(err) = coordinator.set_identity(identity).await {
                    warn!(%err, "bookmark refetch after session change failed");
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
        SessionSubscription { task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use contrack_core::{Contest, Platform};
    use contrack_storage::MemoryStore;

    fn cf1() -> ContestId {
        ContestId::from_stored("cf:1")
    }

    fn store() -> Arc<MemoryStore> {
        let start = Utc::now() + ChronoDuration::hours(1);
        Arc::new(MemoryStore::with_contests([Contest {
            id: cf1(),
            name: "Codeforces Round 1".to_string(),
            platform: Platform::Codeforces,
            start_time: start,
            end_time: start + ChronoDuration::hours(2),
            duration_seconds: 7200,
            url: "https://codeforces.com/contest/1".to_string(),
            solution_link: None,
        }]))
    }

    fn user_a() -> Identity {
        Identity::User(UserId::new("userA"))
    }

    async fn wait_for_view(rx: &mut watch::Receiver<BookmarkView>, pred: impl Fn(&BookmarkView) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !pred(&rx.borrow_and_update()) {
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("view never reached the expected state");
    }

    #[tokio::test]
    async fn add_then_remove_round_trips_through_the_store() {
        let coordinator = BookmarkCoordinator::new(store());

        coordinator.add(&user_a(), &cf1()).await.unwrap();
        assert!(coordinator.list(&user_a()).await.unwrap().contains(&cf1()));

        coordinator.remove(&user_a(), &cf1()).await.unwrap();
        assert!(!coordinator.list(&user_a()).await.unwrap().contains(&cf1()));
    }

    #[tokio::test]
    async fn mutators_are_idempotent() {
        let store = store();
        let coordinator = BookmarkCoordinator::new(store.clone());

        coordinator.add(&user_a(), &cf1()).await.unwrap();
        coordinator.add(&user_a(), &cf1()).await.unwrap();
        assert_eq!(store.bookmarks_for(&UserId::new("userA")).await.unwrap().len(), 1);

        coordinator.remove(&user_a(), &cf1()).await.unwrap();
        coordinator.remove(&user_a(), &cf1()).await.unwrap();
        assert!(coordinator.list(&user_a()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn anonymous_callers_are_rejected() {
        let coordinator = BookmarkCoordinator::new(store());
        let anon = Identity::Anonymous;
        assert!(matches!(coordinator.add(&anon, &cf1()).await, Err(BookmarkError::NotAuthenticated)));
        assert!(matches!(coordinator.list(&anon).await, Err(BookmarkError::NotAuthenticated)));
        assert!(matches!(coordinator.toggle(&cf1()).await, Err(BookmarkError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn toggle_settles_on_persisted_state() {
        let store = store();
        let coordinator = BookmarkCoordinator::new(store.clone());
        coordinator.set_identity(user_a()).await.unwrap();

        assert!(coordinator.toggle(&cf1()).await.unwrap());
        let view = coordinator.view();
        assert!(view.pending.is_empty());
        assert!(view.bookmarked.contains(&cf1()));

        // another device removes it; the next fetch wins over what this client believed
        store.delete_bookmark(&UserId::new("userA"), &cf1()).await.unwrap();
        assert!(!coordinator.refresh().await.unwrap().is_bookmarked(&cf1()));
    }

    #[tokio::test]
    async fn failed_toggle_reverts_pending_state() {
        let store = store();
        let coordinator = BookmarkCoordinator::new(store.clone());
        coordinator.set_identity(user_a()).await.unwrap();

        store.set_available(false);
        let err = coordinator.toggle(&cf1()).await.unwrap_err();
        assert!(matches!(err, BookmarkError::Store(_)));
        let view = coordinator.view();
        assert!(view.pending.is_empty());
        assert!(!view.is_bookmarked(&cf1()));
    }

    #[tokio::test]
    async fn unknown_contest_is_reported_and_not_bookmarked() {
        let coordinator = BookmarkCoordinator::new(store());
        coordinator.set_identity(user_a()).await.unwrap();
        let missing = ContestId::from_stored("cf:404");

        let err = coordinator.toggle(&missing).await.unwrap_err();
        assert!(matches!(err, BookmarkError::Store(StoreError::UnknownContest(_))));
        assert!(!coordinator.view().is_bookmarked(&missing));
        assert!(coordinator.list(&user_a()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_transitions_refetch_until_unsubscribed() {
        let store = store();
        store
            .insert_bookmark(&Bookmark::new(UserId::new("userA"), cf1(), Utc::now()))
            .await
            .unwrap();
        let coordinator = BookmarkCoordinator::new(store);
        let session = SessionHandle::new();
        let mut views = coordinator.subscribe_view();

        let subscription = coordinator.watch_session(&session);
        assert!(subscription.is_active());

        session.publish(SessionEvent::SignedIn(UserId::new("userA")));
        wait_for_view(&mut views, |v| v.identity == user_a() && v.bookmarked.contains(&cf1())).await;

        session.publish(SessionEvent::SignedOut);
        wait_for_view(&mut views, |v| v.identity == Identity::Anonymous && v.bookmarked.is_empty()).await;

        subscription.unsubscribe();
        session.publish(SessionEvent::SignedIn(UserId::new("userA")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.view().identity, Identity::Anonymous);
    }
}
