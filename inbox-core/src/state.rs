//! Reconciliation engine: an in-memory, per-user view of conversations and
//! notifications, kept consistent with the latest known server state.
//!
//! Mutations apply optimistically, then confirm against the store; a failed
//! confirmation rolls the cache back to its pre-mutation value before the
//! error reaches the caller. Mutations on the same entity id serialize behind
//! a per-id lock; distinct ids proceed concurrently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::{InboxError, Result};
use crate::models::{CategoryFilter, Conversation, Notification, RequestStatus};
use crate::store::{with_timeout, ConversationFlag, StoreClient};
use crate::validation::{validate_id, validate_id_set};

/// Settled view of one user's inbox, as of the last completed load plus any
/// optimistic mutations since.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboxSnapshot {
    pub user_id: String,
    pub conversations: Vec<Conversation>,
    pub notifications: Vec<Notification>,
}

type LoadResult = Result<InboxSnapshot>;
type LoadReceiver = watch::Receiver<Option<LoadResult>>;

/// Clears a user's pending-load entry if the owning load future is dropped
/// before it settles; without this, a cancelled load would leave a dead
/// channel in the map and wedge every later load for that user.
struct PendingLoadGuard<'a> {
    pending: &'a DashMap<String, LoadReceiver>,
    user_id: &'a str,
    armed: bool,
}

impl PendingLoadGuard<'_> {
    /// Normal completion: remove the entry now, before the result is sent,
    /// so late joiners fetch fresh state instead of adopting a settled one.
    fn settle(mut self) {
        self.armed = false;
        self.pending.remove(self.user_id);
    }
}

impl Drop for PendingLoadGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.remove(self.user_id);
        }
    }
}

pub struct InboxState<S: StoreClient> {
    store: Arc<S>,
    cache: RwLock<InboxSnapshot>,
    /// entity id -> serialization lock for in-flight mutations on that entity.
    entity_locks: DashMap<String, Arc<Mutex<()>>>,
    /// user id -> channel carrying the result of that user's in-flight load.
    pending_loads: DashMap<String, LoadReceiver>,
    /// Bumped when a load starts; a completing load only installs its result
    /// while it is still the latest.
    load_epoch: AtomicU64,
}

impl<S: StoreClient> InboxState<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: RwLock::new(InboxSnapshot::default()),
            entity_locks: DashMap::new(),
            pending_loads: DashMap::new(),
            load_epoch: AtomicU64::new(0),
        }
    }

    // Lock poisoning only happens after a panic inside a critical section;
    // the cache is still structurally valid, so recover the guard.
    fn cache_read(&self) -> RwLockReadGuard<'_, InboxSnapshot> {
        self.cache.read().unwrap_or_else(|e| e.into_inner())
    }

    fn cache_write(&self) -> RwLockWriteGuard<'_, InboxSnapshot> {
        self.cache.write().unwrap_or_else(|e| e.into_inner())
    }

    fn entity_lock(&self, id: &str) -> Arc<Mutex<()>> {
        self.entity_locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Lock a set of entity ids in sorted order, so concurrent batch
    /// operations over overlapping sets cannot deadlock.
    async fn lock_many(&self, ids: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let mut sorted: Vec<&String> = ids.iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.entity_lock(id).lock_owned().await);
        }
        guards
    }

    /// Cheap copy of the current cache for the presentation layer.
    pub fn snapshot(&self) -> InboxSnapshot {
        self.cache_read().clone()
    }

    /// Fetch conversations and notifications for `user_id`, replacing the
    /// entire cache. Concurrent loads for the same user coalesce into one
    /// fetch; every caller receives the same settled snapshot. A load that
    /// finishes after a newer load started (for a different user) discards
    /// its result instead of clobbering the newer cache.
    pub async fn load(&self, user_id: &str) -> LoadResult {
        validate_id(user_id)?;

        let (tx, rx) = watch::channel(None);
        match self.pending_loads.entry(user_id.to_string()) {
            Entry::Occupied(existing) => {
                let rx = existing.get().clone();
                drop(existing);
                debug!(user_id, "load: joining in-flight fetch");
                return Self::await_pending(rx).await;
            }
            Entry::Vacant(slot) => {
                slot.insert(rx);
            }
        }
        let cleanup = PendingLoadGuard {
            pending: &self.pending_loads,
            user_id,
            armed: true,
        };

        let epoch = self.load_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.fetch_snapshot(user_id).await;

        if let Ok(snapshot) = &result {
            if self.load_epoch.load(Ordering::SeqCst) == epoch {
                *self.cache_write() = snapshot.clone();
                info!(
                    user_id,
                    conversations = snapshot.conversations.len(),
                    notifications = snapshot.notifications.len(),
                    "inbox loaded"
                );
            } else {
                debug!(user_id, "load: superseded by a newer load, discarding");
            }
        }
        self.prune_idle_entity_locks();

        cleanup.settle();
        let _ = tx.send(Some(result.clone()));
        result
    }

    /// Drop lock-table entries nobody holds anymore, so the table tracks the
    /// working set of in-flight mutations instead of every id ever touched.
    fn prune_idle_entity_locks(&self) {
        self.entity_locks
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    async fn fetch_snapshot(&self, user_id: &str) -> LoadResult {
        let (conversations, notifications) = tokio::join!(
            with_timeout(self.store.fetch_conversations(user_id)),
            with_timeout(self.store.fetch_notifications(user_id)),
        );
        Ok(InboxSnapshot {
            user_id: user_id.to_string(),
            conversations: conversations?,
            notifications: notifications?,
        })
    }

    async fn await_pending(mut rx: LoadReceiver) -> LoadResult {
        loop {
            let settled = rx.borrow().clone();
            if let Some(result) = settled {
                return result;
            }
            if rx.changed().await.is_err() {
                return Err(InboxError::Unavailable(
                    "in-flight load dropped".to_string(),
                ));
            }
        }
    }

    /// Mute or unmute a conversation, optimistically.
    pub async fn apply_mute(&self, conversation_id: &str, value: bool) -> Result<()> {
        self.apply_flag(conversation_id, ConversationFlag::Muted, value)
            .await
    }

    /// Archive or unarchive a conversation, optimistically. Archiving is the
    /// terminal soft-delete state; conversations are never hard-deleted here.
    pub async fn apply_archive(&self, conversation_id: &str, value: bool) -> Result<()> {
        self.apply_flag(conversation_id, ConversationFlag::Archived, value)
            .await
    }

    async fn apply_flag(
        &self,
        conversation_id: &str,
        flag: ConversationFlag,
        value: bool,
    ) -> Result<()> {
        validate_id(conversation_id)?;
        let lock = self.entity_lock(conversation_id);
        let _guard = lock.lock().await;

        let previous = {
            let mut cache = self.cache_write();
            let conversation = cache
                .conversations
                .iter_mut()
                .find(|c| c.id == conversation_id)
                .ok_or_else(|| InboxError::NotFound(conversation_id.to_string()))?;
            match flag {
                ConversationFlag::Muted => std::mem::replace(&mut conversation.muted, value),
                ConversationFlag::Archived => std::mem::replace(&mut conversation.archived, value),
            }
        };

        let confirmed =
            with_timeout(self.store.set_conversation_flag(conversation_id, flag, value)).await;
        if let Err(error) = confirmed {
            warn!(conversation_id, %error, "flag update failed, rolling back");
            let mut cache = self.cache_write();
            if let Some(conversation) = cache
                .conversations
                .iter_mut()
                .find(|c| c.id == conversation_id)
            {
                match flag {
                    ConversationFlag::Muted => conversation.muted = previous,
                    ConversationFlag::Archived => conversation.archived = previous,
                }
            }
            return Err(error);
        }
        Ok(())
    }

    /// Mark one notification read, optimistically.
    pub async fn apply_mark_read(&self, notification_id: &str) -> Result<()> {
        validate_id(notification_id)?;
        let lock = self.entity_lock(notification_id);
        let _guard = lock.lock().await;

        let previous = {
            let mut cache = self.cache_write();
            let notification = cache
                .notifications
                .iter_mut()
                .find(|n| n.id == notification_id)
                .ok_or_else(|| InboxError::NotFound(notification_id.to_string()))?;
            std::mem::replace(&mut notification.read, true)
        };

        let confirmed = with_timeout(self.store.mark_notification_read(notification_id)).await;
        if let Err(error) = confirmed {
            warn!(notification_id, %error, "mark-read failed, rolling back");
            let mut cache = self.cache_write();
            if let Some(notification) = cache
                .notifications
                .iter_mut()
                .find(|n| n.id == notification_id)
            {
                notification.read = previous;
            }
            return Err(error);
        }
        Ok(())
    }

    /// Mark every cached unread notification read, with a single batched
    /// server call. Rollback restores exactly the flags that were flipped.
    pub async fn apply_mark_all_read(&self, user_id: &str) -> Result<()> {
        validate_id(user_id)?;

        let unread_ids: Vec<String> = self
            .cache_read()
            .notifications
            .iter()
            .filter(|n| !n.read)
            .map(|n| n.id.clone())
            .collect();
        if unread_ids.is_empty() {
            return Ok(());
        }
        let _guards = self.lock_many(&unread_ids).await;

        let flipped: Vec<String> = {
            let mut cache = self.cache_write();
            let mut flipped = Vec::new();
            for notification in cache.notifications.iter_mut() {
                if !notification.read {
                    notification.read = true;
                    flipped.push(notification.id.clone());
                }
            }
            flipped
        };

        let confirmed = with_timeout(self.store.mark_all_notifications_read(user_id)).await;
        if let Err(error) = confirmed {
            warn!(user_id, %error, "mark-all-read failed, rolling back");
            let mut cache = self.cache_write();
            for notification in cache.notifications.iter_mut() {
                if flipped.iter().any(|id| *id == notification.id) {
                    notification.read = false;
                }
            }
            return Err(error);
        }
        Ok(())
    }

    /// Delete one notification, optimistically. The store's delete is
    /// idempotent, so an id missing from the cache is still sent through.
    pub async fn apply_delete(&self, notification_id: &str) -> Result<()> {
        validate_id(notification_id)?;
        let lock = self.entity_lock(notification_id);
        let _guard = lock.lock().await;

        let removed = {
            let mut cache = self.cache_write();
            let position = cache
                .notifications
                .iter()
                .position(|n| n.id == notification_id);
            position.map(|index| (index, cache.notifications.remove(index)))
        };

        let confirmed = with_timeout(self.store.delete_notification(notification_id)).await;
        if let Err(error) = confirmed {
            warn!(notification_id, %error, "delete failed, restoring");
            if let Some((index, notification)) = removed {
                let mut cache = self.cache_write();
                let index = index.min(cache.notifications.len());
                cache.notifications.insert(index, notification);
            }
            return Err(error);
        }
        Ok(())
    }

    /// Delete a batch of notifications. All-or-nothing from the caller's
    /// perspective: on any failure the full original set is restored in its
    /// original relative order.
    pub async fn apply_delete_many(&self, notification_ids: &[String]) -> Result<()> {
        validate_id_set(notification_ids)?;
        let _guards = self.lock_many(notification_ids).await;

        // Remove everything up front so no partial state is ever visible.
        let mut removed: Vec<(usize, Notification)> = {
            let mut cache = self.cache_write();
            let mut removed = Vec::new();
            for id in notification_ids {
                if let Some(index) = cache.notifications.iter().position(|n| n.id == *id) {
                    removed.push((index, cache.notifications.remove(index)));
                }
            }
            removed
        };

        for id in notification_ids {
            let confirmed = with_timeout(self.store.delete_notification(id)).await;
            if let Err(error) = confirmed {
                warn!(
                    notification_id = id.as_str(),
                    %error,
                    "batch delete failed, restoring full set"
                );
                let mut cache = self.cache_write();
                // Undo-stack order: reinserting the last removal first puts
                // every notification back at its recorded index.
                for (index, notification) in std::mem::take(&mut removed).into_iter().rev() {
                    let index = index.min(cache.notifications.len());
                    cache.notifications.insert(index, notification);
                }
                return Err(error);
            }
        }
        Ok(())
    }

    /// Reflect a carpool join-request status that an external carpool service
    /// has already transitioned, then confirm it against the store.
    pub async fn apply_status_change(
        &self,
        notification_id: &str,
        status: RequestStatus,
    ) -> Result<()> {
        validate_id(notification_id)?;
        let lock = self.entity_lock(notification_id);
        let _guard = lock.lock().await;

        let previous = {
            let mut cache = self.cache_write();
            let notification = cache
                .notifications
                .iter_mut()
                .find(|n| n.id == notification_id)
                .ok_or_else(|| InboxError::NotFound(notification_id.to_string()))?;
            std::mem::replace(&mut notification.status, Some(status))
        };

        let confirmed =
            with_timeout(self.store.update_notification_status(notification_id, status)).await;
        if let Err(error) = confirmed {
            warn!(notification_id, %error, "status change failed, rolling back");
            let mut cache = self.cache_write();
            if let Some(notification) = cache
                .notifications
                .iter_mut()
                .find(|n| n.id == notification_id)
            {
                notification.status = previous;
            }
            return Err(error);
        }
        Ok(())
    }

    /// Record composing activity. Ephemeral and local-only; entries lapse
    /// after the typing window and are never written to the store.
    pub fn set_typing(&self, conversation_id: &str, user_id: &str, now_ms: i64) {
        let mut cache = self.cache_write();
        if let Some(conversation) = cache
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            conversation.touch_typing(user_id, now_ms);
            conversation.prune_typing(now_ms);
        }
    }

    /// Case-insensitive substring match over participant display names and
    /// last-message text. Pure: repeated calls over the same cache and query
    /// return identical ordered results.
    pub fn search(&self, query: &str) -> Vec<Conversation> {
        let needle = query.to_lowercase();
        self.cache_read()
            .conversations
            .iter()
            .filter(|conversation| {
                conversation
                    .participant_names
                    .values()
                    .any(|name| name.to_lowercase().contains(&needle))
                    || conversation
                        .last_message
                        .as_deref()
                        .map(|text| text.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Cached notifications of one category (or all), original order kept.
    pub fn filter_by_category(&self, filter: CategoryFilter) -> Vec<Notification> {
        self.cache_read()
            .notifications
            .iter()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect()
    }
}
