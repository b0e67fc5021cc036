//! In-process implementation of the store contract.
//!
//! Backs the demo binary and the engine tests. Keeps the same denormalized
//! invariants the remote store maintains (last-message cache, per-viewer
//! unread counts, append-only read_by) and supports scripted failure
//! injection so rollback paths can be exercised without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{InboxError, Result};
use crate::models::{Conversation, Message, Notification, RequestStatus};
use crate::store::{ConversationFlag, StoreClient};

pub struct MemoryStore {
    conversations: DashMap<String, Conversation>,
    notifications: DashMap<String, Notification>,
    /// conversation id -> messages, ascending by timestamp.
    messages: DashMap<String, Vec<Message>>,
    /// Script for upcoming calls: Some(err) fails the call, None lets it
    /// through. Consumed front-to-back; an empty script means all calls pass.
    injected_failures: Mutex<VecDeque<Option<InboxError>>>,
    /// Artificial delay applied to every call, for timeout tests.
    latency: Mutex<Option<Duration>>,
    /// Number of fetch_conversations calls served, for coalescing tests.
    fetch_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            conversations: DashMap::new(),
            notifications: DashMap::new(),
            messages: DashMap::new(),
            injected_failures: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Queue an error for the next unscripted store call.
    pub fn fail_next(&self, error: InboxError) {
        self.injected_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Some(error));
    }

    /// Let the next store call through; combined with fail_next this scripts
    /// a failure at any position in a batch.
    pub fn pass_next(&self) {
        self.injected_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(None);
    }

    /// Delay every call by `duration` (None disables).
    pub fn set_latency(&self, duration: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = duration;
    }

    pub fn add_conversation(&self, conversation: Conversation) {
        self.conversations
            .insert(conversation.id.clone(), conversation);
    }

    pub fn add_notification(&self, notification: Notification) {
        self.notifications
            .insert(notification.id.clone(), notification);
    }

    /// Append a message and refresh the owning conversation's last-message
    /// cache, keeping the denormalization invariant.
    pub fn append_message(&self, message: Message) {
        if let Some(mut conversation) = self.conversations.get_mut(&message.conversation_id) {
            conversation.last_message = Some(message.content.clone());
            conversation.last_message_time = message.timestamp;
        }
        self.messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    /// Number of messages in `conversation_id` not yet seen by `viewer_id`
    /// and sent by someone else.
    fn unread_for(&self, conversation_id: &str, viewer_id: &str) -> u32 {
        self.messages
            .get(conversation_id)
            .map(|msgs| {
                msgs.iter()
                    .filter(|m| {
                        m.sender_id != viewer_id && !m.read_by.iter().any(|id| id == viewer_id)
                    })
                    .count() as u32
            })
            .unwrap_or(0)
    }

    async fn checkpoint(&self, op: &str) -> Result<()> {
        let delay = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let injected = self
            .injected_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(Some(error)) = injected {
            debug!(op, %error, "memory store: returning injected failure");
            return Err(error);
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn fetch_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.checkpoint("fetch_conversations").await?;
        let mut conversations: Vec<Conversation> = self
            .conversations
            .iter()
            .filter(|entry| entry.value().participant_ids.iter().any(|id| id == user_id))
            .map(|entry| {
                let mut conversation = entry.value().clone();
                // unread_count is derived per viewer, not stored on the record
                if self.messages.contains_key(&conversation.id) {
                    conversation.unread_count = self.unread_for(&conversation.id, user_id);
                }
                conversation
            })
            .collect();
        conversations.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(conversations)
    }

    async fn fetch_notifications(&self, user_id: &str) -> Result<Vec<Notification>> {
        self.checkpoint("fetch_notifications").await?;
        let mut notifications: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(notifications)
    }

    async fn set_conversation_flag(
        &self,
        conversation_id: &str,
        flag: ConversationFlag,
        value: bool,
    ) -> Result<()> {
        self.checkpoint("set_conversation_flag").await?;
        let mut conversation = self
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| InboxError::NotFound(conversation_id.to_string()))?;
        match flag {
            ConversationFlag::Muted => conversation.muted = value,
            ConversationFlag::Archived => conversation.archived = value,
        }
        Ok(())
    }

    async fn mark_notification_read(&self, notification_id: &str) -> Result<()> {
        self.checkpoint("mark_notification_read").await?;
        let mut notification = self
            .notifications
            .get_mut(notification_id)
            .ok_or_else(|| InboxError::NotFound(notification_id.to_string()))?;
        notification.read = true;
        Ok(())
    }

    async fn mark_all_notifications_read(&self, user_id: &str) -> Result<()> {
        self.checkpoint("mark_all_notifications_read").await?;
        for mut entry in self.notifications.iter_mut() {
            if entry.value().user_id == user_id {
                entry.value_mut().read = true;
            }
        }
        Ok(())
    }

    async fn delete_notification(&self, notification_id: &str) -> Result<()> {
        self.checkpoint("delete_notification").await?;
        // An unknown id was deleted already, or never existed; both succeed.
        self.notifications.remove(notification_id);
        Ok(())
    }

    async fn update_notification_status(
        &self,
        notification_id: &str,
        status: RequestStatus,
    ) -> Result<()> {
        self.checkpoint("update_notification_status").await?;
        let mut notification = self
            .notifications
            .get_mut(notification_id)
            .ok_or_else(|| InboxError::NotFound(notification_id.to_string()))?;
        if notification.status != Some(RequestStatus::Pending) {
            return Err(InboxError::InvalidTransition(notification_id.to_string()));
        }
        notification.status = Some(status);
        Ok(())
    }
}
