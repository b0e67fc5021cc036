use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{InboxError, Result};
use crate::models::{Conversation, Notification, RequestStatus};

pub mod memory;

/// Upper bound on any single store call before it is treated as unavailable.
pub const STORE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationFlag {
    Muted,
    Archived,
}

/// Contract with the remote document store that owns all durable inbox state.
///
/// The client holds a cached, possibly stale projection of these records;
/// every mutation here is the confirmation step of an optimistic local update.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// All conversations the user participates in, most-recent-first.
    async fn fetch_conversations(&self, user_id: &str) -> Result<Vec<Conversation>>;

    /// All notifications owned by the user, most-recent-first.
    async fn fetch_notifications(&self, user_id: &str) -> Result<Vec<Notification>>;

    /// Idempotent. Fails with NotFound for an unknown conversation id.
    async fn set_conversation_flag(
        &self,
        conversation_id: &str,
        flag: ConversationFlag,
        value: bool,
    ) -> Result<()>;

    /// Idempotent.
    async fn mark_notification_read(&self, notification_id: &str) -> Result<()>;

    /// Idempotent, single batched write for every unread notification.
    async fn mark_all_notifications_read(&self, user_id: &str) -> Result<()>;

    /// Idempotent; deleting an id the store no longer has is a no-op success.
    async fn delete_notification(&self, notification_id: &str) -> Result<()>;

    /// Carpool join-request approval only. Fails with InvalidTransition when
    /// the notification has no pending status to transition from.
    async fn update_notification_status(
        &self,
        notification_id: &str,
        status: RequestStatus,
    ) -> Result<()>;
}

/// Bound a store call; an elapsed timeout is indistinguishable from any other
/// transport failure to callers.
pub(crate) async fn with_timeout<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(STORE_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(InboxError::Unavailable("store call timed out".to_string())),
    }
}
