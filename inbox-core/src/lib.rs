//! Roam inbox core
//!
//! Conversation and notification state for the Roam travel app: a store
//! client boundary, a reconciliation engine applying optimistic mutations
//! with rollback, and pure presentation projections for the inbox screens.

mod error;
mod models;
mod state;
mod store;
mod validation;
pub mod view;

pub use error::{InboxError, Result};
pub use models::{
    CategoryFilter, Conversation, Message, MessageKind, Notification, NotificationKind,
    RequestStatus, TYPING_TTL_MS,
};
pub use state::{InboxSnapshot, InboxState};
pub use store::memory::MemoryStore;
pub use store::{ConversationFlag, StoreClient, STORE_TIMEOUT};
