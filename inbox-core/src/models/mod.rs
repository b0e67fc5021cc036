mod conversation;
mod message;
mod notification;

pub use conversation::{Conversation, TYPING_TTL_MS};
pub use message::{Message, MessageKind};
pub use notification::{CategoryFilter, Notification, NotificationKind, RequestStatus};
