use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Document,
}

/// A single message inside a conversation. The inbox list view never fetches
/// these; the store owns them and keeps the conversation's last-message cache
/// in sync when one is appended.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: MessageKind,
    pub attachment_url: Option<String>,
    pub attachment_name: Option<String>,
    pub timestamp: i64,
    pub read: bool,
    /// User ids that have seen this message. Append-only.
    #[serde(default)]
    pub read_by: Vec<String>,
}

impl Message {
    /// Add a reader without disturbing existing entries.
    pub fn mark_seen_by(&mut self, user_id: &str) {
        if !self.read_by.iter().any(|id| id == user_id) {
            self.read_by.push(user_id.to_string());
        }
        self.read = true;
    }
}
