use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How long a typing entry stays live without fresh activity (milliseconds).
pub const TYPING_TTL_MS: i64 = 10_000;

/// A persistent thread between two or more participants, with the
/// denormalized last-message cache the store maintains for list views.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    /// Ordered participant user ids, 2+ for direct chats.
    pub participant_ids: Vec<String>,
    /// Display metadata keyed by participant id, not authoritative for identity.
    pub participant_names: HashMap<String, String>,
    pub participant_avatars: HashMap<String, String>,
    pub last_message: Option<String>,
    pub last_message_time: i64,
    /// Server-provided; this crate trusts it as-is.
    pub unread_count: u32,
    pub muted: bool,
    pub archived: bool,
    /// user id -> last composing activity (millis). Ephemeral, expires after
    /// TYPING_TTL_MS; never persisted long-term.
    #[serde(default)]
    pub typing: HashMap<String, i64>,
    /// Optional trip/carpool tagging, informational only.
    pub trip_id: Option<String>,
    pub trip_name: Option<String>,
    pub carpool_id: Option<String>,
}

impl Conversation {
    /// Record composing activity for a participant.
    pub fn touch_typing(&mut self, user_id: &str, now_ms: i64) {
        self.typing.insert(user_id.to_string(), now_ms);
    }

    /// Drop typing entries past the inactivity window.
    pub fn prune_typing(&mut self, now_ms: i64) {
        self.typing.retain(|_, at| now_ms - *at < TYPING_TTL_MS);
    }
}
