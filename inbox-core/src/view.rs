//! Presentation adapter: pure projections over an inbox snapshot.
//!
//! Every function here is deterministic given (snapshot, now, current user id)
//! and holds no state of its own; the engine's cache is the single source of
//! display truth.

use chrono::{TimeZone, Utc};

use crate::models::{Conversation, Notification, TYPING_TTL_MS};
use crate::state::InboxSnapshot;

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Display identity of the other side of a 1:1 conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    pub id: String,
    pub name: Option<String>,
    pub avatar: Option<String>,
}

/// Conversations in display order: most-recent-first, archived hidden.
pub fn display_conversations(snapshot: &InboxSnapshot) -> Vec<Conversation> {
    let mut conversations: Vec<Conversation> = snapshot
        .conversations
        .iter()
        .filter(|c| !c.archived)
        .cloned()
        .collect();
    conversations.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    conversations
}

/// Same ordering with archived conversations included (the archive screen).
pub fn display_conversations_with_archived(snapshot: &InboxSnapshot) -> Vec<Conversation> {
    let mut conversations = snapshot.conversations.clone();
    conversations.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
    conversations
}

/// Notifications in display order, most-recent-first.
pub fn display_notifications(snapshot: &InboxSnapshot) -> Vec<Notification> {
    let mut notifications = snapshot.notifications.clone();
    notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    notifications
}

/// The first participant that is not the current user, with display metadata.
/// None when the current user is not actually a participant.
pub fn peer_of(conversation: &Conversation, current_user_id: &str) -> Option<Peer> {
    if !conversation
        .participant_ids
        .iter()
        .any(|id| id == current_user_id)
    {
        return None;
    }
    let peer_id = conversation
        .participant_ids
        .iter()
        .find(|id| *id != current_user_id)?;
    Some(Peer {
        id: peer_id.clone(),
        name: conversation.participant_names.get(peer_id).cloned(),
        avatar: conversation.participant_avatars.get(peer_id).cloned(),
    })
}

/// Relative-time label with fixed buckets: under an hour "Nm", under a day
/// "Nh", under two days "Yesterday", anything older a short date. Future
/// timestamps clamp to "0m".
pub fn relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let elapsed = (now_ms - timestamp_ms).max(0);
    if elapsed < HOUR_MS {
        format!("{}m", elapsed / MINUTE_MS)
    } else if elapsed < DAY_MS {
        format!("{}h", elapsed / HOUR_MS)
    } else if elapsed < 2 * DAY_MS {
        "Yesterday".to_string()
    } else {
        match Utc.timestamp_millis_opt(timestamp_ms).single() {
            Some(dt) => dt.format("%b %-d").to_string(),
            None => "—".to_string(),
        }
    }
}

/// Unread messages across unarchived, unmuted conversations (the aggregate
/// inbox badge). Muted conversations keep their own per-row count but stay
/// out of the aggregate.
pub fn unread_conversation_total(snapshot: &InboxSnapshot) -> u32 {
    snapshot
        .conversations
        .iter()
        .filter(|c| !c.muted && !c.archived)
        .map(|c| c.unread_count)
        .sum()
}

/// Unread notification badge.
pub fn unread_notification_count(snapshot: &InboxSnapshot) -> usize {
    snapshot.notifications.iter().filter(|n| !n.read).count()
}

/// Participants composing within the typing window, excluding the current
/// user, sorted for stable display.
pub fn active_typers(conversation: &Conversation, current_user_id: &str, now_ms: i64) -> Vec<String> {
    let mut typers: Vec<String> = conversation
        .typing
        .iter()
        .filter(|(user_id, at)| {
            user_id.as_str() != current_user_id && now_ms - **at < TYPING_TTL_MS
        })
        .map(|(user_id, _)| user_id.clone())
        .collect();
    typers.sort();
    typers
}
