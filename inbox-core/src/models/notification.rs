use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Trip,
    Shopping,
    System,
    Carpool,
}

/// Approval state for carpool join-request notifications. Absent on every
/// other notification kind.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

/// A user-owned, typed event record. Created server-side; this crate only
/// marks it read, transitions its status, or deletes it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub data: Option<serde_json::Value>,
    pub read: bool,
    pub action_url: Option<String>,
    pub timestamp: i64,
    pub status: Option<RequestStatus>,
}

/// Category selector for the notification list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryFilter {
    All,
    Kind(NotificationKind),
}

impl CategoryFilter {
    pub fn matches(&self, notification: &Notification) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Kind(kind) => notification.kind == *kind,
        }
    }
}
