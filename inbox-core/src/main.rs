//! Demo driver: seeds the in-memory store and walks the inbox flows the Roam
//! screens use, logging each step.

use std::collections::HashMap;
use std::sync::Arc;

use roam_inbox::{
    view, CategoryFilter, Conversation, InboxState, MemoryStore, Message, MessageKind,
    Notification, NotificationKind, RequestStatus,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const ME: &str = "user-demo";

fn seed(store: &MemoryStore) {
    let now = chrono::Utc::now().timestamp_millis();

    let mut names = HashMap::new();
    names.insert(ME.to_string(), "You".to_string());
    names.insert("user-ana".to_string(), "Ana Petrova".to_string());
    store.add_conversation(Conversation {
        id: "conv-lisbon".to_string(),
        participant_ids: vec![ME.to_string(), "user-ana".to_string()],
        participant_names: names,
        participant_avatars: HashMap::new(),
        last_message: None,
        last_message_time: 0,
        unread_count: 0,
        muted: false,
        archived: false,
        typing: HashMap::new(),
        trip_id: Some("trip-lisbon".to_string()),
        trip_name: Some("Lisbon long weekend".to_string()),
        carpool_id: None,
    });
    store.append_message(Message {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: "conv-lisbon".to_string(),
        sender_id: "user-ana".to_string(),
        content: "I found a carpool from the airport!".to_string(),
        kind: MessageKind::Text,
        attachment_url: None,
        attachment_name: None,
        timestamp: now - 5 * 60 * 1000,
        read: false,
        read_by: Vec::new(),
    });

    store.add_notification(Notification {
        id: "notif-carpool".to_string(),
        user_id: ME.to_string(),
        kind: NotificationKind::Carpool,
        title: "Carpool request".to_string(),
        body: "Ana wants to join your airport carpool".to_string(),
        data: None,
        read: false,
        action_url: None,
        timestamp: now - 2 * 60 * 1000,
        status: Some(RequestStatus::Pending),
    });
    store.add_notification(Notification {
        id: "notif-packing".to_string(),
        user_id: ME.to_string(),
        kind: NotificationKind::Trip,
        title: "Packing reminder".to_string(),
        body: "Your Lisbon trip starts in 3 days".to_string(),
        data: None,
        read: false,
        action_url: None,
        timestamp: now - 60 * 60 * 1000,
        status: None,
    });
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let store = Arc::new(MemoryStore::new());
    seed(&store);

    let inbox = InboxState::new(store.clone());
    let snapshot = match inbox.load(ME).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            eprintln!("Failed to load inbox: {}", e);
            std::process::exit(1);
        }
    };

    let now = chrono::Utc::now().timestamp_millis();
    for conversation in view::display_conversations(&snapshot) {
        let peer = view::peer_of(&conversation, ME);
        info!(
            conversation = %conversation.id,
            peer = %peer.and_then(|p| p.name).unwrap_or_default(),
            last = conversation.last_message.as_deref().unwrap_or(""),
            when = %view::relative_time(conversation.last_message_time, now),
            unread = conversation.unread_count,
            "conversation"
        );
    }
    info!(
        badge = view::unread_conversation_total(&snapshot),
        notifications = view::unread_notification_count(&snapshot),
        "badges"
    );

    // Approve the carpool request (the carpool service call happens upstream).
    if let Err(e) = inbox
        .apply_status_change("notif-carpool", RequestStatus::Approved)
        .await
    {
        eprintln!("Approval failed: {}", e);
    }

    for n in inbox.filter_by_category(CategoryFilter::Kind(NotificationKind::Carpool)) {
        info!(id = %n.id, title = %n.title, status = ?n.status, "carpool notification");
    }

    if let Err(e) = inbox.apply_mark_all_read(ME).await {
        eprintln!("Mark-all-read failed: {}", e);
    }
    info!(
        notifications = view::unread_notification_count(&inbox.snapshot()),
        "unread notifications after mark-all-read"
    );
}
