//! Integration tests for the reconciliation engine.
//!
//! These run the engine against the in-memory store with scripted failures
//! and latency to verify optimistic updates, rollback, load coalescing, and
//! per-entity serialization end to end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use roam_inbox::{
    CategoryFilter, Conversation, InboxError, InboxState, MemoryStore, Notification,
    NotificationKind, RequestStatus, StoreClient,
};

fn conversation(id: &str, user: &str, peer: &str, peer_name: &str, last: &str, last_time: i64) -> Conversation {
    let mut names = HashMap::new();
    names.insert(peer.to_string(), peer_name.to_string());
    Conversation {
        id: id.to_string(),
        participant_ids: vec![user.to_string(), peer.to_string()],
        participant_names: names,
        participant_avatars: HashMap::new(),
        last_message: Some(last.to_string()),
        last_message_time: last_time,
        unread_count: 0,
        muted: false,
        archived: false,
        typing: HashMap::new(),
        trip_id: None,
        trip_name: None,
        carpool_id: None,
    }
}

fn notification(id: &str, user: &str, kind: NotificationKind, ts: i64) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: user.to_string(),
        kind,
        title: format!("title {}", id),
        body: format!("body {}", id),
        data: None,
        read: false,
        action_url: None,
        timestamp: ts,
        status: None,
    }
}

async fn fixture() -> (Arc<MemoryStore>, Arc<InboxState<MemoryStore>>) {
    let store = Arc::new(MemoryStore::new());
    store.add_conversation(conversation("c1", "u1", "p1", "Ana Petrova", "see you soon", 300));
    store.add_conversation(conversation("c2", "u1", "p2", "Ben Okafor", "got the tent", 200));
    store.add_notification(notification("n1", "u1", NotificationKind::Trip, 100));
    store.add_notification(notification("n2", "u1", NotificationKind::Carpool, 200));
    store.add_notification(notification("n3", "u1", NotificationKind::Shopping, 300));

    let state = Arc::new(InboxState::new(store.clone()));
    state.load("u1").await.unwrap();
    (store, state)
}

fn read_flags(state: &InboxState<MemoryStore>) -> Vec<(String, bool)> {
    state
        .snapshot()
        .notifications
        .iter()
        .map(|n| (n.id.clone(), n.read))
        .collect()
}

#[tokio::test]
async fn test_mute_failure_rolls_back_after_optimistic_update() {
    let (store, state) = fixture().await;

    store.set_latency(Some(Duration::from_millis(80)));
    store.fail_next(InboxError::Unavailable("network down".to_string()));

    let task = {
        let state = state.clone();
        tokio::spawn(async move { state.apply_mute("c1", true).await })
    };

    // Mid-flight, the optimistic value is visible.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let mid = state.snapshot();
    assert!(mid.conversations.iter().find(|c| c.id == "c1").unwrap().muted);

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err, InboxError::Unavailable("network down".to_string()));

    // Rolled back after the failure surfaced.
    let after = state.snapshot();
    assert!(!after.conversations.iter().find(|c| c.id == "c1").unwrap().muted);
}

#[tokio::test]
async fn test_archive_success_sticks() {
    let (store, state) = fixture().await;
    state.apply_archive("c2", true).await.unwrap();

    let snapshot = state.snapshot();
    assert!(snapshot.conversations.iter().find(|c| c.id == "c2").unwrap().archived);

    let server = store.fetch_conversations("u1").await.unwrap();
    assert!(server.iter().find(|c| c.id == "c2").unwrap().archived);

    // Reversible: unarchive brings it back.
    state.apply_archive("c2", false).await.unwrap();
    assert!(!state.snapshot().conversations.iter().find(|c| c.id == "c2").unwrap().archived);
}

#[tokio::test]
async fn test_delete_many_is_all_or_nothing() {
    let (store, state) = fixture().await;
    let before = state.snapshot().notifications;

    // First delete passes, second fails mid-batch.
    store.pass_next();
    store.fail_next(InboxError::Unavailable("flaky".to_string()));

    let ids = vec!["n3".to_string(), "n1".to_string()];
    let err = state.apply_delete_many(&ids).await.unwrap_err();
    assert_eq!(err, InboxError::Unavailable("flaky".to_string()));

    // Cache identical to its pre-call state, including order.
    assert_eq!(state.snapshot().notifications, before);
}

#[tokio::test]
async fn test_delete_many_removes_all_on_success() {
    let (_store, state) = fixture().await;
    let ids = vec!["n1".to_string(), "n3".to_string()];
    state.apply_delete_many(&ids).await.unwrap();

    let remaining: Vec<String> = state
        .snapshot()
        .notifications
        .iter()
        .map(|n| n.id.clone())
        .collect();
    assert_eq!(remaining, vec!["n2".to_string()]);
}

#[tokio::test]
async fn test_delete_single_failure_restores_position() {
    let (store, state) = fixture().await;
    store.fail_next(InboxError::Unavailable("down".to_string()));

    let err = state.apply_delete("n2").await.unwrap_err();
    assert_eq!(err, InboxError::Unavailable("down".to_string()));

    let ids: Vec<String> = state
        .snapshot()
        .notifications
        .iter()
        .map(|n| n.id.clone())
        .collect();
    assert_eq!(ids, vec!["n3".to_string(), "n2".to_string(), "n1".to_string()]);
}

#[tokio::test]
async fn test_delete_uncached_id_still_succeeds() {
    let (_store, state) = fixture().await;
    // Not in the cache; the store treats deletes as idempotent.
    state.apply_delete("n-elsewhere").await.unwrap();
    assert_eq!(state.snapshot().notifications.len(), 3);
}

#[tokio::test]
async fn test_mark_all_read_batches_and_confirms() {
    let (store, state) = fixture().await;
    state.apply_mark_all_read("u1").await.unwrap();

    assert!(state.snapshot().notifications.iter().all(|n| n.read));
    let server = store.fetch_notifications("u1").await.unwrap();
    assert!(server.iter().all(|n| n.read));
}

#[tokio::test]
async fn test_mark_all_read_rollback_restores_exact_flags() {
    let (store, state) = fixture().await;
    // n2 was already read before the batch.
    state.apply_mark_read("n2").await.unwrap();
    let before = read_flags(&state);

    store.fail_next(InboxError::Unavailable("down".to_string()));
    let err = state.apply_mark_all_read("u1").await.unwrap_err();
    assert_eq!(err, InboxError::Unavailable("down".to_string()));

    // Only the flipped flags were rolled back; n2 stays read.
    assert_eq!(read_flags(&state), before);
    assert!(state
        .snapshot()
        .notifications
        .iter()
        .find(|n| n.id == "n2")
        .unwrap()
        .read);
}

#[tokio::test]
async fn test_concurrent_mark_read_serializes_per_entity() {
    let (store, state) = fixture().await;
    store.set_latency(Some(Duration::from_millis(30)));

    let a = {
        let state = state.clone();
        tokio::spawn(async move { state.apply_mark_read("n1").await })
    };
    let b = {
        let state = state.clone();
        tokio::spawn(async move { state.apply_mark_read("n1").await })
    };

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    assert!(state
        .snapshot()
        .notifications
        .iter()
        .find(|n| n.id == "n1")
        .unwrap()
        .read);
}

#[tokio::test]
async fn test_concurrent_loads_coalesce_to_one_fetch() {
    let store = Arc::new(MemoryStore::new());
    store.add_conversation(conversation("c1", "u1", "p1", "Ana", "hi", 100));
    let state = Arc::new(InboxState::new(store.clone()));

    store.set_latency(Some(Duration::from_millis(50)));
    let a = {
        let state = state.clone();
        tokio::spawn(async move { state.load("u1").await })
    };
    let b = {
        let state = state.clone();
        tokio::spawn(async move { state.load("u1").await })
    };

    let snap_a = a.await.unwrap().unwrap();
    let snap_b = b.await.unwrap().unwrap();

    assert_eq!(snap_a, snap_b);
    assert_eq!(store.fetch_calls(), 1);
}

#[tokio::test]
async fn test_aborted_load_does_not_wedge_later_loads() {
    let store = Arc::new(MemoryStore::new());
    store.add_conversation(conversation("c1", "u1", "p1", "Ana", "hi", 100));
    let state = Arc::new(InboxState::new(store.clone()));

    // Cancel a load mid-fetch.
    store.set_latency(Some(Duration::from_millis(200)));
    let task = {
        let state = state.clone();
        tokio::spawn(async move { state.load("u1").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    task.abort();
    assert!(task.await.is_err());

    // The user's load path recovers: a fresh load fetches and installs.
    store.set_latency(None);
    let snapshot = state.load("u1").await.unwrap();
    assert_eq!(snapshot.user_id, "u1");
    assert_eq!(snapshot.conversations.len(), 1);
    assert_eq!(state.snapshot().user_id, "u1");
}

#[tokio::test]
async fn test_stale_load_does_not_clobber_newer_user() {
    let store = Arc::new(MemoryStore::new());
    store.add_conversation(conversation("ca", "user-a", "p1", "Ana", "hi", 100));
    store.add_conversation(conversation("cb", "user-b", "p2", "Ben", "yo", 100));
    let state = Arc::new(InboxState::new(store.clone()));

    store.set_latency(Some(Duration::from_millis(50)));
    let first = {
        let state = state.clone();
        tokio::spawn(async move { state.load("user-a").await })
    };
    // Let the first load get in flight before superseding it.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let state = state.clone();
        tokio::spawn(async move { state.load("user-b").await })
    };

    let snap_a = first.await.unwrap().unwrap();
    let snap_b = second.await.unwrap().unwrap();

    // Each caller got its own result...
    assert_eq!(snap_a.user_id, "user-a");
    assert_eq!(snap_b.user_id, "user-b");
    // ...but the cache belongs to the newest load.
    assert_eq!(state.snapshot().user_id, "user-b");
}

#[tokio::test(start_paused = true)]
async fn test_store_timeout_maps_to_unavailable() {
    let store = Arc::new(MemoryStore::new());
    store.add_conversation(conversation("c1", "u1", "p1", "Ana", "hi", 100));
    // Slower than STORE_TIMEOUT; virtual time fast-forwards through it.
    store.set_latency(Some(roam_inbox::STORE_TIMEOUT + Duration::from_secs(1)));

    let state = InboxState::new(store.clone());
    let err = state.load("u1").await.unwrap_err();
    assert!(matches!(err, InboxError::Unavailable(_)));
}

#[tokio::test]
async fn test_status_change_reflects_and_rolls_back() {
    let (store, state) = fixture().await;
    let mut pending = notification("n-req", "u1", NotificationKind::Carpool, 400);
    pending.status = Some(RequestStatus::Pending);
    store.add_notification(pending);
    state.load("u1").await.unwrap();

    // Failure path first: status reverts to pending.
    store.fail_next(InboxError::Unavailable("down".to_string()));
    let err = state
        .apply_status_change("n-req", RequestStatus::Approved)
        .await
        .unwrap_err();
    assert_eq!(err, InboxError::Unavailable("down".to_string()));
    let status = state
        .snapshot()
        .notifications
        .iter()
        .find(|n| n.id == "n-req")
        .unwrap()
        .status;
    assert_eq!(status, Some(RequestStatus::Pending));

    // Then the confirmed transition.
    state
        .apply_status_change("n-req", RequestStatus::Approved)
        .await
        .unwrap();
    let status = state
        .snapshot()
        .notifications
        .iter()
        .find(|n| n.id == "n-req")
        .unwrap()
        .status;
    assert_eq!(status, Some(RequestStatus::Approved));
}

#[tokio::test]
async fn test_status_change_without_pending_is_invalid_transition() {
    let (_store, state) = fixture().await;
    // n1 has no status at all.
    let err = state
        .apply_status_change("n1", RequestStatus::Approved)
        .await
        .unwrap_err();
    assert_eq!(err, InboxError::InvalidTransition("n1".to_string()));

    // Rolled back to no status.
    let status = state
        .snapshot()
        .notifications
        .iter()
        .find(|n| n.id == "n1")
        .unwrap()
        .status;
    assert_eq!(status, None);
}

#[tokio::test]
async fn test_filter_by_category_after_mutations() {
    let (_store, state) = fixture().await;
    state.apply_delete("n1").await.unwrap();

    let carpool = state.filter_by_category(CategoryFilter::Kind(NotificationKind::Carpool));
    assert_eq!(carpool.len(), 1);
    assert_eq!(carpool[0].id, "n2");

    let all = state.filter_by_category(CategoryFilter::All);
    let ids: Vec<&str> = all.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["n3", "n2"]);
}

#[tokio::test]
async fn test_reload_after_mutation_matches_server() {
    let (_store, state) = fixture().await;
    state.apply_mute("c1", true).await.unwrap();
    state.apply_delete("n1").await.unwrap();

    // A fresh load agrees with what the mutations left behind.
    let snapshot = state.load("u1").await.unwrap();
    assert!(snapshot.conversations.iter().find(|c| c.id == "c1").unwrap().muted);
    assert!(snapshot.notifications.iter().all(|n| n.id != "n1"));
}
