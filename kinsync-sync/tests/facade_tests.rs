use kinsync_storage::OfflineQueue;
use kinsync_sync::mock_store::MockStore;
use kinsync_sync::permission::mock::InMemoryDirectory;
use kinsync_sync::{
    connectivity_channel, CoordinationFacade, PermissionGate, RetryPolicy, SyncConfig, SyncError,
    SyncManager,
};
use kinsync_types::{
    CoordinationEvent, DeviceId, EventKind, Family, FamilyId, TargetRef, UserId,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

struct Device {
    facade: CoordinationFacade,
    manager: Arc<SyncManager>,
}

fn make_device(
    store: Arc<MockStore>,
    directory: Arc<InMemoryDirectory>,
    user: UserId,
) -> Device {
    let config = SyncConfig {
        retry: RetryPolicy::without_jitter(3, Duration::from_millis(100)),
        debounce_delay: Duration::from_millis(300),
        ..SyncConfig::default()
    };
    let manager = Arc::new(SyncManager::new(
        user,
        DeviceId::new(),
        Arc::new(OfflineQueue::open_in_memory().unwrap()),
        store,
        config,
    ));
    let facade = CoordinationFacade::new(PermissionGate::new(directory), manager.clone());
    Device { facade, manager }
}

fn make_family(owner: UserId, co_parent: UserId) -> (Arc<InMemoryDirectory>, FamilyId) {
    let family_id = FamilyId::new();
    let mut family = Family::new(family_id, owner);
    family.share_with(co_parent).unwrap();
    let directory = Arc::new(InMemoryDirectory::new());
    directory.insert(family);
    (directory, family_id)
}

#[tokio::test]
async fn stranger_cannot_publish() {
    let owner = UserId::new();
    let stranger = UserId::new();
    let (directory, family_id) = make_family(owner, UserId::new());
    let store = Arc::new(MockStore::new());
    let device = make_device(store.clone(), directory, stranger);

    let event = CoordinationEvent::points_adjusted(family_id, stranger, "child-1", 10);
    let result = device.facade.publish_now(event).await;

    assert!(matches!(result, Err(SyncError::NotAuthorized { .. })));
    assert!(store.appended().is_empty());
}

#[tokio::test]
async fn malformed_event_is_rejected_at_the_boundary() {
    let owner = UserId::new();
    let (directory, family_id) = make_family(owner, UserId::new());
    let store = Arc::new(MockStore::new());
    let device = make_device(store.clone(), directory, owner);

    // A points adjustment without the `points` change key.
    let event = CoordinationEvent::new(
        family_id,
        owner,
        EventKind::PointsAdjusted,
        TargetRef::new("child_profile", "child-1"),
        BTreeMap::new(),
    );
    let result = device.facade.publish_now(event).await;

    assert!(matches!(result, Err(SyncError::MalformedEvent(_))));
    assert!(store.appended().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rapid_edits_coalesce_into_one_publish() {
    let owner = UserId::new();
    let (directory, family_id) = make_family(owner, UserId::new());
    let store = Arc::new(MockStore::new());
    let device = make_device(store.clone(), directory, owner);

    for points in [10, 20, 30] {
        let event = CoordinationEvent::points_adjusted(family_id, owner, "child-1", points);
        device.facade.publish(event).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    let appended = store.appended();
    assert_eq!(appended.len(), 1);
    assert_eq!(appended[0].changes.get("points").map(String::as_str), Some("30"));
}

#[tokio::test(start_paused = true)]
async fn edits_to_distinct_records_do_not_coalesce() {
    let owner = UserId::new();
    let (directory, family_id) = make_family(owner, UserId::new());
    let store = Arc::new(MockStore::new());
    let device = make_device(store.clone(), directory, owner);

    for child in ["child-1", "child-2"] {
        let event = CoordinationEvent::points_adjusted(family_id, owner, child, 10);
        device.facade.publish(event).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.appended().len(), 2);
}

#[tokio::test]
async fn bulk_publish_reports_per_event_results_in_order() {
    let owner = UserId::new();
    let stranger = UserId::new();
    let (directory, family_id) = make_family(owner, UserId::new());
    let store = Arc::new(MockStore::new());
    let device = make_device(store.clone(), directory, owner);

    let events = vec![
        CoordinationEvent::app_categorization_changed(family_id, owner, "app-1", "games"),
        CoordinationEvent::app_categorization_changed(family_id, stranger, "app-2", "games"),
        CoordinationEvent::app_categorization_changed(family_id, owner, "app-3", "games"),
    ];
    let results = device.facade.publish_batch(events).await;

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(SyncError::NotAuthorized { .. })));
    assert!(results[2].is_ok());

    let appended: Vec<String> = store
        .appended()
        .iter()
        .map(|e| e.target.entity_id.clone())
        .collect();
    assert_eq!(appended, vec!["app-1", "app-3"]);
}

#[tokio::test(start_paused = true)]
async fn offline_co_parent_edit_reaches_the_owner_exactly_once() {
    let owner = UserId::new();
    let co_parent = UserId::new();
    let (directory, family_id) = make_family(owner, co_parent);
    let store = Arc::new(MockStore::new());

    // The owner's device is online and following the family.
    let owner_device = make_device(store.clone(), directory.clone(), owner);
    owner_device.facade.start_realtime(family_id).await.unwrap();
    let mut owner_sub = owner_device.facade.subscribe(family_id, owner);

    // The co-parent edits a child profile while offline.
    let co_device = make_device(store.clone(), directory, co_parent);
    let mut co_sub = co_device.facade.subscribe(family_id, co_parent);
    store.fail_appends(3);
    let edit = CoordinationEvent::child_profile_modified(
        family_id,
        co_parent,
        "child-1",
        BTreeMap::from([("name".to_string(), "Max".to_string())]),
    );
    co_device.facade.publish_now(edit).await.unwrap();

    // Nothing has reached the remote store or the owner yet.
    assert!(store.appended().is_empty());
    assert_eq!(co_device.manager.pending_events().unwrap(), 1);

    // The co-parent reconnects; the queue drains.
    let (handle, observer) = connectivity_channel(false);
    let drain_task = co_device.manager.spawn_connectivity_drain(observer);
    handle.set_online(true);

    // The owner receives exactly one event, attributed to the co-parent.
    let received = tokio::time::timeout(Duration::from_secs(30), owner_sub.recv())
        .await
        .expect("owner should be notified")
        .expect("subscription should stay open");
    assert_eq!(received.kind, EventKind::ChildProfileModified);
    assert_eq!(received.triggering_user_id, co_parent);
    assert_eq!(received.changes.get("name").map(String::as_str), Some("Max"));

    // No duplicates for the owner, and the co-parent never hears about
    // their own edit.
    assert!(
        tokio::time::timeout(Duration::from_secs(5), owner_sub.recv())
            .await
            .is_err()
    );
    assert!(
        tokio::time::timeout(Duration::from_secs(5), co_sub.recv())
            .await
            .is_err()
    );
    assert_eq!(co_device.manager.pending_events().unwrap(), 0);

    drain_task.abort();
    owner_device.facade.stop_realtime(&family_id);
}

#[tokio::test]
async fn fetch_since_returns_only_newer_events() {
    let owner = UserId::new();
    let co_parent = UserId::new();
    let (directory, family_id) = make_family(owner, co_parent);
    let store = Arc::new(MockStore::new());
    let device = make_device(store.clone(), directory, owner);

    let early = CoordinationEvent::points_adjusted(family_id, co_parent, "child-1", 10);
    let cutoff = early.timestamp;
    let mut late = CoordinationEvent::points_adjusted(family_id, co_parent, "child-1", 20);
    late.timestamp = cutoff + chrono::Duration::seconds(1);

    use kinsync_sync::CoordinationStore;
    store.append(&early).await.unwrap();
    store.append(&late).await.unwrap();

    let events = device.facade.fetch_since(&family_id, cutoff).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, late.id);
}
