//! Proximity notifier integration tests
//!
//! Covers radius bounds, the unset-location sentinel, per-recipient failure
//! isolation and the detached fan-out started by issue creation.

use std::sync::Arc;
use std::time::Duration;

use civic_pulse::channel::{EventEmitter, Publisher, Room, RoomHub};
use civic_pulse::db::schemas::{IssueDoc, NewIssue, NotificationKind, UserDoc};
use civic_pulse::geo::GeoPoint;
use civic_pulse::store::{AggregateStore, MemoryStore};
use civic_pulse::{EngineConfig, IssueEngine, NearbyReport, ProximityNotifier};

const CENTER: (f64, f64) = (-0.1276, 51.5072);

fn center() -> GeoPoint {
    GeoPoint::new(CENTER.0, CENTER.1)
}

fn issue_here(created_by: &str) -> IssueDoc {
    IssueDoc::new(
        "issue-nearby".into(),
        NewIssue {
            title: "Fallen tree".into(),
            description: String::new(),
            category: Some("parks".into()),
            longitude: CENTER.0,
            latitude: CENTER.1,
            address: None,
            city: Some("London".into()),
            ward: None,
            created_by: created_by.into(),
        },
    )
}

fn notifier(store: Arc<MemoryStore>, publisher: Arc<dyn Publisher>) -> Arc<ProximityNotifier> {
    Arc::new(ProximityNotifier::new(
        store,
        EventEmitter::new(publisher),
        10.0,
        Duration::from_secs(1),
    ))
}

// =============================================================================
// Radius and Sentinel
// =============================================================================

#[tokio::test]
async fn test_radius_boundaries() {
    let store = Arc::new(MemoryStore::new());
    for user in [
        UserDoc::new("just-inside", "A", center().offset_north(9_999.0)),
        UserDoc::new("just-outside", "B", center().offset_north(10_001.0)),
        UserDoc::new("on-top", "C", center()),
    ] {
        store.insert_user(user).await.unwrap();
    }

    let report = notifier(store.clone(), Arc::new(RoomHub::default()))
        .notify_nearby(&issue_here("reporter"), 10.0)
        .await
        .unwrap();

    assert_eq!(report.matched, 1);
    assert_eq!(store.notifications_for("just-inside").len(), 1);
    assert!(store.notifications_for("just-outside").is_empty());
    assert!(store.notifications_for("on-top").is_empty());
}

#[tokio::test]
async fn test_unset_location_never_notified() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_user(UserDoc::new("homeless-pin", "Unset", GeoPoint::unset()))
        .await
        .unwrap();

    // Even an issue reported close to the [0,0] placeholder skips them
    let mut near_null_island = issue_here("reporter");
    near_null_island.location = GeoPoint::new(0.0005, 0.0005);

    let report = notifier(store.clone(), Arc::new(RoomHub::default()))
        .notify_nearby(&near_null_island, 50.0)
        .await
        .unwrap();

    assert_eq!(report, NearbyReport::default());
    assert!(store.notifications_for("homeless-pin").is_empty());
}

#[tokio::test]
async fn test_inactive_and_creator_skipped() {
    let store = Arc::new(MemoryStore::new());
    let mut inactive = UserDoc::new("inactive", "I", center().offset_north(200.0));
    inactive.is_active = false;
    store.insert_user(inactive).await.unwrap();
    store
        .insert_user(UserDoc::new("reporter", "R", center().offset_north(200.0)))
        .await
        .unwrap();

    let report = notifier(store.clone(), Arc::new(RoomHub::default()))
        .notify_nearby(&issue_here("reporter"), 10.0)
        .await
        .unwrap();
    assert_eq!(report.matched, 0);
    assert_eq!(store.notification_count(), 0);
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test]
async fn test_one_failing_recipient_does_not_stop_the_rest() {
    let store = Arc::new(MemoryStore::new());
    for (i, id) in ["u1", "u2", "u3", "u4"].into_iter().enumerate() {
        store
            .insert_user(UserDoc::new(id, id, center().offset_north(500.0 * (i + 1) as f64)))
            .await
            .unwrap();
    }
    store.fail_notifications_for("u2");

    let report = notifier(store.clone(), Arc::new(RoomHub::default()))
        .notify_nearby(&issue_here("reporter"), 10.0)
        .await
        .unwrap();

    assert_eq!(
        report,
        NearbyReport {
            matched: 4,
            delivered: 3,
            failed: 1
        }
    );
    for id in ["u1", "u3", "u4"] {
        let stored = store.notifications_for(id);
        assert_eq!(stored.len(), 1, "{id} should have one notification");
        assert_eq!(stored[0].kind, NotificationKind::NearbyIssue);
        assert_eq!(stored[0].issue_id.as_deref(), Some("issue-nearby"));
    }
}

#[tokio::test]
async fn test_pushed_to_personal_room() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_user(UserDoc::new("resident", "R", center().offset_north(800.0)))
        .await
        .unwrap();

    let hub = Arc::new(RoomHub::new(8));
    let (conn, mut rx) = hub.register();
    hub.join(conn, Room::User("resident".into()));

    notifier(store, hub.clone())
        .notify_nearby(&issue_here("reporter"), 10.0)
        .await
        .unwrap();

    let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
    assert_eq!(msg["event"], "notification");
    assert_eq!(msg["issueId"], "issue-nearby");
    assert_eq!(msg["data"]["recipient"], "resident");
    assert_eq!(msg["data"]["isRead"], false);
}

#[tokio::test]
async fn test_create_returns_before_fan_out_finishes() {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_user(UserDoc::new("resident", "R", center().offset_north(800.0)))
        .await
        .unwrap();

    let hub: Arc<dyn Publisher> = Arc::new(RoomHub::default());
    let emitter = EventEmitter::new(hub);
    let config = EngineConfig {
        nearby_radius_km: 10.0,
        ..Default::default()
    };
    let notifier = Arc::new(ProximityNotifier::new(
        store.clone(),
        emitter.clone(),
        config.nearby_radius_km,
        config.store_timeout,
    ));
    let engine = IssueEngine::new(store.clone(), emitter, notifier, config);

    let issue = engine
        .create_issue(NewIssue {
            title: "Broken bench".into(),
            description: String::new(),
            category: None,
            longitude: CENTER.0,
            latitude: CENTER.1,
            address: None,
            city: None,
            ward: None,
            created_by: "reporter".into(),
        })
        .await
        .unwrap();

    let mut delivered = Vec::new();
    for _ in 0..50 {
        delivered = store.notifications_for("resident");
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].issue_id.as_deref(), Some(issue.id.as_str()));
}
