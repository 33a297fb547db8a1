//! In-process aggregate store
//!
//! Backs development mode when MongoDB is unavailable, and the test suite.
//! Geo queries are evaluated with the haversine distance in `geo`.

use async_trait::async_trait;
use bson::DateTime;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use super::{AggregateStore, ProximityQuery};
use crate::db::schemas::{IssueDoc, NotificationDoc, UserDoc};
use crate::types::{PulseError, Result};

/// DashMap-backed store
#[derive(Default)]
pub struct MemoryStore {
    issues: DashMap<String, IssueDoc>,
    users: DashMap<String, UserDoc>,
    notifications: DashMap<String, NotificationDoc>,
    /// Recipients whose notification inserts fail
    failing_recipients: DashSet<String>,
    /// Artificial delay applied to every call, in milliseconds
    latency_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make notification inserts for `recipient` fail with a database error
    pub fn fail_notifications_for(&self, recipient: impl Into<String>) {
        self.failing_recipients.insert(recipient.into());
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Notifications stored for `recipient`, including read ones
    pub fn notifications_for(&self, recipient: &str) -> Vec<NotificationDoc> {
        self.notifications
            .iter()
            .filter(|n| n.recipient == recipient)
            .map(|n| n.value().clone())
            .collect()
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.len()
    }

    async fn delay(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

#[async_trait]
impl AggregateStore for MemoryStore {
    async fn insert_issue(&self, mut issue: IssueDoc) -> Result<IssueDoc> {
        self.delay().await;
        let now = DateTime::now();
        issue.metadata.created_at = Some(now);
        issue.metadata.updated_at = Some(now);

        if self.issues.contains_key(&issue.id) {
            return Err(PulseError::Conflict(format!("issue {} already exists", issue.id)));
        }
        self.issues.insert(issue.id.clone(), issue.clone());
        Ok(issue)
    }

    async fn find_issue(&self, id: &str) -> Result<Option<IssueDoc>> {
        self.delay().await;
        Ok(self.issues.get(id).map(|i| i.value().clone()))
    }

    async fn replace_issue_if_version(
        &self,
        issue: &IssueDoc,
        expected_version: i64,
    ) -> Result<bool> {
        self.delay().await;
        let Some(mut stored) = self.issues.get_mut(&issue.id) else {
            return Err(PulseError::NotFound(format!("issue {}", issue.id)));
        };

        if stored.version != expected_version {
            debug!(
                issue_id = %issue.id,
                expected = expected_version,
                actual = stored.version,
                "Version mismatch on issue write"
            );
            return Ok(false);
        }

        *stored = issue.clone();
        Ok(true)
    }

    async fn insert_user(&self, mut user: UserDoc) -> Result<UserDoc> {
        self.delay().await;
        let now = DateTime::now();
        user.metadata.created_at = Some(now);
        user.metadata.updated_at = Some(now);
        self.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: &str) -> Result<Option<UserDoc>> {
        self.delay().await;
        Ok(self.users.get(id).map(|u| u.value().clone()))
    }

    async fn users_within(&self, query: &ProximityQuery) -> Result<Vec<String>> {
        self.delay().await;
        let mut matched: Vec<(f64, String)> = self
            .users
            .iter()
            .filter(|u| query.matches(u.value()))
            .map(|u| (query.center.distance_m(&u.location), u.id.clone()))
            .collect();

        // Nearest first, same order as $nearSphere
        matched.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(matched.into_iter().map(|(_, id)| id).collect())
    }

    async fn insert_notification(&self, notification: NotificationDoc) -> Result<NotificationDoc> {
        self.delay().await;
        if self.failing_recipients.contains(&notification.recipient) {
            return Err(PulseError::Database(format!(
                "insert rejected for {}",
                notification.recipient
            )));
        }
        self.notifications
            .insert(notification.id.clone(), notification.clone());
        Ok(notification)
    }

    async fn list_notifications(
        &self,
        recipient: &str,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<NotificationDoc>> {
        self.delay().await;
        let now = DateTime::now();
        let mut items: Vec<NotificationDoc> = self
            .notifications
            .iter()
            .filter(|n| n.recipient == recipient)
            .filter(|n| !n.is_expired(now))
            .filter(|n| !unread_only || !n.is_read)
            .map(|n| n.value().clone())
            .collect();

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }

    async fn mark_notification_read(&self, id: &str, recipient: &str) -> Result<bool> {
        self.delay().await;
        match self.notifications.get_mut(id) {
            Some(mut n) if n.recipient == recipient => {
                n.is_read = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> bool {
        true
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::{NewIssue, NotificationKind};
    use crate::geo::GeoPoint;

    fn issue(id: &str) -> IssueDoc {
        IssueDoc::new(
            id.to_string(),
            NewIssue {
                title: "Broken streetlight".into(),
                description: String::new(),
                category: None,
                longitude: 2.35,
                latitude: 48.85,
                address: None,
                city: None,
                ward: None,
                created_by: "creator".into(),
            },
        )
    }

    #[tokio::test]
    async fn test_cas_rejects_stale_version() {
        let store = MemoryStore::new();
        let stored = store.insert_issue(issue("i-1")).await.unwrap();

        let mut first = stored.clone();
        first.version = 1;
        first.like_count = 1;
        assert!(store.replace_issue_if_version(&first, 0).await.unwrap());

        let mut stale = stored.clone();
        stale.version = 1;
        stale.like_count = 7;
        assert!(!store.replace_issue_if_version(&stale, 0).await.unwrap());

        let current = store.find_issue("i-1").await.unwrap().unwrap();
        assert_eq!(current.like_count, 1);
        assert_eq!(current.version, 1);
    }

    #[tokio::test]
    async fn test_replace_missing_issue_is_not_found() {
        let store = MemoryStore::new();
        let err = store.replace_issue_if_version(&issue("nope"), 0).await.unwrap_err();
        assert!(matches!(err, PulseError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_users_within_orders_by_distance() {
        let store = MemoryStore::new();
        let center = GeoPoint::new(2.35, 48.85);
        store
            .insert_user(UserDoc::new("far", "Far", center.offset_north(3_000.0)))
            .await
            .unwrap();
        store
            .insert_user(UserDoc::new("near", "Near", center.offset_north(300.0)))
            .await
            .unwrap();
        store
            .insert_user(UserDoc::new("unset", "Unset", GeoPoint::unset()))
            .await
            .unwrap();

        let ids = store
            .users_within(&ProximityQuery::around(center, 5.0))
            .await
            .unwrap();
        assert_eq!(ids, vec!["near".to_string(), "far".to_string()]);
    }

    #[tokio::test]
    async fn test_notifications_read_flag_and_ownership() {
        let store = MemoryStore::new();
        let n = store
            .insert_notification(NotificationDoc::new(
                "alice",
                NotificationKind::System,
                "Hello",
                "Welcome",
            ))
            .await
            .unwrap();

        assert!(!store.mark_notification_read(&n.id, "bob").await.unwrap());
        assert!(store.mark_notification_read(&n.id, "alice").await.unwrap());

        let unread = store.list_notifications("alice", true, 10).await.unwrap();
        assert!(unread.is_empty());
        let all = store.list_notifications("alice", false, 10).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_read);
    }

    #[tokio::test]
    async fn test_expired_notifications_hidden() {
        let store = MemoryStore::new();
        let mut old = NotificationDoc::new("alice", NotificationKind::System, "Old", "Old");
        old.created_at = DateTime::from_millis(
            DateTime::now().timestamp_millis() - 31 * 24 * 60 * 60 * 1000,
        );
        store.insert_notification(old).await.unwrap();

        let visible = store.list_notifications("alice", false, 10).await.unwrap();
        assert!(visible.is_empty());
    }
}
