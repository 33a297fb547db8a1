//! Notification document schema
//!
//! Notifications are append-only except for the read flag. They expire through
//! a TTL index on `created_at`, never through a manual sweep.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::db::mongo::{IntoIndexes, Stamped};

/// Collection name for notifications
pub const NOTIFICATION_COLLECTION: &str = "notifications";

/// Fixed retention window
pub const NOTIFICATION_RETENTION_DAYS: u64 = 30;

/// Closed set of notification types
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NearbyIssue,
    Verified,
    Liked,
    Commented,
    StatusChanged,
    Resolved,
    #[default]
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NearbyIssue => "nearby_issue",
            NotificationKind::Verified => "verified",
            NotificationKind::Liked => "liked",
            NotificationKind::Commented => "commented",
            NotificationKind::StatusChanged => "status_changed",
            NotificationKind::Resolved => "resolved",
            NotificationKind::System => "system",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NotificationDoc {
    #[serde(rename = "_id")]
    pub id: String,

    /// Recipient user id
    pub recipient: String,

    #[serde(rename = "type")]
    pub kind: NotificationKind,

    pub title: String,

    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Value,

    #[serde(default)]
    pub is_read: bool,

    pub created_at: DateTime,
}

impl NotificationDoc {
    pub fn new(
        recipient: impl Into<String>,
        kind: NotificationKind,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            recipient: recipient.into(),
            kind,
            title: title.into(),
            body: body.into(),
            issue_id: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            is_read: false,
            created_at: DateTime::now(),
        }
    }

    pub fn for_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn retention() -> Duration {
        Duration::from_secs(NOTIFICATION_RETENTION_DAYS * 24 * 60 * 60)
    }

    /// Whether the TTL window has passed at `now`
    pub fn is_expired(&self, now: DateTime) -> bool {
        let age_ms = now.timestamp_millis() - self.created_at.timestamp_millis();
        age_ms >= Self::retention().as_millis() as i64
    }

    pub fn payload(&self) -> NotificationPayload {
        NotificationPayload {
            id: self.id.clone(),
            recipient: self.recipient.clone(),
            kind: self.kind,
            title: self.title.clone(),
            body: self.body.clone(),
            issue_id: self.issue_id.clone(),
            metadata: self.metadata.clone(),
            is_read: self.is_read,
            created_at: self.created_at.timestamp_millis(),
        }
    }
}

/// Wire form of a persisted notification, timestamps as epoch millis
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: String,
    pub recipient: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    pub metadata: serde_json::Value,
    pub is_read: bool,
    pub created_at: i64,
}

impl IntoIndexes for NotificationDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "created_at": 1 },
                Some(
                    IndexOptions::builder()
                        .expire_after(NotificationDoc::retention())
                        .name("created_at_ttl".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "recipient": 1, "created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("recipient_created_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl Stamped for NotificationDoc {
    fn stamp(&mut self, now: DateTime) {
        self.created_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&NotificationKind::NearbyIssue).unwrap();
        assert_eq!(json, "\"nearby_issue\"");
        assert_eq!(NotificationKind::StatusChanged.as_str(), "status_changed");
    }

    #[test]
    fn test_payload_shape() {
        let kind = NotificationKind::NearbyIssue;
        let n = NotificationDoc::new("user-1", kind, "New issue", "Near you")
            .for_issue("issue-9")
            .with_metadata(serde_json::json!({ "distanceKm": 1.2 }));
        let json = serde_json::to_value(n.payload()).unwrap();
        assert_eq!(json["type"], "nearby_issue");
        assert_eq!(json["issueId"], "issue-9");
        assert_eq!(json["isRead"], false);
        assert_eq!(json["metadata"]["distanceKm"], 1.2);
        assert!(json["createdAt"].is_i64());
    }

    #[test]
    fn test_retention_window() {
        let mut n = NotificationDoc::new("user-1", NotificationKind::System, "t", "b");
        let now = DateTime::now();
        assert!(!n.is_expired(now));

        let thirty_one_days_ms = 31 * 24 * 60 * 60 * 1000;
        n.created_at = DateTime::from_millis(now.timestamp_millis() - thirty_one_days_ms);
        assert!(n.is_expired(now));
    }

    #[test]
    fn test_ttl_index_declared() {
        let indexes = NotificationDoc::into_indices();
        let ttl = indexes
            .iter()
            .find(|(keys, _)| keys.contains_key("created_at") && keys.len() == 1)
            .and_then(|(_, opts)| opts.as_ref())
            .and_then(|o| o.expire_after);
        assert_eq!(ttl, Some(NotificationDoc::retention()));
    }
}
