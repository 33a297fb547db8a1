//! Typed helpers over the fixed event catalogue

use serde_json::json;
use std::sync::Arc;

use super::events::{Audience, EventEnvelope, EventName, Room};
use super::{DisabledChannel, Publisher};
use crate::db::schemas::{IssueDoc, IssueStatus, NotificationPayload};

#[derive(Clone)]
pub struct EventEmitter {
    publisher: Arc<dyn Publisher>,
}

impl EventEmitter {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    /// Emitter that discards everything
    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledChannel))
    }

    pub fn issue_created(&self, issue: &IssueDoc) {
        let data = serde_json::to_value(issue.summary()).unwrap_or_default();
        self.send(
            Audience::Everyone,
            EventName::IssueCreated,
            Some(&issue.id),
            data,
        );
    }

    pub fn issue_liked(&self, issue_id: &str, user_id: &str, liked: bool, like_count: u32) {
        self.to_issue(
            issue_id,
            EventName::IssueLiked,
            json!({ "userId": user_id, "liked": liked, "likeCount": like_count }),
        );
    }

    pub fn issue_verified(&self, issue: &IssueDoc, user_id: &str, rating: u8) {
        self.to_issue(
            &issue.id,
            EventName::IssueVerified,
            json!({
                "userId": user_id,
                "rating": rating,
                "verificationCount": issue.verification_count,
                "averageSeverity": issue.average_severity,
                "status": issue.status,
            }),
        );
    }

    pub fn severity_update(&self, issue: &IssueDoc) {
        self.to_issue(
            &issue.id,
            EventName::SeverityUpdate,
            json!({
                "averageSeverity": issue.average_severity,
                "verificationCount": issue.verification_count,
            }),
        );
    }

    /// Sent to the issue room and mirrored to the issue's area room
    pub fn issue_status_update(&self, issue: &IssueDoc, previous: IssueStatus) {
        let data = json!({
            "status": issue.status,
            "previousStatus": previous,
            "averageSeverity": issue.average_severity,
            "verificationCount": issue.verification_count,
        });
        if let Some(area) = issue.area() {
            self.send(
                Audience::Room(Room::Area(area.to_string())),
                EventName::IssueStatusUpdate,
                Some(&issue.id),
                data.clone(),
            );
        }
        self.to_issue(&issue.id, EventName::IssueStatusUpdate, data);
    }

    pub fn new_comment(&self, issue_id: &str, user_id: &str, comment: &str) {
        self.to_issue(
            issue_id,
            EventName::NewComment,
            json!({ "userId": user_id, "comment": comment }),
        );
    }

    /// Persisted notification, pushed to its recipient
    pub fn notification(&self, payload: &NotificationPayload) {
        let data = serde_json::to_value(payload).unwrap_or_default();
        self.send(
            Audience::Room(Room::User(payload.recipient.clone())),
            EventName::Notification,
            payload.issue_id.as_deref(),
            data,
        );
    }

    /// Transient message for one user, never persisted
    pub fn user_notification(&self, user_id: &str, data: serde_json::Value) {
        self.send(
            Audience::Room(Room::User(user_id.to_string())),
            EventName::UserNotification,
            None,
            data,
        );
    }

    fn to_issue(&self, issue_id: &str, event: EventName, data: serde_json::Value) {
        self.send(
            Audience::Room(Room::Issue(issue_id.to_string())),
            event,
            Some(issue_id),
            data,
        );
    }

    fn send(
        &self,
        audience: Audience,
        event: EventName,
        issue_id: Option<&str>,
        data: serde_json::Value,
    ) {
        self.publisher
            .publish(audience, EventEnvelope::new(event, issue_id, data));
    }
}
