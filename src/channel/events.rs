//! Wire types for the real-time channel
//!
//! Server messages are `{event, issueId?, data, ts}` with `ts` in epoch
//! millis. Client messages are tagged by `type` and carry no acknowledgement.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named multicast group
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Room {
    Issue(String),
    /// Personal room of one user
    User(String),
    /// Geographic area (ward or city)
    Area(String),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Issue(id) => write!(f, "issue:{}", id),
            Room::User(id) => write!(f, "user:{}", id),
            Room::Area(name) => write!(f, "area:{}", name),
        }
    }
}

/// Recipients of one publish
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    Room(Room),
}

/// Fixed catalogue of server-to-client events
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EventName {
    IssueCreated,
    IssueLiked,
    IssueVerified,
    IssueStatusUpdate,
    NewComment,
    SeverityUpdate,
    Notification,
    UserNotification,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::IssueCreated => "issueCreated",
            EventName::IssueLiked => "issueLiked",
            EventName::IssueVerified => "issueVerified",
            EventName::IssueStatusUpdate => "issueStatusUpdate",
            EventName::NewComment => "newComment",
            EventName::SeverityUpdate => "severityUpdate",
            EventName::Notification => "notification",
            EventName::UserNotification => "userNotification",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One server-to-client message
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event: EventName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    pub data: serde_json::Value,
    pub ts: i64,
}

impl EventEnvelope {
    pub fn new(event: EventName, issue_id: Option<&str>, data: serde_json::Value) -> Self {
        Self {
            event,
            issue_id: issue_id.map(str::to_string),
            data,
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Message received from a client
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinIssue {
        #[serde(rename = "issueId", alias = "id")]
        issue_id: String,
    },
    LeaveIssue {
        #[serde(rename = "issueId", alias = "id")]
        issue_id: String,
    },
    JoinArea {
        #[serde(alias = "name")]
        area: String,
    },
    LeaveArea {
        #[serde(alias = "name")]
        area: String,
    },
    Ping,
}

/// Reply to a liveness ping
#[derive(Serialize, Debug, Clone)]
pub struct PingReply {
    pub status: &'static str,
    pub ts: i64,
}

impl PingReply {
    pub fn now() -> Self {
        Self {
            status: "ok",
            ts: chrono::Utc::now().timestamp_millis(),
        }
    }
}
