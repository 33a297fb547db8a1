//! Database schemas for civic-pulse
//!
//! Defines MongoDB document structures for issues, users, and notifications.

mod issue;
mod metadata;
mod notification;
mod user;

pub use issue::{IssueDoc, IssueStatus, IssueSummary, NewIssue, Verification, ISSUE_COLLECTION};
pub use metadata::Metadata;
pub use notification::{
    NotificationDoc, NotificationKind, NotificationPayload, NOTIFICATION_COLLECTION,
    NOTIFICATION_RETENTION_DAYS,
};
pub use user::{UserDoc, USER_COLLECTION};
