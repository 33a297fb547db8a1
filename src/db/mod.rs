//! Database layer for civic-pulse
//!
//! Provides MongoDB storage for issues, users, and notifications.

pub mod mongo;
pub mod schemas;

pub use mongo::{IntoIndexes, MongoClient, MongoCollection, Stamped};
pub use schemas::{IssueDoc, IssueSummary, Metadata, NotificationDoc, UserDoc};
