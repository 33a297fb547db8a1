//! Aggregate store
//!
//! The engine and notifier only talk to persistence through `AggregateStore`.
//! Two implementations exist: `MongoStore` for deployments and `MemoryStore`
//! for development mode and tests.
//!
//! Issue writes are compare-and-swap on the `version` field. A caller reads an
//! issue, computes the next aggregate, and calls `replace_issue_if_version`
//! with the version it read; `Ok(false)` means somebody else won and the caller
//! must re-read.

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::db::schemas::{IssueDoc, NotificationDoc, UserDoc};
use crate::geo::GeoPoint;
use crate::types::{PulseError, Result};

/// Point-in-radius query for users
#[derive(Debug, Clone)]
pub struct ProximityQuery {
    pub center: GeoPoint,
    /// Exclusive lower bound in meters
    pub min_distance_m: f64,
    /// Exclusive upper bound in meters
    pub max_distance_m: f64,
    pub active_only: bool,
    pub exclude_ids: Vec<String>,
}

impl ProximityQuery {
    /// Users strictly between 1 m and `radius_km` of `center`, active only
    pub fn around(center: GeoPoint, radius_km: f64) -> Self {
        Self {
            center,
            min_distance_m: 1.0,
            max_distance_m: radius_km * 1000.0,
            active_only: true,
            exclude_ids: Vec::new(),
        }
    }

    pub fn excluding(mut self, id: impl Into<String>) -> Self {
        self.exclude_ids.push(id.into());
        self
    }

    /// Evaluate the query against a single user
    pub fn matches(&self, user: &UserDoc) -> bool {
        if self.active_only && !user.is_active {
            return false;
        }
        if user.location.is_unset() || self.exclude_ids.iter().any(|id| id == &user.id) {
            return false;
        }
        let d = self.center.distance_m(&user.location);
        d > self.min_distance_m && d < self.max_distance_m
    }
}

/// Persistence consumed by the aggregate engine and notifier
#[async_trait]
pub trait AggregateStore: Send + Sync {
    /// Insert a new issue, returning it with creation timestamps set
    async fn insert_issue(&self, issue: IssueDoc) -> Result<IssueDoc>;

    async fn find_issue(&self, id: &str) -> Result<Option<IssueDoc>>;

    /// Write `issue` only if the stored version still equals `expected_version`.
    /// The stored version becomes `issue.version`.
    async fn replace_issue_if_version(&self, issue: &IssueDoc, expected_version: i64)
        -> Result<bool>;

    async fn insert_user(&self, user: UserDoc) -> Result<UserDoc>;

    async fn find_user(&self, id: &str) -> Result<Option<UserDoc>>;

    /// Ids of users matching `query`, each at most once
    async fn users_within(&self, query: &ProximityQuery) -> Result<Vec<String>>;

    async fn insert_notification(&self, notification: NotificationDoc) -> Result<NotificationDoc>;

    /// Newest first, expired items excluded
    async fn list_notifications(
        &self,
        recipient: &str,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<NotificationDoc>>;

    /// Returns false when no notification with that id belongs to `recipient`
    async fn mark_notification_read(&self, id: &str, recipient: &str) -> Result<bool>;

    /// Whether the backend currently answers
    async fn ping(&self) -> bool;

    /// Short name for logs and health output
    fn backend(&self) -> &'static str;
}

/// Run a store call, failing with `Timeout` once `limit` has elapsed
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| PulseError::Timeout(format!("no answer within {:?}", limit)))?
}
