//! MongoDB-backed aggregate store

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};
use futures_util::TryStreamExt;
use mongodb::options::FindOptions;
use tracing::{debug, info};

use super::{AggregateStore, ProximityQuery};
use crate::db::schemas::{
    IssueDoc, NotificationDoc, UserDoc, ISSUE_COLLECTION, NOTIFICATION_COLLECTION,
    USER_COLLECTION,
};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{PulseError, Result};

/// Aggregate store over the `issues`, `users` and `notifications` collections
pub struct MongoStore {
    mongo: MongoClient,
    issues: MongoCollection<IssueDoc>,
    users: MongoCollection<UserDoc>,
    notifications: MongoCollection<NotificationDoc>,
}

impl MongoStore {
    /// Open collections and apply their indexes
    pub async fn new(mongo: MongoClient) -> Result<Self> {
        let issues = mongo.collection::<IssueDoc>(ISSUE_COLLECTION).await?;
        let users = mongo.collection::<UserDoc>(USER_COLLECTION).await?;
        let notifications = mongo
            .collection::<NotificationDoc>(NOTIFICATION_COLLECTION)
            .await?;

        info!("Aggregate store ready on database '{}'", mongo.db_name());

        Ok(Self {
            mongo,
            issues,
            users,
            notifications,
        })
    }
}

/// `$nearSphere` filter for a proximity query.
///
/// MongoDB distance bounds are inclusive; the exact-boundary case is
/// measure-zero for real coordinates and is accepted.
pub fn proximity_filter(query: &ProximityQuery) -> Document {
    let mut filter = doc! {
        "location": {
            "$nearSphere": {
                "$geometry": {
                    "type": "Point",
                    "coordinates": [query.center.longitude(), query.center.latitude()],
                },
                "$minDistance": query.min_distance_m,
                "$maxDistance": query.max_distance_m,
            }
        },
        // Unset sentinel, never a real home location
        "location.coordinates": { "$ne": [0.0, 0.0] },
    };

    if query.active_only {
        filter.insert("is_active", true);
    }

    if !query.exclude_ids.is_empty() {
        let ids: Vec<Bson> = query
            .exclude_ids
            .iter()
            .map(|id| Bson::String(id.clone()))
            .collect();
        filter.insert("_id", doc! { "$nin": ids });
    }

    filter
}

#[async_trait]
impl AggregateStore for MongoStore {
    async fn insert_issue(&self, issue: IssueDoc) -> Result<IssueDoc> {
        self.issues.insert_one(issue).await
    }

    async fn find_issue(&self, id: &str) -> Result<Option<IssueDoc>> {
        self.issues.find_one(doc! { "_id": id }).await
    }

    async fn replace_issue_if_version(
        &self,
        issue: &IssueDoc,
        expected_version: i64,
    ) -> Result<bool> {
        let result = self
            .issues
            .replace_one(doc! { "_id": issue.id.as_str(), "version": expected_version }, issue)
            .await?;

        if result.matched_count == 0 {
            // Distinguish a lost race from a deleted issue
            let exists = self.issues.find_one(doc! { "_id": issue.id.as_str() }).await?.is_some();
            if !exists {
                return Err(PulseError::NotFound(format!("issue {}", issue.id)));
            }
            debug!(
                issue_id = %issue.id,
                expected = expected_version,
                "Version mismatch on issue write"
            );
            return Ok(false);
        }

        Ok(true)
    }

    async fn insert_user(&self, user: UserDoc) -> Result<UserDoc> {
        self.users.insert_one(user).await
    }

    async fn find_user(&self, id: &str) -> Result<Option<UserDoc>> {
        self.users.find_one(doc! { "_id": id }).await
    }

    async fn users_within(&self, query: &ProximityQuery) -> Result<Vec<String>> {
        let raw = self.users.inner().clone_with_type::<Document>();
        let cursor = raw
            .find(proximity_filter(query))
            .projection(doc! { "_id": 1 })
            .await?;

        let docs: Vec<Document> = cursor.try_collect().await?;
        Ok(docs
            .into_iter()
            .filter_map(|d| d.get_str("_id").ok().map(str::to_string))
            .collect())
    }

    async fn insert_notification(&self, notification: NotificationDoc) -> Result<NotificationDoc> {
        self.notifications.insert_one(notification).await
    }

    async fn list_notifications(
        &self,
        recipient: &str,
        unread_only: bool,
        limit: usize,
    ) -> Result<Vec<NotificationDoc>> {
        // The TTL monitor runs about once a minute, so filter by age as well
        let cutoff = DateTime::from_millis(
            DateTime::now().timestamp_millis() - NotificationDoc::retention().as_millis() as i64,
        );
        let mut filter = doc! { "recipient": recipient, "created_at": { "$gt": cutoff } };
        if unread_only {
            filter.insert("is_read", false);
        }

        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(limit as i64)
            .build();

        self.notifications.find_many(filter, Some(options)).await
    }

    async fn mark_notification_read(&self, id: &str, recipient: &str) -> Result<bool> {
        let result = self
            .notifications
            .update_one(
                doc! { "_id": id, "recipient": recipient },
                doc! { "$set": { "is_read": true } },
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn ping(&self) -> bool {
        self.mongo.ping().await
    }

    fn backend(&self) -> &'static str {
        "mongodb"
    }
}
