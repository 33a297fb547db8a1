//! Proximity notifier
//!
//! Fan-out of durable notifications to users living near a new issue, plus
//! the creator-facing notices raised by issue activity. Everything here runs
//! on detached tasks: the triggering request has already returned, and
//! failures are logged rather than propagated.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::channel::EventEmitter;
use crate::db::schemas::{IssueDoc, NotificationDoc, NotificationKind};
use crate::store::{bounded, AggregateStore, ProximityQuery};
use crate::types::{PulseError, Result};

/// Outcome of one fan-out run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NearbyReport {
    pub matched: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Creator-facing notice raised by activity on an issue
#[derive(Debug, Clone)]
pub struct OwnerNotice {
    pub kind: NotificationKind,
    pub title: String,
    pub body: String,
    pub metadata: serde_json::Value,
}

impl OwnerNotice {
    pub fn new(kind: NotificationKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

pub struct ProximityNotifier {
    store: Arc<dyn AggregateStore>,
    emitter: EventEmitter,
    radius_km: f64,
    store_timeout: Duration,
}

impl ProximityNotifier {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        emitter: EventEmitter,
        radius_km: f64,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            emitter,
            radius_km,
            store_timeout,
        }
    }

    /// Notify nearby users on a detached task
    pub fn spawn_nearby(self: &Arc<Self>, issue: IssueDoc) {
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            let issue_id = issue.id.clone();
            let report = notifier.notify_nearby(&issue, notifier.radius_km).await;
            match report {
                Ok(report) => debug!(
                    issue_id = %issue_id,
                    matched = report.matched,
                    delivered = report.delivered,
                    failed = report.failed,
                    "Nearby fan-out finished"
                ),
                Err(e) => warn!(issue_id = %issue_id, error = %e, "Nearby fan-out aborted"),
            }
        });
    }

    /// Persist and push a `nearby_issue` notification to each matching user.
    ///
    /// Only the user query can fail the run; a failure for one recipient is
    /// counted and the loop moves on.
    pub async fn notify_nearby(&self, issue: &IssueDoc, radius_km: f64) -> Result<NearbyReport> {
        let query = ProximityQuery::around(issue.location, radius_km).excluding(&issue.created_by);
        let recipients = bounded(self.store_timeout, self.store.users_within(&query)).await?;

        let mut report = NearbyReport {
            matched: recipients.len(),
            ..Default::default()
        };

        let body = match issue.area() {
            Some(area) => format!("{} was reported near you in {}", issue.title, area),
            None => format!("{} was reported near you", issue.title),
        };

        for recipient in recipients {
            let kind = NotificationKind::NearbyIssue;
            let notification = NotificationDoc::new(&recipient, kind, "New issue nearby", &body)
                .for_issue(&issue.id)
                .with_metadata(serde_json::json!({
                    "category": issue.category,
                    "radiusKm": radius_km,
                }));

            match self.deliver(notification).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        issue_id = %issue.id,
                        recipient = %recipient,
                        error = %e,
                        "Nearby notification failed"
                    );
                }
            }
        }

        info!(
            issue_id = %issue.id,
            matched = report.matched,
            delivered = report.delivered,
            failed = report.failed,
            "Notified nearby users"
        );
        Ok(report)
    }

    /// Notify the issue creator on a detached task.
    ///
    /// Skipped when the actor is the creator or the creator's account is
    /// inactive. A creator with no user record is still notified.
    pub fn spawn_owner_notice(
        self: &Arc<Self>,
        issue: &IssueDoc,
        actor_id: &str,
        notice: OwnerNotice,
    ) {
        if issue.created_by == actor_id || issue.created_by.is_empty() {
            return;
        }

        let notification =
            NotificationDoc::new(&issue.created_by, notice.kind, notice.title, notice.body)
                .for_issue(&issue.id)
                .with_metadata(notice.metadata);
        let notifier = Arc::clone(self);
        tokio::spawn(async move {
            let kind = notification.kind;
            let recipient = notification.recipient.clone();
            let owner = bounded(notifier.store_timeout, notifier.store.find_user(&recipient)).await;
            match owner {
                Ok(Some(user)) if !user.is_active => {
                    debug!(recipient = %recipient, kind = %kind, "Owner inactive, notice skipped");
                    return;
                }
                Ok(_) => {}
                Err(e) => debug!(recipient = %recipient, error = %e, "Owner lookup failed"),
            }
            if let Err(e) = notifier.deliver(notification).await {
                warn!(
                    recipient = %recipient,
                    kind = %kind,
                    error = %e,
                    "Owner notification failed"
                );
            }
        });
    }

    /// Persist, then push the stored record to the recipient's personal room
    async fn deliver(&self, notification: NotificationDoc) -> Result<()> {
        let stored = bounded(self.store_timeout, self.store.insert_notification(notification))
            .await
            .map_err(|e| PulseError::Delivery(e.to_string()))?;
        self.emitter.notification(&stored.payload());
        Ok(())
    }
}
