//! Issue aggregate engine
//!
//! Owns every write to an issue. A mutation holds the issue's lock, reads the
//! current document, applies the change and recomputes the derived fields,
//! then writes the whole document back conditioned on the version it read.
//! A lost race re-reads and tries again. Events are published before the lock
//! is released so each issue room sees changes in mutation order.
//!
//! Waiting for the lock and every retry share one `request_timeout` deadline.

pub mod locks;
pub mod status;

pub use locks::{IssueGuard, IssueLocks};
pub use status::{average_severity, next_status};

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::channel::EventEmitter;
use crate::config::Args;
use crate::db::schemas::{IssueDoc, IssueStatus, NewIssue, NotificationKind, Verification};
use crate::notifier::{OwnerNotice, ProximityNotifier};
use crate::store::{bounded, AggregateStore};
use crate::types::{PulseError, Result};

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub store_timeout: Duration,
    /// Deadline for a whole mutation, lock wait included
    pub request_timeout: Duration,
    /// Re-read attempts after a version mismatch
    pub max_cas_retries: u32,
    pub nearby_radius_km: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(15),
            max_cas_retries: 5,
            nearby_radius_km: 5.0,
        }
    }
}

impl From<&Args> for EngineConfig {
    fn from(args: &Args) -> Self {
        Self {
            store_timeout: args.store_timeout(),
            request_timeout: args.request_timeout(),
            max_cas_retries: args.max_cas_retries,
            nearby_radius_km: args.nearby_radius_km,
        }
    }
}

/// Result of a recorded verification
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub issue: IssueDoc,
    pub previous_status: IssueStatus,
}

impl VerificationOutcome {
    pub fn status_changed(&self) -> bool {
        self.issue.status != self.previous_status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeOutcome {
    pub liked: bool,
    pub like_count: u32,
}

pub struct IssueEngine {
    store: Arc<dyn AggregateStore>,
    emitter: EventEmitter,
    notifier: Arc<ProximityNotifier>,
    locks: IssueLocks,
    config: EngineConfig,
}

impl IssueEngine {
    pub fn new(
        store: Arc<dyn AggregateStore>,
        emitter: EventEmitter,
        notifier: Arc<ProximityNotifier>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            emitter,
            notifier,
            locks: IssueLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Persist a fresh aggregate and start the nearby fan-out
    pub async fn create_issue(&self, input: NewIssue) -> Result<IssueDoc> {
        if input.title.trim().is_empty() {
            return Err(PulseError::BadRequest("title is required".into()));
        }
        if input.created_by.is_empty() {
            return Err(PulseError::BadRequest("creator is required".into()));
        }

        let issue = IssueDoc::new(uuid::Uuid::new_v4().to_string(), input);
        if !issue.location.is_valid() {
            return Err(PulseError::BadRequest(format!(
                "invalid coordinates [{}, {}]",
                issue.location.longitude(),
                issue.location.latitude()
            )));
        }

        let issue = bounded(self.config.store_timeout, self.store.insert_issue(issue)).await?;
        info!(issue_id = %issue.id, created_by = %issue.created_by, "Issue created");

        self.emitter.issue_created(&issue);
        self.notifier.spawn_nearby(issue.clone());
        Ok(issue)
    }

    pub async fn get_issue(&self, issue_id: &str) -> Result<IssueDoc> {
        bounded(self.config.store_timeout, self.store.find_issue(issue_id))
            .await?
            .ok_or_else(|| PulseError::NotFound(format!("issue {}", issue_id)))
    }

    /// Record one rating from `rater_id` and recompute the aggregate
    pub async fn add_verification(
        &self,
        issue_id: &str,
        rater_id: &str,
        rating: i64,
        comment: Option<String>,
    ) -> Result<VerificationOutcome> {
        let rating = u8::try_from(rating)
            .ok()
            .filter(|r| (1..=5).contains(r))
            .ok_or(PulseError::InvalidRating(rating))?;
        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        let (_guard, issue, previous_status) = self
            .locked_write(issue_id, |issue| {
                if issue.status.is_terminal() {
                    return Err(PulseError::IssueClosed {
                        issue_id: issue.id.clone(),
                        status: issue.status.to_string(),
                    });
                }
                if issue.has_verified(rater_id) {
                    return Err(PulseError::AlreadyVerified {
                        issue_id: issue.id.clone(),
                        user_id: rater_id.to_string(),
                    });
                }

                let previous = issue.status;
                issue.verifications.push(Verification {
                    user_id: rater_id.to_string(),
                    rating,
                    comment: comment.clone(),
                    created_at: bson::DateTime::now(),
                });
                issue.verification_count = issue.verifications.len() as u32;
                issue.average_severity = average_severity(issue.ratings());
                issue.status =
                    next_status(issue.status, issue.average_severity, issue.verification_count);
                Ok(previous)
            })
            .await?;

        let outcome = VerificationOutcome {
            issue,
            previous_status,
        };
        let issue = &outcome.issue;
        debug!(
            issue_id = %issue.id,
            rater = %rater_id,
            rating,
            count = issue.verification_count,
            average = issue.average_severity,
            status = %issue.status,
            "Verification recorded"
        );

        self.emitter.issue_verified(issue, rater_id, rating);
        self.emitter.severity_update(issue);
        if outcome.status_changed() {
            info!(
                issue_id = %issue.id,
                from = %previous_status,
                to = %issue.status,
                "Issue status changed by verification"
            );
            self.emitter.issue_status_update(issue, previous_status);
        }
        if let Some(text) = &comment {
            self.emitter.new_comment(&issue.id, rater_id, text);
        }
        self.emitter.user_notification(
            rater_id,
            serde_json::json!({
                "message": "Verification recorded",
                "issueId": issue.id,
                "rating": rating,
            }),
        );

        self.notifier.spawn_owner_notice(
            issue,
            rater_id,
            OwnerNotice::new(
                NotificationKind::Verified,
                "Your issue was verified",
                format!("\"{}\" received a severity rating of {}/5", issue.title, rating),
            )
            .with_metadata(serde_json::json!({
                "rating": rating,
                "averageSeverity": issue.average_severity,
                "verificationCount": issue.verification_count,
            })),
        );
        if let Some(text) = &comment {
            self.notifier.spawn_owner_notice(
                issue,
                rater_id,
                OwnerNotice::new(
                    NotificationKind::Commented,
                    "New comment on your issue",
                    text.clone(),
                ),
            );
        }
        if outcome.status_changed() {
            self.notifier.spawn_owner_notice(
                issue,
                rater_id,
                OwnerNotice::new(
                    NotificationKind::StatusChanged,
                    "Issue status changed",
                    format!("\"{}\" is now {}", issue.title, issue.status),
                ),
            );
        }

        Ok(outcome)
    }

    /// Add or remove `user_id` from the issue's likes
    pub async fn toggle_like(&self, issue_id: &str, user_id: &str) -> Result<LikeOutcome> {
        let (_guard, issue, liked) = self
            .locked_write(issue_id, |issue| {
                let liked = if issue.is_liked_by(user_id) {
                    issue.likes.retain(|u| u != user_id);
                    false
                } else {
                    issue.likes.push(user_id.to_string());
                    true
                };
                issue.like_count = issue.likes.len() as u32;
                Ok(liked)
            })
            .await?;

        self.emitter
            .issue_liked(&issue.id, user_id, liked, issue.like_count);
        if liked {
            self.notifier.spawn_owner_notice(
                &issue,
                user_id,
                OwnerNotice::new(
                    NotificationKind::Liked,
                    "Someone liked your issue",
                    format!("\"{}\" now has {} likes", issue.title, issue.like_count),
                ),
            );
        }

        Ok(LikeOutcome {
            liked,
            like_count: issue.like_count,
        })
    }

    /// Administrative status override; allowed from any status
    pub async fn set_status(
        &self,
        issue_id: &str,
        status: &str,
        actor_id: &str,
    ) -> Result<IssueDoc> {
        let status: IssueStatus = status.parse()?;

        let (_guard, issue, previous) = self
            .locked_write(issue_id, |issue| {
                let previous = issue.status;
                issue.status = status;
                issue.resolved_at = match (status, issue.resolved_at) {
                    (IssueStatus::Resolved, Some(at)) => Some(at),
                    (IssueStatus::Resolved, None) => Some(bson::DateTime::now()),
                    _ => None,
                };
                Ok(previous)
            })
            .await?;

        info!(
            issue_id = %issue.id,
            actor = %actor_id,
            from = %previous,
            to = %issue.status,
            "Issue status set"
        );
        self.emitter.issue_status_update(&issue, previous);

        let notice = if issue.status == IssueStatus::Resolved {
            OwnerNotice::new(
                NotificationKind::Resolved,
                "Your issue was resolved",
                format!("\"{}\" has been marked resolved", issue.title),
            )
        } else {
            OwnerNotice::new(
                NotificationKind::StatusChanged,
                "Issue status changed",
                format!("\"{}\" is now {}", issue.title, issue.status),
            )
        };
        self.notifier.spawn_owner_notice(
            &issue,
            actor_id,
            notice.with_metadata(serde_json::json!({
                "status": issue.status,
                "previousStatus": previous,
            })),
        );

        Ok(issue)
    }

    /// Lock the issue and run `write` under one `request_timeout` deadline.
    ///
    /// The guard is returned so the caller can publish before releasing it.
    /// On expiry the pending store call is dropped, so nothing is written.
    async fn locked_write<R, F>(
        &self,
        issue_id: &str,
        apply: F,
    ) -> Result<(IssueGuard<'_>, IssueDoc, R)>
    where
        F: FnMut(&mut IssueDoc) -> Result<R>,
    {
        bounded(self.config.request_timeout, async {
            let guard = self.locks.acquire(issue_id).await;
            let (issue, result) = self.write(issue_id, apply).await?;
            Ok((guard, issue, result))
        })
        .await
    }

    /// Read-modify-write with version check. Caller holds the issue lock.
    async fn write<R, F>(&self, issue_id: &str, mut apply: F) -> Result<(IssueDoc, R)>
    where
        F: FnMut(&mut IssueDoc) -> Result<R>,
    {
        let timeout = self.config.store_timeout;

        for attempt in 0..=self.config.max_cas_retries {
            let current = bounded(timeout, self.store.find_issue(issue_id))
                .await?
                .ok_or_else(|| PulseError::NotFound(format!("issue {}", issue_id)))?;

            let mut next = current.clone();
            let result = apply(&mut next)?;
            next.version = current.version + 1;
            next.metadata.touch();

            // A replace that times out here can still commit on a remote store;
            // the caller's retry of the same rating then gets AlreadyVerified
            let replace = self.store.replace_issue_if_version(&next, current.version);
            if bounded(timeout, replace).await? {
                return Ok((next, result));
            }

            warn!(
                issue_id = %issue_id,
                attempt = attempt + 1,
                "Issue changed underneath write, retrying"
            );
        }

        Err(PulseError::Conflict(format!(
            "issue {} kept changing after {} retries",
            issue_id, self.config.max_cas_retries
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::emitter::tests::Recorder;
    use crate::channel::{Audience, EventName, Room};
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        recorder: Arc<Recorder>,
        engine: IssueEngine,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(Recorder::default());
        let emitter = EventEmitter::new(recorder.clone());
        let config = EngineConfig {
            store_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let notifier = Arc::new(ProximityNotifier::new(
            store.clone(),
            emitter.clone(),
            config.nearby_radius_km,
            config.store_timeout,
        ));
        let engine = IssueEngine::new(store.clone(), emitter, notifier, config);
        Fixture {
            store,
            recorder,
            engine,
        }
    }

    fn new_issue() -> NewIssue {
        NewIssue {
            title: "Broken water main".into(),
            description: "Water everywhere".into(),
            category: Some("water".into()),
            longitude: 2.35,
            latitude: 48.85,
            address: None,
            city: Some("Paris".into()),
            ward: None,
            created_by: "owner".into(),
        }
    }

    fn events_named(recorder: &Recorder, name: EventName) -> Vec<(Audience, serde_json::Value)> {
        recorder
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, e)| e.event == name)
            .map(|(a, e)| (a.clone(), e.data.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let f = fixture();
        let issue = f.engine.create_issue(new_issue()).await.unwrap();

        assert_eq!(issue.status, IssueStatus::Pending);
        assert_eq!(issue.verification_count, 0);
        assert_eq!(issue.average_severity, 0.0);
        assert_eq!(issue.like_count, 0);
        assert_eq!(events_named(&f.recorder, EventName::IssueCreated).len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let f = fixture();
        let mut blank = new_issue();
        blank.title = "  ".into();
        assert!(matches!(
            f.engine.create_issue(blank).await,
            Err(PulseError::BadRequest(_))
        ));

        let mut off_map = new_issue();
        off_map.latitude = 123.0;
        assert!(matches!(
            f.engine.create_issue(off_map).await,
            Err(PulseError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_rating_out_of_range() {
        let f = fixture();
        let issue = f.engine.create_issue(new_issue()).await.unwrap();
        for rating in [0, 6, -1, 300] {
            let err = f
                .engine
                .add_verification(&issue.id, "rater", rating, None)
                .await
                .unwrap_err();
            assert!(matches!(err, PulseError::InvalidRating(r) if r == rating));
        }
        let stored = f.engine.get_issue(&issue.id).await.unwrap();
        assert_eq!(stored.verification_count, 0);
    }

    #[tokio::test]
    async fn test_verify_unknown_issue() {
        let f = fixture();
        let err = f
            .engine
            .add_verification("missing", "rater", 3, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PulseError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_duplicate_verification_rejected() {
        let f = fixture();
        let issue = f.engine.create_issue(new_issue()).await.unwrap();
        f.engine
            .add_verification(&issue.id, "rater", 4, None)
            .await
            .unwrap();

        let err = f
            .engine
            .add_verification(&issue.id, "rater", 5, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PulseError::AlreadyVerified { .. }));

        let stored = f.engine.get_issue(&issue.id).await.unwrap();
        assert_eq!(stored.verification_count, 1);
        assert_eq!(stored.average_severity, 4.0);
    }

    #[tokio::test]
    async fn test_verification_events_and_comment() {
        let f = fixture();
        let issue = f.engine.create_issue(new_issue()).await.unwrap();
        f.engine
            .add_verification(&issue.id, "rater", 3, Some("Still leaking".into()))
            .await
            .unwrap();

        let room = Audience::Room(Room::Issue(issue.id.clone()));
        let verified = events_named(&f.recorder, EventName::IssueVerified);
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].0, room);
        assert_eq!(verified[0].1["verificationCount"], 1);

        let severity = events_named(&f.recorder, EventName::SeverityUpdate);
        assert_eq!(severity[0].1["averageSeverity"], 3.0);

        let comments = events_named(&f.recorder, EventName::NewComment);
        assert_eq!(comments[0].1["comment"], "Still leaking");

        assert!(events_named(&f.recorder, EventName::IssueStatusUpdate).is_empty());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let kinds: Vec<_> = f
            .store
            .notifications_for("owner")
            .iter()
            .map(|n| n.kind)
            .collect();
        assert!(kinds.contains(&NotificationKind::Verified));
        assert!(kinds.contains(&NotificationKind::Commented));
    }

    #[tokio::test]
    async fn test_like_toggles() {
        let f = fixture();
        let issue = f.engine.create_issue(new_issue()).await.unwrap();

        let first = f.engine.toggle_like(&issue.id, "fan").await.unwrap();
        assert_eq!(
            first,
            LikeOutcome {
                liked: true,
                like_count: 1
            }
        );
        let second = f.engine.toggle_like(&issue.id, "fan").await.unwrap();
        assert_eq!(
            second,
            LikeOutcome {
                liked: false,
                like_count: 0
            }
        );

        let stored = f.engine.get_issue(&issue.id).await.unwrap();
        assert!(stored.likes.is_empty());
        assert_eq!(events_named(&f.recorder, EventName::IssueLiked).len(), 2);
    }

    #[tokio::test]
    async fn test_set_status_parses_and_stamps() {
        let f = fixture();
        let issue = f.engine.create_issue(new_issue()).await.unwrap();

        let err = f
            .engine
            .set_status(&issue.id, "archived", "official")
            .await
            .unwrap_err();
        assert!(matches!(err, PulseError::InvalidStatus(_)));

        let resolved = f
            .engine
            .set_status(&issue.id, "Resolved", "official")
            .await
            .unwrap();
        assert_eq!(resolved.status, IssueStatus::Resolved);
        assert!(resolved.resolved_at.is_some());

        let reopened = f
            .engine
            .set_status(&issue.id, "pending", "official")
            .await
            .unwrap();
        assert_eq!(reopened.status, IssueStatus::Pending);
        assert!(reopened.resolved_at.is_none());

        let updates = events_named(&f.recorder, EventName::IssueStatusUpdate);
        // Issue room plus the Paris area room for each of the two changes
        assert_eq!(updates.len(), 4);
        assert!(updates
            .iter()
            .any(|(a, _)| *a == Audience::Room(Room::Area("Paris".into()))));
    }

    #[tokio::test]
    async fn test_override_then_rating_reevaluates() {
        let f = fixture();
        let issue = f.engine.create_issue(new_issue()).await.unwrap();
        for i in 0..5 {
            f.engine
                .add_verification(&issue.id, &format!("r{i}"), 2, None)
                .await
                .unwrap();
        }
        f.engine
            .set_status(&issue.id, "pending", "official")
            .await
            .unwrap();

        let outcome = f
            .engine
            .add_verification(&issue.id, "late", 2, None)
            .await
            .unwrap();
        assert_eq!(outcome.previous_status, IssueStatus::Pending);
        assert_eq!(outcome.issue.status, IssueStatus::Verified);
        assert!(outcome.status_changed());
    }

    #[tokio::test]
    async fn test_store_timeout_surfaces() {
        let f = fixture();
        let issue = f.engine.create_issue(new_issue()).await.unwrap();
        f.store.set_latency(Duration::from_secs(2));

        let err = f
            .engine
            .add_verification(&issue.id, "rater", 3, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PulseError::Timeout(_)));
        assert!(err.is_retryable());
    }
}
