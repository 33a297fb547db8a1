//! Issue document schema
//!
//! An issue carries its rating multiset together with the fields derived from
//! it. The derived fields are only ever written by the aggregate engine, in the
//! same document write that changes the multiset.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::db::mongo::{IntoIndexes, Stamped};
use crate::db::schemas::Metadata;
use crate::geo::GeoPoint;
use crate::types::PulseError;

/// Collection name for issues
pub const ISSUE_COLLECTION: &str = "issues";

/// Issue lifecycle status
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Pending,
    Verified,
    Critical,
    Resolved,
    Rejected,
}

impl IssueStatus {
    pub const ALL: [IssueStatus; 5] = [
        IssueStatus::Pending,
        IssueStatus::Verified,
        IssueStatus::Critical,
        IssueStatus::Resolved,
        IssueStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Pending => "pending",
            IssueStatus::Verified => "verified",
            IssueStatus::Critical => "critical",
            IssueStatus::Resolved => "resolved",
            IssueStatus::Rejected => "rejected",
        }
    }

    /// Resolved and Rejected are never left by the automatic rule
    pub fn is_terminal(&self) -> bool {
        matches!(self, IssueStatus::Resolved | IssueStatus::Rejected)
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueStatus {
    type Err = PulseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        IssueStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| PulseError::InvalidStatus(s.to_string()))
    }
}

/// One rater's contribution to the multiset
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Verification {
    pub user_id: String,
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime,
}

/// Input for creating an issue
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct NewIssue {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub ward: Option<String>,
    /// Filled from the caller's identity, never from the body
    #[serde(skip)]
    pub created_by: String,
}

/// Issue document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct IssueDoc {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    pub location: GeoPoint,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ward: Option<String>,

    pub created_by: String,

    /// Rating multiset, at most one entry per user
    #[serde(default)]
    pub verifications: Vec<Verification>,

    #[serde(default)]
    pub verification_count: u32,

    #[serde(default)]
    pub average_severity: f64,

    #[serde(default)]
    pub status: IssueStatus,

    /// Users who currently like the issue
    #[serde(default)]
    pub likes: Vec<String>,

    #[serde(default)]
    pub like_count: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime>,

    /// Bumped by every write; writes are conditioned on the previous value
    #[serde(default)]
    pub version: i64,
}

impl IssueDoc {
    /// Fresh aggregate: empty multiset, pending, zero counters
    pub fn new(id: String, input: NewIssue) -> Self {
        Self {
            id,
            metadata: Metadata::new(),
            title: input.title,
            description: input.description,
            category: input.category,
            location: GeoPoint::new(input.longitude, input.latitude),
            address: input.address,
            city: input.city,
            ward: input.ward,
            created_by: input.created_by,
            verifications: Vec::new(),
            verification_count: 0,
            average_severity: 0.0,
            status: IssueStatus::Pending,
            likes: Vec::new(),
            like_count: 0,
            resolved_at: None,
            version: 0,
        }
    }

    pub fn has_verified(&self, user_id: &str) -> bool {
        self.verifications.iter().any(|v| v.user_id == user_id)
    }

    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.iter().any(|u| u == user_id)
    }

    pub fn ratings(&self) -> impl Iterator<Item = u8> + '_ {
        self.verifications.iter().map(|v| v.rating)
    }

    /// Geographic area room name, ward preferred over city
    pub fn area(&self) -> Option<&str> {
        self.ward
            .as_deref()
            .or(self.city.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    pub fn summary(&self) -> IssueSummary {
        IssueSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            category: self.category.clone(),
            longitude: self.location.longitude(),
            latitude: self.location.latitude(),
            address: self.address.clone(),
            city: self.city.clone(),
            ward: self.ward.clone(),
            created_by: self.created_by.clone(),
            verification_count: self.verification_count,
            average_severity: self.average_severity,
            status: self.status,
            like_count: self.like_count,
            created_at: self.metadata.created_at.map(|d| d.timestamp_millis()),
            resolved_at: self.resolved_at.map(|d| d.timestamp_millis()),
        }
    }
}

/// Client-facing view of an issue aggregate
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ward: Option<String>,
    pub created_by: String,
    pub verification_count: u32,
    pub average_severity: f64,
    pub status: IssueStatus,
    pub like_count: u32,
    pub created_at: Option<i64>,
    pub resolved_at: Option<i64>,
}

impl IntoIndexes for IssueDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "location": "2dsphere" },
                Some(
                    IndexOptions::builder()
                        .name("location_2dsphere".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "status": 1, "metadata.created_at": -1 },
                Some(
                    IndexOptions::builder()
                        .name("status_created_index".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "created_by": 1 },
                Some(
                    IndexOptions::builder()
                        .name("created_by_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl Stamped for IssueDoc {
    fn stamp(&mut self, now: DateTime) {
        self.metadata.created_at = Some(now);
        self.metadata.updated_at = Some(now);
    }
}
