//! User document schema
//!
//! Only the fields the proximity query needs. Users are read-only here.

use bson::{doc, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, Stamped};
use crate::db::schemas::Metadata;
use crate::geo::GeoPoint;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default)]
    pub metadata: Metadata,

    #[serde(default)]
    pub name: String,

    /// Home location, `[0,0]` when the user never set one
    #[serde(default)]
    pub location: GeoPoint,

    /// Whether the user account is active
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl UserDoc {
    pub fn new(id: impl Into<String>, name: impl Into<String>, location: GeoPoint) -> Self {
        Self {
            id: id.into(),
            metadata: Metadata::new(),
            name: name.into(),
            location,
            is_active: true,
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Required by $nearSphere
            (
                doc! { "location": "2dsphere" },
                Some(
                    IndexOptions::builder()
                        .name("location_2dsphere".to_string())
                        .build(),
                ),
            ),
            (
                doc! { "is_active": 1 },
                Some(
                    IndexOptions::builder()
                        .name("is_active_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}

impl Stamped for UserDoc {
    fn stamp(&mut self, now: DateTime) {
        self.metadata.created_at = Some(now);
        self.metadata.updated_at = Some(now);
    }
}
