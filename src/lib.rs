//! civic-pulse
//!
//! Issue aggregate engine and real-time notification gateway for civic issue
//! reporting. Citizens report issues, rate their severity and like them; the
//! engine keeps each issue's derived fields and status consistent under
//! concurrent writes, the proximity notifier tells nearby residents about new
//! reports, and the real-time channel pushes every change to WebSocket rooms.

pub mod auth;
pub mod channel;
pub mod config;
pub mod db;
pub mod engine;
pub mod geo;
pub mod logging;
pub mod notifier;
pub mod routes;
pub mod server;
pub mod store;
pub mod types;

pub use channel::{EventEmitter, Publisher, RoomHub};
pub use config::Args;
pub use engine::{EngineConfig, IssueEngine, LikeOutcome, VerificationOutcome};
pub use notifier::{NearbyReport, ProximityNotifier};
pub use store::{AggregateStore, MemoryStore, MongoStore};
pub use types::{ErrorKind, PulseError, Result};
