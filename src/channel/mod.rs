//! Real-time channel
//!
//! The engine and notifier publish through `EventEmitter`, which wraps an
//! injected `Publisher`. Publishing never fails and never blocks; delivery is
//! best effort.
//!
//! ## Protocol
//!
//! Connect: `ws://host:8080/ws?token=<jwt>` (token optional)
//!
//! Messages (server → client), all shaped `{event, issueId?, data, ts}`:
//! - `issueCreated` - broadcast to every connection
//! - `issueLiked`, `issueVerified`, `severityUpdate`, `newComment` - issue room
//! - `issueStatusUpdate` - issue room and the issue's area room
//! - `notification`, `userNotification` - personal room
//!
//! Messages (client → server):
//! - `{"type":"join_issue","issueId":"..."}` / `leave_issue`
//! - `{"type":"join_area","area":"..."}` / `leave_area`
//! - `{"type":"ping"}` - answered with `{"status":"ok","ts":...}`

pub mod connection;
pub mod emitter;
pub mod events;
pub mod hub;

pub use connection::{handle_channel_upgrade, ConnectionState};
pub use emitter::EventEmitter;
pub use events::{Audience, ClientMessage, EventEnvelope, EventName, Room};
pub use hub::{ConnectionId, RoomHub};

use tracing::trace;

/// Sink for outbound events
pub trait Publisher: Send + Sync {
    fn publish(&self, audience: Audience, envelope: EventEnvelope);
}

/// Publisher used when no real-time channel is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledChannel;

impl Publisher for DisabledChannel {
    fn publish(&self, audience: Audience, envelope: EventEnvelope) {
        trace!(event = %envelope.event, ?audience, "Channel disabled, event discarded");
    }
}
