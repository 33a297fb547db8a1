//! Liveness endpoint
//!
//! `/health` always answers 200 while the process runs. `status` reports
//! `degraded` when the store stops answering pings.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::response::json_response;
use crate::server::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    /// `online` or `degraded`
    pub status: &'static str,
    pub version: &'static str,
    pub commit: &'static str,
    pub built_at: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    pub node_id: String,
    pub dev_mode: bool,
    pub store: StoreHealth,
    pub channel: ChannelHealth,
}

#[derive(Serialize)]
pub struct StoreHealth {
    pub backend: &'static str,
    pub connected: bool,
}

#[derive(Serialize)]
pub struct ChannelHealth {
    pub connections: usize,
    pub rooms: usize,
    pub dropped: u64,
}

pub async fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let connected = state.store.ping().await;

    let body = HealthResponse {
        healthy: true,
        status: if connected { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("GIT_COMMIT_SHORT"),
        built_at: env!("BUILD_TIMESTAMP"),
        uptime: state.started_at.elapsed().as_secs(),
        node_id: state.args.node_id.to_string(),
        dev_mode: state.args.dev_mode,
        store: StoreHealth {
            backend: state.store.backend(),
            connected,
        },
        channel: ChannelHealth {
            connections: state.hub.connection_count(),
            rooms: state.hub.room_count(),
            dropped: state.hub.dropped_count(),
        },
    };

    json_response(StatusCode::OK, &body)
}
