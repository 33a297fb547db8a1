//! Notification inbox for the calling user

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;

use super::{actor, respond};
use crate::db::schemas::NotificationPayload;
use crate::server::AppState;
use crate::store::bounded;
use crate::types::PulseError;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

#[derive(Debug, Serialize)]
pub struct NotificationList {
    pub items: Vec<NotificationPayload>,
    pub count: usize,
}

/// Query options parsed from `?unread=true&limit=N`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListOptions {
    pub unread_only: bool,
    pub limit: usize,
}

impl ListOptions {
    pub fn from_query(query: Option<&str>) -> Self {
        let mut options = Self {
            unread_only: false,
            limit: DEFAULT_LIMIT,
        };
        for (key, value) in query
            .unwrap_or("")
            .split('&')
            .filter_map(|pair| pair.split_once('='))
        {
            match key {
                "unread" => options.unread_only = matches!(value, "true" | "1"),
                "limit" => {
                    if let Ok(n) = value.parse::<usize>() {
                        options.limit = n.clamp(1, MAX_LIMIT);
                    }
                }
                _ => {}
            }
        }
        options
    }
}

/// GET /api/notifications
pub async fn list(req: Request<Incoming>, state: &AppState) -> Response<Full<Bytes>> {
    let result = async {
        let actor = actor(&req, state)?;
        let options = ListOptions::from_query(req.uri().query());
        let items = bounded(
            state.engine.config().store_timeout,
            state
                .store
                .list_notifications(&actor.user_id, options.unread_only, options.limit),
        )
        .await?;

        let items: Vec<NotificationPayload> = items.iter().map(|n| n.payload()).collect();
        Ok::<_, PulseError>(NotificationList {
            count: items.len(),
            items,
        })
    }
    .await;
    respond(StatusCode::OK, result)
}

/// POST /api/notifications/{id}/read
pub async fn mark_read(
    req: Request<Incoming>,
    state: &AppState,
    notification_id: &str,
) -> Response<Full<Bytes>> {
    let result = async {
        let actor = actor(&req, state)?;
        let updated = bounded(
            state.engine.config().store_timeout,
            state
                .store
                .mark_notification_read(notification_id, &actor.user_id),
        )
        .await?;

        if !updated {
            return Err(PulseError::NotFound(format!(
                "notification {}",
                notification_id
            )));
        }
        Ok::<_, PulseError>(serde_json::json!({ "id": notification_id, "isRead": true }))
    }
    .await;
    respond(StatusCode::OK, result)
}
