//! WebSocket connections to the real-time channel
//!
//! A connection is identified when it presents a valid token (`?token=` or
//! `Authorization: Bearer`) and then sits in its personal room. Anything else
//! is anonymous; it can still join issue and area rooms. Nothing about a
//! connection outlives its socket.

use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use super::events::{ClientMessage, PingReply, Room};
use super::hub::{ConnectionId, RoomHub};
use crate::auth::{self, extract_token_from_header, extract_token_from_query, JwtValidator};
use crate::server::response::json_response;
use crate::types::PulseError;

/// WebSocket type after upgrade
type HyperWebSocket =
    hyper_tungstenite::WebSocketStream<hyper_util::rt::TokioIo<hyper::upgrade::Upgraded>>;

/// Per-connection state, owned by the connection task
#[derive(Debug, Default, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected {
        id: ConnectionId,
        user: Option<String>,
        rooms: HashSet<Room>,
    },
}

impl ConnectionState {
    /// Register with the hub; identified users join their personal room
    pub fn connect(hub: &RoomHub, user: Option<String>) -> (Self, mpsc::Receiver<String>) {
        let (id, rx) = hub.register();
        let mut rooms = HashSet::new();
        if let Some(user_id) = &user {
            let room = Room::User(user_id.clone());
            hub.join(id, room.clone());
            rooms.insert(room);
        }
        (ConnectionState::Connected { id, user, rooms }, rx)
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { user, .. } => user.as_deref(),
            ConnectionState::Disconnected => None,
        }
    }

    pub fn is_in(&self, room: &Room) -> bool {
        match self {
            ConnectionState::Connected { rooms, .. } => rooms.contains(room),
            ConnectionState::Disconnected => false,
        }
    }

    /// Apply a client message, returning the text to send back if any
    pub fn apply(&mut self, hub: &RoomHub, msg: ClientMessage) -> Option<String> {
        let ConnectionState::Connected { id, rooms, .. } = self else {
            return None;
        };

        match msg {
            ClientMessage::Ping => serde_json::to_string(&PingReply::now()).ok(),
            ClientMessage::JoinIssue { issue_id } => {
                join(hub, *id, rooms, non_empty(issue_id).map(Room::Issue));
                None
            }
            ClientMessage::LeaveIssue { issue_id } => {
                leave(hub, *id, rooms, non_empty(issue_id).map(Room::Issue));
                None
            }
            ClientMessage::JoinArea { area } => {
                join(hub, *id, rooms, non_empty(area).map(Room::Area));
                None
            }
            ClientMessage::LeaveArea { area } => {
                leave(hub, *id, rooms, non_empty(area).map(Room::Area));
                None
            }
        }
    }

    /// Leave every room and drop the hub registration
    pub fn disconnect(&mut self, hub: &RoomHub) {
        if let ConnectionState::Connected { id, rooms, .. } = std::mem::take(self) {
            hub.unregister(id, rooms.iter());
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn join(hub: &RoomHub, id: ConnectionId, rooms: &mut HashSet<Room>, room: Option<Room>) {
    if let Some(room) = room {
        if hub.join(id, room.clone()) {
            rooms.insert(room);
        }
    }
}

fn leave(hub: &RoomHub, id: ConnectionId, rooms: &mut HashSet<Room>, room: Option<Room>) {
    if let Some(room) = room {
        hub.leave(id, &room);
        rooms.remove(&room);
    }
}

/// User id for a request, None when no valid token is presented
pub fn identify_request(jwt: &JwtValidator, req: &Request<Incoming>) -> Option<String> {
    let token = extract_token_from_query(req.uri().query(), "token").or_else(|| {
        extract_token_from_header(
            req.headers()
                .get("authorization")
                .and_then(|h| h.to_str().ok()),
        )
        .map(str::to_string)
    })?;

    match auth::identify(jwt, &token) {
        Some(actor) => Some(actor.user_id),
        None => {
            debug!("Channel token rejected, continuing anonymously");
            None
        }
    }
}

/// Handle WebSocket upgrade for the real-time channel
pub async fn handle_channel_upgrade(
    hub: Arc<RoomHub>,
    jwt: Arc<JwtValidator>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    if !hyper_tungstenite::is_upgrade_request(&req) {
        return json_response(
            StatusCode::BAD_REQUEST,
            &serde_json::json!({ "error": "WebSocket upgrade required" }),
        );
    }

    let user = identify_request(&jwt, &req);

    let (response, websocket) = match hyper_tungstenite::upgrade(req, None) {
        Ok(upgrade) => upgrade,
        Err(e) => {
            error!("WebSocket upgrade failed: {}", e);
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &serde_json::json!({ "error": "WebSocket upgrade failed" }),
            );
        }
    };

    tokio::spawn(async move {
        match websocket.await {
            Ok(ws) => {
                if let Err(e) = run_connection(ws, hub, user).await {
                    warn!("Channel connection error: {}", e);
                }
            }
            Err(e) => {
                error!("WebSocket connection failed: {}", e);
            }
        }
    });

    let (parts, _body) = response.into_parts();
    Response::from_parts(parts, Full::new(Bytes::new()))
}

async fn run_connection(
    ws: HyperWebSocket,
    hub: Arc<RoomHub>,
    user: Option<String>,
) -> Result<(), PulseError> {
    let (mut sender, mut receiver) = ws.split();
    let (mut state, mut rx) = ConnectionState::connect(&hub, user);

    info!(user = ?state.user(), "Channel client connected");

    let result = loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(text) => {
                        if let Err(e) = sender.send(WsMessage::Text(text)).await {
                            break Err(e.into());
                        }
                    }
                    // Hub dropped this connection
                    None => break Ok(()),
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                if let Some(reply) = state.apply(&hub, msg) {
                                    if let Err(e) = sender.send(WsMessage::Text(reply)).await {
                                        break Err(e.into());
                                    }
                                }
                            }
                            Err(e) => debug!("Ignoring unrecognized client message: {}", e),
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        let _ = sender.send(WsMessage::Pong(data)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break Ok(()),
                    Some(Err(e)) => break Err(e.into()),
                    _ => {}
                }
            }
        }
    };

    state.disconnect(&hub);
    info!("Channel client disconnected");
    result
}
