//! Real-time channel integration tests
//!
//! Runs the full server on a loopback port with the in-memory store and
//! talks to it over a real WebSocket.

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use civic_pulse::auth::{JwtValidator, Role};
use civic_pulse::db::schemas::NewIssue;
use civic_pulse::server::{self, AppState};
use civic_pulse::store::MemoryStore;
use civic_pulse::Args;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (Arc<AppState>, u16) {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let listen = format!("127.0.0.1:{port}");
    let args = Args::parse_from(["civic-pulse", "--dev-mode", "--listen", listen.as_str()]);

    let state = Arc::new(AppState::new(args, Arc::new(MemoryStore::new())).unwrap());
    tokio::spawn(server::run(Arc::clone(&state)));
    (state, port)
}

async fn connect(port: u16, token: Option<&str>) -> Client {
    let url = match token {
        Some(token) => format!("ws://127.0.0.1:{port}/ws?token={token}"),
        None => format!("ws://127.0.0.1:{port}/ws"),
    };
    for _ in 0..50 {
        if let Ok((ws, _)) = connect_async(url.as_str()).await {
            return ws;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not accept a WebSocket on port {port}");
}

async fn send(ws: &mut Client, msg: serde_json::Value) {
    ws.send(Message::Text(msg.to_string())).await.unwrap();
}

async fn next_json(ws: &mut Client) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Ping and wait for the reply so earlier client messages are applied
async fn sync(ws: &mut Client) {
    send(ws, serde_json::json!({ "type": "ping" })).await;
    loop {
        let msg = next_json(ws).await;
        if msg["status"] == "ok" {
            return;
        }
    }
}

fn report(created_by: &str) -> NewIssue {
    NewIssue {
        title: "Streetlight out".into(),
        description: String::new(),
        category: Some("lighting".into()),
        longitude: 13.405,
        latitude: 52.52,
        address: None,
        city: Some("Berlin".into()),
        ward: Some("Mitte".into()),
        created_by: created_by.into(),
    }
}

// =============================================================================
// Rooms
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_anonymous_client_follows_an_issue_in_order() {
    let (state, port) = start_server().await;
    let issue = state.engine.create_issue(report("reporter")).await.unwrap();

    let mut ws = connect(port, None).await;
    send(&mut ws, serde_json::json!({ "type": "join_issue", "issueId": issue.id })).await;
    sync(&mut ws).await;

    for (i, rating) in [3, 4, 3, 5, 4].into_iter().enumerate() {
        state
            .engine
            .add_verification(&issue.id, &format!("rater-{i}"), rating, None)
            .await
            .unwrap();
    }

    let mut counts = Vec::new();
    let mut status_updates = Vec::new();
    while counts.len() < 5 || status_updates.is_empty() {
        let msg = next_json(&mut ws).await;
        assert_eq!(msg["issueId"], issue.id.as_str());
        match msg["event"].as_str().unwrap() {
            "issueVerified" => counts.push(msg["data"]["verificationCount"].as_u64().unwrap()),
            "issueStatusUpdate" => status_updates.push(msg["data"]["status"].clone()),
            "severityUpdate" => {}
            other => panic!("unexpected event {other}"),
        }
    }

    assert_eq!(counts, vec![1, 2, 3, 4, 5]);
    assert_eq!(status_updates, vec![serde_json::json!("verified")]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_area_room_sees_status_changes() {
    let (state, port) = start_server().await;
    let issue = state.engine.create_issue(report("reporter")).await.unwrap();

    let mut ws = connect(port, None).await;
    send(&mut ws, serde_json::json!({ "type": "join_area", "area": "Mitte" })).await;
    sync(&mut ws).await;

    state
        .engine
        .set_status(&issue.id, "resolved", "official")
        .await
        .unwrap();

    let msg = next_json(&mut ws).await;
    assert_eq!(msg["event"], "issueStatusUpdate");
    assert_eq!(msg["data"]["status"], "resolved");
    assert_eq!(msg["data"]["previousStatus"], "pending");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_everyone_sees_new_issues() {
    let (state, port) = start_server().await;
    let mut ws = connect(port, None).await;
    sync(&mut ws).await;

    let issue = state.engine.create_issue(report("reporter")).await.unwrap();

    let msg = next_json(&mut ws).await;
    assert_eq!(msg["event"], "issueCreated");
    assert_eq!(msg["data"]["id"], issue.id.as_str());
    assert_eq!(msg["data"]["status"], "pending");
    assert!(msg["ts"].as_i64().unwrap() > 0);
}

// =============================================================================
// Identity
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_identified_client_gets_owner_notifications() {
    let (state, port) = start_server().await;
    let token = JwtValidator::new_dev()
        .generate_token("reporter", Role::Citizen)
        .unwrap();
    let issue = state.engine.create_issue(report("reporter")).await.unwrap();

    let mut ws = connect(port, Some(&token)).await;
    sync(&mut ws).await;

    state.engine.toggle_like(&issue.id, "neighbour").await.unwrap();

    let msg = next_json(&mut ws).await;
    assert_eq!(msg["event"], "notification");
    assert_eq!(msg["data"]["type"], "liked");
    assert_eq!(msg["data"]["recipient"], "reporter");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_invalid_token_is_anonymous_not_rejected() {
    let (state, port) = start_server().await;
    let issue = state.engine.create_issue(report("reporter")).await.unwrap();

    let mut ws = connect(port, Some("not-a-jwt")).await;
    sync(&mut ws).await;

    // Not in the reporter's personal room, so the like notice never arrives
    state.engine.toggle_like(&issue.id, "neighbour").await.unwrap();
    sync(&mut ws).await;
    assert_eq!(state.hub.connection_count(), 1);

    send(&mut ws, serde_json::json!({ "type": "join_issue", "issueId": issue.id })).await;
    sync(&mut ws).await;
    state.engine.toggle_like(&issue.id, "neighbour").await.unwrap();

    let msg = next_json(&mut ws).await;
    assert_eq!(msg["event"], "issueLiked");
    assert_eq!(msg["data"]["liked"], false);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disconnect_releases_membership() {
    let (state, port) = start_server().await;
    let mut ws = connect(port, None).await;
    send(&mut ws, serde_json::json!({ "type": "join_issue", "issueId": "some-issue" })).await;
    sync(&mut ws).await;
    assert_eq!(state.hub.room_count(), 1);

    ws.close(None).await.unwrap();
    for _ in 0..50 {
        if state.hub.connection_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.hub.connection_count(), 0);
    assert_eq!(state.hub.room_count(), 0);
}
