//! Integration tests for the WebSocket endpoint and the message REST routes:
//! auth, presence, delivery tracking, reactions, typing and call signaling.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = futures_util::stream::SplitSink<WsStream, Message>;
type WsRead = futures_util::stream::SplitStream<WsStream>;

struct TestServer {
    base_url: String,
    addr: SocketAddr,
    jwt_secret: Vec<u8>,
}

impl TestServer {
    fn token(&self, user_id: &str) -> String {
        pulse_server::auth::jwt::issue_access_token(&self.jwt_secret, user_id)
            .expect("Failed to issue token")
    }
}

/// Helper: start the server on a random port.
async fn start_test_server(call_timeout: Duration) -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = pulse_server::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret = pulse_server::auth::jwt::load_or_generate_jwt_secret(&data_dir)
        .expect("Failed to generate JWT secret");

    let state = pulse_server::state::AppState::new(
        pulse_server::db::SqliteStore::shared(db),
        jwt_secret.clone(),
        call_timeout,
    );

    let app = pulse_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        base_url: format!("http://{}", addr),
        addr,
        jwt_secret,
    }
}

async fn open_socket(addr: SocketAddr, token: &str) -> (WsWrite, WsRead) {
    let url = format!("ws://{}/ws?token={}", addr, token);
    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect WebSocket");
    stream.split()
}

/// Next JSON event, skipping control frames. Panics after two seconds.
async fn next_event(read: &mut WsRead) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for event")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("Invalid JSON frame");
        }
    }
}

/// Next event called `name`, skipping presence traffic.
async fn expect_event(read: &mut WsRead, name: &str) -> Value {
    loop {
        let event = next_event(read).await;
        match event["event"].as_str() {
            Some(n) if n == name => return event["data"].clone(),
            Some("onlineUsers") | Some("lastSeenUpdate") => continue,
            other => panic!("Expected {}, got {:?}: {}", name, other, event),
        }
    }
}

/// Assert nothing but presence traffic arrives within `wait`.
async fn expect_quiet(read: &mut WsRead, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, read.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let event: Value = serde_json::from_str(text.as_str()).unwrap();
                let name = event["event"].as_str().unwrap_or_default();
                assert!(
                    name == "onlineUsers" || name == "lastSeenUpdate",
                    "Unexpected event {}",
                    event
                );
            }
            Ok(Some(Ok(_))) => continue,
            Ok(other) => panic!("Connection ended: {:?}", other),
        }
    }
}

/// Connect and wait until the server has registered the session, which it
/// signals by sending this connection an online set that includes the user.
async fn connect_user(server: &TestServer, user_id: &str) -> (WsWrite, WsRead) {
    let (write, mut read) = open_socket(server.addr, &server.token(user_id)).await;
    loop {
        let event = next_event(&mut read).await;
        if event["event"] == "onlineUsers"
            && event["data"]
                .as_array()
                .is_some_and(|users| users.iter().any(|u| u == user_id))
        {
            break;
        }
    }
    (write, read)
}

async fn send_event(write: &mut WsWrite, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    write
        .send(Message::Text(frame.into()))
        .await
        .expect("Failed to send frame");
}

async fn fetch_conversation(server: &TestServer, user_id: &str, other_id: &str) -> Vec<Value> {
    let body: Value = reqwest::Client::new()
        .get(format!(
            "{}/api/messages/conversation/{}",
            server.base_url, other_id
        ))
        .bearer_auth(server.token(user_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["messages"].as_array().cloned().unwrap_or_default()
}

async fn expect_close_code(read: &mut WsRead) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for close")
            .expect("Stream ended without close frame")
            .expect("WebSocket error");
        if let Message::Close(Some(frame)) = msg {
            return u16::from(frame.code);
        }
    }
}

#[tokio::test]
async fn test_ws_rejects_invalid_token() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (_write, mut read) = open_socket(server.addr, "not-a-jwt").await;
    assert_eq!(expect_close_code(&mut read).await, 4002);
}

#[tokio::test]
async fn test_ws_rejects_expired_token() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let token =
        pulse_server::auth::jwt::issue_token_with_ttl(&server.jwt_secret, "alice", -120).unwrap();
    let (_write, mut read) = open_socket(server.addr, &token).await;
    assert_eq!(expect_close_code(&mut read).await, 4001);
}

#[tokio::test]
async fn test_online_delivery_and_seen_ack() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (mut alice_w, mut alice_r) = connect_user(&server, "alice").await;
    let (mut bob_w, mut bob_r) = connect_user(&server, "bob").await;

    send_event(
        &mut alice_w,
        "sendMessage",
        json!({"senderID": "alice", "receiverID": "bob", "content": "hi", "messageType": "text"}),
    )
    .await;

    let received = expect_event(&mut bob_r, "receiveMessage").await;
    assert_eq!(received["content"], "hi");
    assert_eq!(received["senderID"], "alice");
    assert_eq!(received["delivered"], true);
    assert_eq!(received["seen"], false);
    let message_id = received["id"].as_str().unwrap().to_string();

    let delivered = expect_event(&mut alice_r, "messageDelivered").await;
    assert_eq!(delivered["messageID"], message_id.as_str());

    send_event(
        &mut bob_w,
        "messageSeen",
        json!({"messageID": message_id, "receiverID": "bob"}),
    )
    .await;
    let seen = expect_event(&mut alice_r, "messageSeen").await;
    assert_eq!(seen["messageID"], message_id.as_str());

    let history = fetch_conversation(&server, "alice", "bob").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["delivered"], true);
    assert_eq!(history[0]["seen"], true);
}

#[tokio::test]
async fn test_offline_message_stays_undelivered_until_acked() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (mut alice_w, mut alice_r) = connect_user(&server, "alice").await;

    send_event(
        &mut alice_w,
        "sendMessage",
        json!({"senderID": "alice", "receiverID": "bob", "content": "later"}),
    )
    .await;
    expect_quiet(&mut alice_r, Duration::from_millis(300)).await;

    let (mut bob_w, mut bob_r) = connect_user(&server, "bob").await;
    let history = fetch_conversation(&server, "bob", "alice").await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["delivered"], false);
    assert_eq!(history[0]["seen"], false);
    expect_quiet(&mut bob_r, Duration::from_millis(300)).await;

    let message_id = history[0]["id"].as_str().unwrap().to_string();
    send_event(&mut bob_w, "messageSeen", json!({"messageID": message_id})).await;
    expect_event(&mut alice_r, "messageSeen").await;

    let history = fetch_conversation(&server, "bob", "alice").await;
    assert_eq!(history[0]["delivered"], true);
    assert_eq!(history[0]["seen"], true);

    let last: Value = reqwest::Client::new()
        .get(format!("{}/api/messages/last/alice", server.base_url))
        .bearer_auth(server.token("bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(last["lastMessage"]["id"], message_id.as_str());
}

#[tokio::test]
async fn test_reaction_is_pushed_to_both_sides() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (mut alice_w, mut alice_r) = connect_user(&server, "alice").await;
    let (mut bob_w, mut bob_r) = connect_user(&server, "bob").await;

    send_event(
        &mut alice_w,
        "sendMessage",
        json!({"senderID": "alice", "receiverID": "bob", "content": "lol"}),
    )
    .await;
    let message_id = expect_event(&mut bob_r, "receiveMessage").await["id"]
        .as_str()
        .unwrap()
        .to_string();
    expect_event(&mut alice_r, "messageDelivered").await;

    for emoji in ["👍", "😂"] {
        send_event(
            &mut bob_w,
            "reactToMessage",
            json!({"messageID": message_id, "userID": "bob", "emoji": emoji}),
        )
        .await;
    }

    expect_event(&mut alice_r, "messageReactionUpdated").await;
    let latest = expect_event(&mut alice_r, "messageReactionUpdated").await;
    assert_eq!(latest["reactions"], json!([{"userID": "bob", "emoji": "😂"}]));

    expect_event(&mut bob_r, "messageReactionUpdated").await;
    let latest = expect_event(&mut bob_r, "messageReactionUpdated").await;
    assert_eq!(latest["reactions"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_rest_send_is_pushed_to_online_receiver() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (_alice_w, mut alice_r) = connect_user(&server, "alice").await;
    let (_bob_w, mut bob_r) = connect_user(&server, "bob").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/messages", server.base_url))
        .bearer_auth(server.token("alice"))
        .json(&json!({
            "receiverID": "bob",
            "media": "https://cdn.example/cat.png",
            "messageType": "image"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let sent: Value = resp.json().await.unwrap();
    assert_eq!(sent["senderID"], "alice");
    assert_eq!(sent["delivered"], true);

    let received = expect_event(&mut bob_r, "receiveMessage").await;
    assert_eq!(received["id"], sent["id"]);
    expect_event(&mut alice_r, "messageDelivered").await;

    // Neither content nor media
    let resp = client
        .post(format!("{}/api/messages", server.base_url))
        .bearer_auth(server.token("alice"))
        .json(&json!({"receiverID": "bob"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Spoofed sender
    let resp = client
        .post(format!("{}/api/messages", server.base_url))
        .bearer_auth(server.token("mallory"))
        .json(&json!({"senderID": "alice", "receiverID": "bob", "content": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_delete_message_lifecycle() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let client = reqwest::Client::new();

    let sent: Value = client
        .post(format!("{}/api/messages", server.base_url))
        .bearer_auth(server.token("alice"))
        .json(&json!({"receiverID": "bob", "content": "oops"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let url = format!(
        "{}/api/messages/{}",
        server.base_url,
        sent["id"].as_str().unwrap()
    );

    let resp = client
        .delete(&url)
        .bearer_auth(server.token("carol"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .delete(&url)
        .bearer_auth(server.token("bob"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(fetch_conversation(&server, "alice", "bob").await.is_empty());

    let resp = client
        .delete(&url)
        .bearer_auth(server.token("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_typing_is_forwarded() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (mut alice_w, _alice_r) = connect_user(&server, "alice").await;
    let (_bob_w, mut bob_r) = connect_user(&server, "bob").await;

    let pair = json!({"fromUserID": "alice", "toUserID": "bob"});
    send_event(&mut alice_w, "typing", pair.clone()).await;
    send_event(&mut alice_w, "stopTyping", pair).await;

    assert_eq!(
        expect_event(&mut bob_r, "typingStatus").await,
        json!({"fromUserID": "alice", "isTyping": true})
    );
    assert_eq!(
        expect_event(&mut bob_r, "typingStatus").await,
        json!({"fromUserID": "alice", "isTyping": false})
    );
}

#[tokio::test]
async fn test_disconnect_broadcasts_presence_and_last_seen() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (_alice_w, mut alice_r) = connect_user(&server, "alice").await;
    let (mut bob_w, _bob_r) = connect_user(&server, "bob").await;

    bob_w.send(Message::Close(None)).await.unwrap();

    loop {
        let event = next_event(&mut alice_r).await;
        if event["event"] == "onlineUsers" && event["data"] == json!(["alice"]) {
            break;
        }
    }
    let last_seen = expect_event(&mut alice_r, "lastSeenUpdate").await;
    assert_eq!(last_seen["userID"], "bob");
    assert!(last_seen["lastSeenAt"].is_string());
}

#[tokio::test]
async fn test_second_connection_supersedes_first() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (_first_w, mut first_r) = connect_user(&server, "alice").await;
    let (_second_w, _second_r) = connect_user(&server, "alice").await;

    assert_eq!(expect_close_code(&mut first_r).await, 4000);

    // The old connection going away must not take the new session with it
    tokio::time::sleep(Duration::from_millis(200)).await;
    let online: Vec<String> = reqwest::Client::new()
        .get(format!("{}/api/presence", server.base_url))
        .bearer_auth(server.token("bob"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(online, vec!["alice".to_string()]);
}

#[tokio::test]
async fn test_malformed_frame_gets_error_event() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (mut alice_w, mut alice_r) = connect_user(&server, "alice").await;

    alice_w
        .send(Message::Text("definitely not json".into()))
        .await
        .unwrap();
    let error = expect_event(&mut alice_r, "error").await;
    assert_eq!(error["code"], 400);

    // Connection stays usable
    send_event(
        &mut alice_w,
        "messageSeen",
        json!({"messageID": "missing"}),
    )
    .await;
    let error = expect_event(&mut alice_r, "error").await;
    assert_eq!(error["event"], "messageSeen");
    assert_eq!(error["code"], 404);
}

#[tokio::test]
async fn test_call_to_offline_user_fails() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (mut alice_w, mut alice_r) = connect_user(&server, "alice").await;

    send_event(
        &mut alice_w,
        "callInvite",
        json!({"callerID": "alice", "calleeID": "bob", "callKind": "voice"}),
    )
    .await;
    assert_eq!(
        expect_event(&mut alice_r, "callFailed").await,
        json!({"calleeID": "bob", "reason": "offline"})
    );
}

#[tokio::test]
async fn test_call_invite_and_accept() {
    let server = start_test_server(Duration::from_secs(30)).await;
    let (mut alice_w, mut alice_r) = connect_user(&server, "alice").await;
    let (mut bob_w, mut bob_r) = connect_user(&server, "bob").await;

    send_event(
        &mut alice_w,
        "callInvite",
        json!({"callerID": "alice", "calleeID": "bob", "callKind": "video"}),
    )
    .await;
    let incoming = expect_event(&mut bob_r, "incomingCall").await;
    assert_eq!(incoming["callerID"], "alice");
    assert_eq!(incoming["callKind"], "video");
    assert_eq!(incoming["roomID"], "alice_bob");

    send_event(
        &mut bob_w,
        "callAccept",
        json!({"callerID": "alice", "calleeID": "bob"}),
    )
    .await;
    assert_eq!(
        expect_event(&mut alice_r, "callAccepted").await,
        json!({"calleeID": "bob", "callKind": "video", "roomID": "alice_bob"})
    );
}

#[tokio::test]
async fn test_unanswered_call_times_out_once() {
    let server = start_test_server(Duration::from_millis(300)).await;
    let (mut alice_w, mut alice_r) = connect_user(&server, "alice").await;
    let (mut bob_w, mut bob_r) = connect_user(&server, "bob").await;

    send_event(
        &mut alice_w,
        "callInvite",
        json!({"callerID": "alice", "calleeID": "bob", "callKind": "voice"}),
    )
    .await;
    expect_event(&mut bob_r, "incomingCall").await;

    assert_eq!(
        expect_event(&mut alice_r, "callRejected").await,
        json!({"calleeID": "bob", "reason": "timeout"})
    );

    // Late accept reaches nobody but the callee's own error
    send_event(
        &mut bob_w,
        "callAccept",
        json!({"callerID": "alice", "calleeID": "bob"}),
    )
    .await;
    assert_eq!(expect_event(&mut bob_r, "error").await["code"], 404);
    expect_quiet(&mut alice_r, Duration::from_millis(500)).await;
}
