#![allow(dead_code)] // each test binary uses a different slice of these helpers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use fika_api::auth::JwtVerifier;
use fika_api::config::Config;
use fika_api::models::room::{Room, RoomKind};
use fika_api::store::chat::MemoryChatStore;
use fika_api::store::objects::MemoryObjectStore;
use fika_api::AppState;

pub const TEST_SECRET: &str = "fika-test-secret";

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub store: Arc<MemoryChatStore>,
    pub objects: Arc<MemoryObjectStore>,
}

/// Start a real server on an ephemeral port, backed by memory stores.
/// The store and object handles stay inspectable from the test.
pub async fn start_server() -> TestServer {
    let config = Config {
        port: 0,
        auth_secret: TEST_SECRET.to_string(),
        storage_url: None,
        worker_id: 0,
    };
    let store = Arc::new(MemoryChatStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let verifier = Arc::new(JwtVerifier::new(TEST_SECRET));
    let state = AppState::new(config, verifier, store.clone(), objects.clone());

    let app = fika_api::routes::router().with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    TestServer {
        addr,
        state,
        store,
        objects,
    }
}

#[derive(Serialize)]
struct TestTokenClaims<'a> {
    sub: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar_url: Option<&'a str>,
    exp: i64,
}

/// Mint an HS256 token the server's verifier accepts.
pub fn mint_token(user_id: &str, name: &str) -> String {
    let claims = TestTokenClaims {
        sub: user_id,
        name,
        avatar_url: None,
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint token")
}

/// Connect to the gateway, identify, and return the socket plus the READY
/// payload.
pub async fn connect_and_identify(
    addr: SocketAddr,
    user_id: &str,
    name: &str,
) -> (WsClient, Value) {
    let url = format!("ws://{addr}/gateway");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let identify = serde_json::json!({
        "op": 2,
        "d": { "token": mint_token(user_id, name) }
    });
    ws.send(tungstenite::Message::Text(identify.to_string().into()))
        .await
        .expect("send identify");

    let ready = next_event(&mut ws, "READY").await;
    (ws, ready)
}

/// Send one client dispatch (op=0).
pub async fn send_event(ws: &mut WsClient, event: &str, data: Value) {
    let frame = serde_json::json!({ "op": 0, "t": event, "d": data });
    ws.send(tungstenite::Message::Text(frame.to_string().into()))
        .await
        .expect("send event");
}

/// Read the next frame as JSON, whatever its opcode.
pub async fn next_frame(ws: &mut WsClient) -> Value {
    let msg = time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("ws read error");
    match msg {
        tungstenite::Message::Text(text) => serde_json::from_str(&text).expect("parse frame"),
        other => panic!("expected a text frame, got: {other:?}"),
    }
}

/// Read frames until a dispatch named `event` arrives. Unrelated
/// dispatches are skipped, so tests don't depend on incidental traffic.
pub async fn next_event(ws: &mut WsClient, event: &str) -> Value {
    let result = time::timeout(Duration::from_secs(2), async {
        loop {
            let msg = ws
                .next()
                .await
                .expect("stream ended")
                .expect("ws read error");
            let text = match msg {
                tungstenite::Message::Text(text) => text,
                tungstenite::Message::Close(frame) => {
                    panic!("socket closed while waiting for {event}: {frame:?}")
                }
                _ => continue,
            };
            let frame: Value = serde_json::from_str(&text).expect("parse frame");
            if frame["op"] == 0 && frame["t"] == event {
                return frame["d"].clone();
            }
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("no {event} dispatch within 2s"))
}

/// Asserts no dispatch named `event` arrives within `window`.
pub async fn assert_no_event(ws: &mut WsClient, event: &str, window: Duration) {
    // Timing out is the success path.
    let _ = time::timeout(window, async {
        loop {
            let Some(Ok(msg)) = ws.next().await else { return };
            let tungstenite::Message::Text(text) = msg else {
                continue;
            };
            let frame: Value = serde_json::from_str(&text).expect("parse frame");
            if frame["op"] == 0 && frame["t"] == event {
                panic!("unexpected {event} dispatch: {}", frame["d"]);
            }
        }
    })
    .await;
}

/// Read until the close frame arrives and assert its code. Dispatches
/// queued ahead of the close are skipped.
pub async fn expect_close(ws: &mut WsClient, code: u16) {
    let result = time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(tungstenite::Message::Close(Some(frame)))) => {
                    assert_eq!(
                        frame.code,
                        tungstenite::protocol::frame::coding::CloseCode::from(code)
                    );
                    return;
                }
                Some(Ok(tungstenite::Message::Close(None))) => {
                    panic!("close frame carried no code, expected {code}")
                }
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => return, // server already tore the socket down
            }
        }
    })
    .await;
    result.unwrap_or_else(|_| panic!("no close frame within 2s"))
}

/// Seed a direct chat between `users`.
pub fn seed_chat(server: &TestServer, room_id: &str, users: &[&str]) {
    server
        .store
        .insert_room(Room::new(room_id, RoomKind::Chat, users));
}

/// Seed a community room whose member list is `users`.
pub fn seed_community(server: &TestServer, room_id: &str, users: &[&str]) {
    server
        .store
        .insert_room(Room::new(room_id, RoomKind::Community, users));
}
