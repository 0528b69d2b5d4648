mod common;

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time;
use tokio_tungstenite::tungstenite;

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn identify_returns_ready_with_online_list() {
    let server = common::start_server().await;

    let url = format!("ws://{}/gateway", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let identify = serde_json::json!({
        "op": 2,
        "d": { "token": common::mint_token("usr_alice", "Alice") }
    });
    ws.send(tungstenite::Message::Text(identify.to_string().into()))
        .await
        .expect("send identify");

    let ready = common::next_frame(&mut ws).await;
    assert_eq!(ready["op"], 0);
    assert_eq!(ready["t"], "READY");
    assert_eq!(ready["s"], 1);

    let d = &ready["d"];
    assert!(d["connection_id"].as_str().unwrap().starts_with("conn_"));
    assert_eq!(d["user"]["id"], "usr_alice");
    assert_eq!(d["user"]["name"], "Alice");
    assert_eq!(d["online"], serde_json::json!(["usr_alice"]));
    assert!(d["heartbeat_interval"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn invalid_token_closes_with_auth_failure() {
    let server = common::start_server().await;

    let url = format!("ws://{}/gateway", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let identify = serde_json::json!({ "op": 2, "d": { "token": "not-a-jwt" } });
    ws.send(tungstenite::Message::Text(identify.to_string().into()))
        .await
        .expect("send identify");

    common::expect_close(&mut ws, 4004).await;
}

#[tokio::test]
async fn first_frame_must_be_identify() {
    let server = common::start_server().await;

    let url = format!("ws://{}/gateway", server.addr);
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let heartbeat = serde_json::json!({ "op": 1, "d": { "seq": 0 } });
    ws.send(tungstenite::Message::Text(heartbeat.to_string().into()))
        .await
        .expect("send heartbeat");

    common::expect_close(&mut ws, 4003).await;
}

#[tokio::test]
async fn second_identify_closes_the_session() {
    let server = common::start_server().await;
    let (mut ws, _) = common::connect_and_identify(server.addr, "usr_alice", "Alice").await;

    let identify = serde_json::json!({
        "op": 2,
        "d": { "token": common::mint_token("usr_alice", "Alice") }
    });
    ws.send(tungstenite::Message::Text(identify.to_string().into()))
        .await
        .expect("send identify");

    common::expect_close(&mut ws, 4000).await;
}

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

#[tokio::test]
async fn heartbeat_is_acknowledged() {
    let server = common::start_server().await;
    let (mut ws, _) = common::connect_and_identify(server.addr, "usr_alice", "Alice").await;
    // Drain the admission broadcast so the ack is the next frame.
    common::next_event(&mut ws, "ONLINE_STATUS").await;

    let heartbeat = serde_json::json!({ "op": 1, "d": { "seq": 5 } });
    ws.send(tungstenite::Message::Text(heartbeat.to_string().into()))
        .await
        .expect("send heartbeat");

    let ack = common::next_frame(&mut ws).await;
    assert_eq!(ack["op"], 6);
    assert_eq!(ack["d"]["ack"], 5);
}

#[tokio::test]
async fn unknown_opcode_closes_the_session() {
    let server = common::start_server().await;
    let (mut ws, _) = common::connect_and_identify(server.addr, "usr_alice", "Alice").await;

    let unknown = serde_json::json!({ "op": 9, "d": {} });
    ws.send(tungstenite::Message::Text(unknown.to_string().into()))
        .await
        .expect("send unknown");

    common::expect_close(&mut ws, 4001).await;
}

#[tokio::test]
async fn malformed_frame_is_an_error_not_a_disconnect() {
    let server = common::start_server().await;
    let (mut ws, _) = common::connect_and_identify(server.addr, "usr_alice", "Alice").await;

    ws.send(tungstenite::Message::Text("{not json".into()))
        .await
        .expect("send garbage");

    let error = common::next_event(&mut ws, "ERROR").await;
    assert_eq!(error["error"]["code"], "INVALID_ARGUMENT");

    // The session is still alive.
    let heartbeat = serde_json::json!({ "op": 1, "d": { "seq": 1 } });
    ws.send(tungstenite::Message::Text(heartbeat.to_string().into()))
        .await
        .expect("send heartbeat");
    let ack = common::next_frame(&mut ws).await;
    assert_eq!(ack["op"], 6);
}

#[tokio::test]
async fn unknown_event_is_an_error() {
    let server = common::start_server().await;
    let (mut ws, _) = common::connect_and_identify(server.addr, "usr_alice", "Alice").await;

    common::send_event(&mut ws, "NO_SUCH_EVENT", serde_json::json!({})).await;

    let error = common::next_event(&mut ws, "ERROR").await;
    assert_eq!(error["error"]["code"], "INVALID_ARGUMENT");
    assert!(error["error"]["message"]
        .as_str()
        .unwrap()
        .contains("NO_SUCH_EVENT"));
}

#[tokio::test]
async fn logout_closes_cleanly() {
    let server = common::start_server().await;
    let (mut ws, _) = common::connect_and_identify(server.addr, "usr_alice", "Alice").await;

    common::send_event(&mut ws, "LOGOUT", serde_json::json!({})).await;
    common::expect_close(&mut ws, 1000).await;

    // Registry cleanup follows the close.
    time::sleep(Duration::from_millis(100)).await;
    assert!(!server.state.registry.is_online("usr_alice"));
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn presence_follows_connections() {
    let server = common::start_server().await;

    let (mut alice, ready) = common::connect_and_identify(server.addr, "usr_alice", "Alice").await;
    assert_eq!(ready["online"], serde_json::json!(["usr_alice"]));
    // Every admission broadcasts the full list, the new connection included.
    let status = common::next_event(&mut alice, "ONLINE_STATUS").await;
    assert_eq!(status["online"], serde_json::json!(["usr_alice"]));

    let (bob, bob_ready) = common::connect_and_identify(server.addr, "usr_bob", "Bob").await;
    assert_eq!(
        bob_ready["online"],
        serde_json::json!(["usr_alice", "usr_bob"])
    );

    // Alice sees bob arrive.
    let status = common::next_event(&mut alice, "ONLINE_STATUS").await;
    assert_eq!(status["online"], serde_json::json!(["usr_alice", "usr_bob"]));

    // And sees him leave.
    drop(bob);
    let status = common::next_event(&mut alice, "ONLINE_STATUS").await;
    assert_eq!(status["online"], serde_json::json!(["usr_alice"]));

    // Last disconnect records a last-active timestamp.
    time::sleep(Duration::from_millis(100)).await;
    assert!(server.store.last_active_of("usr_bob").is_some());
}

#[tokio::test]
async fn a_second_tab_keeps_the_user_online() {
    let server = common::start_server().await;

    // One broadcast per admission: alice's own, then one per bob tab.
    let (mut alice, _) = common::connect_and_identify(server.addr, "usr_alice", "Alice").await;
    common::next_event(&mut alice, "ONLINE_STATUS").await;
    let (bob_one, _) = common::connect_and_identify(server.addr, "usr_bob", "Bob").await;
    common::next_event(&mut alice, "ONLINE_STATUS").await;
    let (bob_two, _) = common::connect_and_identify(server.addr, "usr_bob", "Bob").await;
    common::next_event(&mut alice, "ONLINE_STATUS").await;

    // Closing one of bob's tabs rebroadcasts the list, with bob still in it.
    drop(bob_one);
    let status = common::next_event(&mut alice, "ONLINE_STATUS").await;
    assert_eq!(status["online"], serde_json::json!(["usr_alice", "usr_bob"]));

    drop(bob_two);
    let status = common::next_event(&mut alice, "ONLINE_STATUS").await;
    assert_eq!(status["online"], serde_json::json!(["usr_alice"]));
}
