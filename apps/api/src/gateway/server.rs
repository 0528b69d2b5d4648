//! WebSocket upgrade handler and per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time;

use fika_common::id::{prefix, prefixed_ulid};

use crate::auth::Identity;
use crate::error::EventError;
use crate::AppState;

use super::calls::SignalTarget;
use super::events::{
    CallIdPayload, CallSignalPayload, CallStartPayload, ClientEvent, ClientMessage,
    DeleteChatPayload, EventName, GatewayMessage, HeartbeatPayload, IdentifyPayload,
    JoinRoomPayload, MarkAsReadPayload, SendMessagePayload, TypingPayload, UploadFilePayload,
    OP_DISPATCH, OP_HEARTBEAT, OP_IDENTIFY,
};
use super::registry::{ConnectionHandle, OutboundReceiver};
use super::rooms::RoomId;
use super::transfer::TransferAssembler;

/// Close codes (4000-range for application-level).
const CLOSE_UNKNOWN_ERROR: u16 = 4000;
const CLOSE_UNKNOWN_OPCODE: u16 = 4001;
const CLOSE_NOT_AUTHENTICATED: u16 = 4003;
const CLOSE_AUTH_FAILED: u16 = 4004;
const CLOSE_SESSION_TIMEOUT: u16 = 4009;

/// Timeout for receiving IDENTIFY after connection (seconds).
const IDENTIFY_TIMEOUT_SECS: u64 = 10;

/// Advertised in READY; clients must heartbeat at this cadence.
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Step 1: IDENTIFY within the handshake window.
    let identity = match await_identify(&state, &mut ws_tx, &mut ws_rx).await {
        Some(identity) => identity,
        None => return,
    };

    // Step 2: admit the connection and auto-join its per-user room.
    let connection_id = prefixed_ulid(prefix::CONNECTION);
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle::new(
        connection_id,
        identity.user_id,
        identity.claims,
        out_tx,
    );
    let first_for_user = state.registry.admit(handle.clone());
    state.rooms.join(&handle, RoomId::User(handle.user_id.clone()));

    // READY is always the first dispatch; queued events continue from seq 2.
    let ready = GatewayMessage::dispatch(
        EventName::READY,
        1,
        json!({
            "connection_id": &handle.connection_id,
            "user": {
                "id": &handle.user_id,
                "name": &handle.claims.name,
                "avatar_url": &handle.claims.avatar_url,
            },
            "online": state.registry.online_users(),
            "heartbeat_interval": HEARTBEAT_INTERVAL_MS,
        }),
    );
    let ready_json = serde_json::to_string(&ready).unwrap_or_default();
    if ws_tx.send(Message::Text(ready_json.into())).await.is_err() {
        cleanup(&state, &handle).await;
        return;
    }
    state.presence.connection_admitted(&handle.user_id, first_for_user);

    tracing::info!(
        connection_id = %handle.connection_id,
        user_id = %handle.user_id,
        "gateway session established"
    );

    run_session(&state, &handle, ws_tx, ws_rx, out_rx).await;

    cleanup(&state, &handle).await;
    tracing::info!(
        connection_id = %handle.connection_id,
        user_id = %handle.user_id,
        "gateway session closed"
    );
}

/// Waits for a valid IDENTIFY and verifies its token. Any other first
/// frame, a bad token, or silence closes the socket with the matching
/// 4000-range code.
async fn await_identify(
    state: &AppState,
    ws_tx: &mut SplitSink<WebSocket, Message>,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Option<Identity> {
    let handshake = time::timeout(Duration::from_secs(IDENTIFY_TIMEOUT_SECS), async {
        while let Some(msg) = ws_rx.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    tracing::debug!(?e, "ws read error during identify");
                    return Err(None);
                }
            };

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => return Err(None),
                _ => continue,
            };

            let client_msg: ClientMessage = match serde_json::from_str(&text) {
                Ok(m) => m,
                Err(_) => return Err(Some((CLOSE_UNKNOWN_ERROR, "Invalid JSON"))),
            };
            if client_msg.op != OP_IDENTIFY {
                return Err(Some((CLOSE_NOT_AUTHENTICATED, "Expected IDENTIFY")));
            }
            let payload: IdentifyPayload = match serde_json::from_value(client_msg.d) {
                Ok(p) => p,
                Err(_) => return Err(Some((CLOSE_UNKNOWN_ERROR, "Invalid identify payload"))),
            };

            return match state.verifier.verify(&payload.token).await {
                Ok(identity) => Ok(identity),
                Err(err) => {
                    tracing::debug!(%err, "identify rejected");
                    Err(Some((CLOSE_AUTH_FAILED, "Authentication failed")))
                }
            };
        }
        // Socket closed before any identify arrived.
        Err(None)
    })
    .await;

    match handshake {
        Ok(Ok(identity)) => Some(identity),
        Ok(Err(Some((code, reason)))) => {
            let _ = send_close(ws_tx, code, reason).await;
            None
        }
        Ok(Err(None)) => None,
        Err(_elapsed) => {
            let _ = send_close(ws_tx, CLOSE_SESSION_TIMEOUT, "Handshake timeout").await;
            None
        }
    }
}

/// Main session loop: client frames, the outbound queue, and the heartbeat
/// deadline, multiplexed on one task. Chunked uploads assemble in a local
/// buffer, so a disconnect drops any partial file with the task.
async fn run_session(
    state: &AppState,
    handle: &ConnectionHandle,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut out_rx: OutboundReceiver,
) {
    let mut seq: u64 = 1;
    let mut assembler = TransferAssembler::new();

    // Client must heartbeat within 1.5x the advertised interval.
    let heartbeat_deadline = Duration::from_millis(HEARTBEAT_INTERVAL_MS * 3 / 2);
    let mut heartbeat_timer = time::interval(heartbeat_deadline);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut got_heartbeat = true;

    loop {
        tokio::select! {
            // Client sends us a frame.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                handle.send(
                                    EventName::ERROR,
                                    EventError::invalid_argument("malformed frame").to_event_data(),
                                );
                                continue;
                            }
                        };

                        match client_msg.op {
                            OP_HEARTBEAT => {
                                got_heartbeat = true;
                                let payload: HeartbeatPayload = serde_json::from_value(client_msg.d)
                                    .unwrap_or(HeartbeatPayload { seq: 0 });
                                let ack = GatewayMessage::heartbeat_ack(payload.seq);
                                let json = serde_json::to_string(&ack).unwrap_or_default();
                                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                    break;
                                }
                            }
                            OP_DISPATCH => {
                                let Some(event) = client_msg.t.as_deref() else {
                                    handle.send(
                                        EventName::ERROR,
                                        EventError::invalid_argument("dispatch without event name")
                                            .to_event_data(),
                                    );
                                    continue;
                                };
                                if event == ClientEvent::LOGOUT {
                                    let _ = send_close(&mut ws_tx, 1000, "Logged out").await;
                                    break;
                                }
                                if let Err(err) =
                                    dispatch_event(state, handle, &mut assembler, event, client_msg.d).await
                                {
                                    tracing::debug!(
                                        connection_id = %handle.connection_id,
                                        %event,
                                        code = err.code(),
                                        "client event rejected"
                                    );
                                    handle.send(EventName::ERROR, err.to_event_data());
                                }
                            }
                            OP_IDENTIFY => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_ERROR, "Already identified").await;
                                break;
                            }
                            _ => {
                                let _ = send_close(&mut ws_tx, CLOSE_UNKNOWN_OPCODE, "Unknown opcode").await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, connection_id = %handle.connection_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Queued outbound dispatch for this connection.
            event = out_rx.recv() => {
                let Some(event) = event else { break };
                seq += 1;
                let msg = GatewayMessage::dispatch(event.name, seq, event.data);
                let json = serde_json::to_string(&msg).unwrap_or_default();
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }

            // Heartbeat timeout check.
            _ = heartbeat_timer.tick() => {
                if !got_heartbeat {
                    tracing::debug!(connection_id = %handle.connection_id, "heartbeat timeout, closing");
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                got_heartbeat = false;
            }
        }
    }
}

/// Routes one client dispatch to its operation. Errors surface to the
/// client as an ERROR dispatch and never tear down the session.
async fn dispatch_event(
    state: &AppState,
    handle: &ConnectionHandle,
    assembler: &mut TransferAssembler,
    event: &str,
    data: Value,
) -> Result<(), EventError> {
    match event {
        ClientEvent::JOIN_CHAT => {
            let payload: JoinRoomPayload = decode(data)?;
            state.rooms.join(handle, RoomId::Chat(payload.room_id));
        }
        ClientEvent::JOIN_COMMUNITY_ROOM => {
            let payload: JoinRoomPayload = decode(data)?;
            state.rooms.join(handle, RoomId::Community(payload.room_id));
        }
        ClientEvent::LEAVE_CHAT => {
            let payload: JoinRoomPayload = decode(data)?;
            state
                .rooms
                .leave(&handle.connection_id, &RoomId::Chat(payload.room_id));
        }
        ClientEvent::LEAVE_COMMUNITY_ROOM => {
            let payload: JoinRoomPayload = decode(data)?;
            state
                .rooms
                .leave(&handle.connection_id, &RoomId::Community(payload.room_id));
        }
        ClientEvent::SEND_MESSAGE => {
            let payload: SendMessagePayload = decode(data)?;
            state
                .fanout
                .send_message(handle, &payload.room_id, &payload.content)
                .await?;
        }
        ClientEvent::UPLOAD_FILE => {
            let payload: UploadFilePayload = decode(data)?;
            let completed = assembler.ingest(
                &payload.room_id,
                &payload.filename,
                &payload.mime_type,
                &payload.chunk,
                payload.is_last,
            )?;
            if let Some(transfer) = completed {
                state.fanout.send_attachment(handle, transfer).await?;
            }
        }
        ClientEvent::TYPING => {
            let payload: TypingPayload = decode(data)?;
            let room = RoomId::persisted(payload.room_kind, &payload.room_id);
            state.fanout.typing(handle, &room, payload.is_typing);
        }
        ClientEvent::MARK_AS_READ => {
            let payload: MarkAsReadPayload = decode(data)?;
            state
                .fanout
                .update_status(handle, payload.message_id, payload.status)
                .await?;
        }
        ClientEvent::DELETE_CHAT => {
            let payload: DeleteChatPayload = decode(data)?;
            state.fanout.delete_chat(handle, &payload.room_id).await?;
        }
        ClientEvent::CALL_START => {
            let payload: CallStartPayload = decode(data)?;
            let call = state
                .calls
                .initiate(handle, &payload.callee_id, payload.kind)
                .await?;
            handle.send(
                EventName::CALL_CREATED,
                serde_json::to_value(&call).unwrap_or_default(),
            );
        }
        ClientEvent::CALL_ACCEPT => {
            let payload: CallIdPayload = decode(data)?;
            let call = state.calls.accept(handle, &payload.call_id).await?;
            handle.send(
                EventName::CALL_ACCEPTED,
                serde_json::to_value(&call).unwrap_or_default(),
            );
        }
        ClientEvent::CALL_REJECT => {
            let payload: CallIdPayload = decode(data)?;
            let call = state.calls.reject(handle, &payload.call_id).await?;
            handle.send(
                EventName::CALL_REJECTED,
                serde_json::to_value(&call).unwrap_or_default(),
            );
        }
        ClientEvent::CALL_END => {
            let payload: CallIdPayload = decode(data)?;
            let call = state.calls.end(handle, &payload.call_id).await?;
            handle.send(
                EventName::CALL_ENDED,
                serde_json::to_value(&call).unwrap_or_default(),
            );
        }
        ClientEvent::CALL_SIGNAL => {
            let payload: CallSignalPayload = decode(data)?;
            let target = signal_target(&payload)?;
            if matches!(target, SignalTarget::CallPeer(_)) {
                // Signaling into a ringing call can park until the callee
                // answers; run it off the session loop so frames keep
                // flowing.
                let calls = state.calls.clone();
                let from = handle.clone();
                tokio::spawn(async move {
                    if let Err(err) = calls.relay_signal(&from, target, payload.payload).await {
                        from.send(EventName::ERROR, err.to_event_data());
                    }
                });
            } else {
                state
                    .calls
                    .relay_signal(handle, target, payload.payload)
                    .await?;
            }
        }
        _ => {
            return Err(EventError::invalid_argument(format!(
                "unknown event {event}"
            )));
        }
    }
    Ok(())
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, EventError> {
    serde_json::from_value(data).map_err(|err| EventError::invalid_argument(err.to_string()))
}

fn signal_target(payload: &CallSignalPayload) -> Result<SignalTarget, EventError> {
    match (&payload.call_id, &payload.to_user, &payload.to_connection) {
        (Some(call_id), None, None) => Ok(SignalTarget::CallPeer(call_id.clone())),
        (None, Some(user_id), None) => Ok(SignalTarget::User(user_id.clone())),
        (None, None, Some(connection_id)) => Ok(SignalTarget::Connection(connection_id.clone())),
        _ => Err(EventError::invalid_argument(
            "signal needs exactly one of call_id, to_user, to_connection",
        )),
    }
}

async fn cleanup(state: &AppState, handle: &ConnectionHandle) {
    state.rooms.leave_all(&handle.connection_id);
    if let Some(removal) = state.registry.remove(&handle.connection_id) {
        state
            .presence
            .connection_removed(&removal.user_id, removal.last_for_user)
            .await;
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(json: &str) -> CallSignalPayload {
        serde_json::from_str(json).expect("parse")
    }

    #[test]
    fn signal_target_requires_exactly_one_address() {
        assert!(matches!(
            signal_target(&payload(r#"{"call_id":"call_1","payload":{}}"#)),
            Ok(SignalTarget::CallPeer(_))
        ));
        assert!(matches!(
            signal_target(&payload(r#"{"to_user":"usr_1","payload":{}}"#)),
            Ok(SignalTarget::User(_))
        ));
        assert!(matches!(
            signal_target(&payload(r#"{"to_connection":"conn_1","payload":{}}"#)),
            Ok(SignalTarget::Connection(_))
        ));
        assert!(signal_target(&payload(r#"{"payload":{}}"#)).is_err());
        assert!(signal_target(&payload(
            r#"{"call_id":"call_1","to_user":"usr_1","payload":{}}"#
        ))
        .is_err());
    }
}
