//! WebRTC call lifecycle and signal relay.
//!
//! The gateway never parses SDP or ICE. It tracks call state in the store,
//! rings every callee connection, and forwards opaque signal payloads
//! between the two parties. Target connections are looked up fresh on
//! every event, so a party that reconnects mid-call keeps receiving.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::time::timeout;

use crate::error::EventError;
use crate::models::call::{Call, CallKind, CallStatus};
use crate::store::chat::ChatStore;

use super::events::EventName;
use super::registry::{ConnectionHandle, ConnectionRegistry};

/// A ringing call older than this is treated as abandoned when the same
/// pair dials again. There is no background reaper; staleness is settled
/// lazily at the next initiate.
pub const RINGING_STALE_AFTER: Duration = Duration::from_secs(60);

/// How long a caller-side signal waits for the callee to pick up before it
/// is quietly dropped.
pub const ANSWER_WAIT: Duration = Duration::from_secs(10);

/// Where a signal should go.
#[derive(Debug, Clone)]
pub enum SignalTarget {
    /// Every connection of a user.
    User(String),
    /// One specific connection.
    Connection(String),
    /// The other party of a call, resolved against its current state.
    CallPeer(String),
}

// ---------------------------------------------------------------------------
// Answer slot
// ---------------------------------------------------------------------------

// One per ringing call. Caller-side signals that arrive before the callee
// picks up subscribe here instead of polling the store; accept fulfills
// every waiter with the answering connection ID.
#[derive(Default)]
struct AnswerSlot {
    inner: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    answered_by: Option<String>,
    waiters: Vec<oneshot::Sender<String>>,
}

impl AnswerSlot {
    fn fulfill(&self, connection_id: &str) {
        let mut state = self.inner.lock();
        state.answered_by = Some(connection_id.to_string());
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(connection_id.to_string());
        }
    }

    fn subscribe(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.lock();
        match &state.answered_by {
            Some(answered_by) => {
                let _ = tx.send(answered_by.clone());
            }
            None => state.waiters.push(tx),
        }
        rx
    }
}

// ---------------------------------------------------------------------------
// Relay
// ---------------------------------------------------------------------------

pub struct CallRelay {
    store: Arc<dyn ChatStore>,
    registry: Arc<ConnectionRegistry>,
    answers: DashMap<String, Arc<AnswerSlot>>,
    answer_wait: Duration,
}

impl CallRelay {
    pub fn new(store: Arc<dyn ChatStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            store,
            registry,
            answers: DashMap::new(),
            answer_wait: ANSWER_WAIT,
        }
    }

    #[cfg(test)]
    fn with_answer_wait(mut self, wait: Duration) -> Self {
        self.answer_wait = wait;
        self
    }

    /// Starts a call. The returned record's status tells the caller what
    /// happened: `ringing` when the callee was reached, `missed` when they
    /// were offline, `failed` when the caller vanished first.
    pub async fn initiate(
        &self,
        caller: &ConnectionHandle,
        callee_id: &str,
        kind: CallKind,
    ) -> Result<Call, EventError> {
        if callee_id.is_empty() {
            return Err(EventError::invalid_argument("callee_id is required"));
        }
        if callee_id == caller.user_id {
            return Err(EventError::invalid_argument("cannot call yourself"));
        }

        if let Some(existing) = self
            .store
            .find_active_call_between(&caller.user_id, callee_id)
            .await?
        {
            match existing.status {
                CallStatus::Accepted => {
                    return Err(EventError::conflict(
                        "a call between these users is already active",
                    ));
                }
                CallStatus::Ringing => {
                    let age = Utc::now().signed_duration_since(existing.created_at);
                    let fresh = age
                        .to_std()
                        .map(|age| age < RINGING_STALE_AFTER)
                        .unwrap_or(true);
                    if fresh {
                        return Err(EventError::conflict(
                            "a call between these users is already ringing",
                        ));
                    }
                    // Abandoned ring. Settle it as missed and start over.
                    self.store
                        .update_call_status(&existing.id, CallStatus::Missed, None)
                        .await?;
                    self.answers.remove(&existing.id);
                }
                _ => {}
            }
        }

        let call = Call::ringing(
            &caller.user_id,
            &caller.claims,
            callee_id,
            kind,
            &caller.connection_id,
        );
        self.store.create_call(&call).await?;

        let targets = self.registry.connections_for(callee_id);
        if targets.is_empty() {
            tracing::debug!(call_id = %call.id, %callee_id, "callee offline, call missed");
            return self.settle(&call.id, CallStatus::Missed).await;
        }
        if self.registry.connection(&caller.connection_id).is_none() {
            tracing::debug!(call_id = %call.id, "caller gone before ring, call failed");
            return self.settle(&call.id, CallStatus::Failed).await;
        }

        self.answers
            .insert(call.id.clone(), Arc::new(AnswerSlot::default()));
        let data = serde_json::to_value(&call).unwrap_or_default();
        for target in &targets {
            target.send(EventName::INCOMING_CALL, data.clone());
        }
        tracing::info!(
            call_id = %call.id,
            caller_id = %caller.user_id,
            %callee_id,
            ringing = targets.len(),
            "call ringing"
        );
        Ok(call)
    }

    /// Callee picks up. Flips the call to accepted, remembers which callee
    /// connection answered, and notifies the caller's current connections.
    pub async fn accept(
        &self,
        conn: &ConnectionHandle,
        call_id: &str,
    ) -> Result<Call, EventError> {
        let call = self.require_call(call_id).await?;
        if conn.user_id != call.callee_id {
            return Err(EventError::forbidden("only the callee can accept a call"));
        }
        if call.status != CallStatus::Ringing {
            return Err(EventError::conflict("call is not ringing"));
        }
        let updated = self
            .store
            .update_call_status(call_id, CallStatus::Accepted, Some(&conn.connection_id))
            .await?
            .ok_or_else(|| EventError::not_found("call not found"))?;
        if let Some((_, slot)) = self.answers.remove(call_id) {
            slot.fulfill(&conn.connection_id);
        }
        self.notify_user(&updated.caller_id, EventName::CALL_ACCEPTED, &updated);
        tracing::info!(call_id = %updated.id, answered_by = %conn.connection_id, "call accepted");
        Ok(updated)
    }

    /// Callee declines a ringing call.
    pub async fn reject(
        &self,
        conn: &ConnectionHandle,
        call_id: &str,
    ) -> Result<Call, EventError> {
        let call = self.require_call(call_id).await?;
        if conn.user_id != call.callee_id {
            return Err(EventError::forbidden("only the callee can reject a call"));
        }
        if call.status != CallStatus::Ringing {
            return Err(EventError::conflict("call is not ringing"));
        }
        let updated = self.settle(call_id, CallStatus::Rejected).await?;
        self.notify_user(&updated.caller_id, EventName::CALL_REJECTED, &updated);
        tracing::info!(call_id = %updated.id, "call rejected");
        Ok(updated)
    }

    /// Either party hangs up, cancelling a ring or ending a live call. The
    /// other party is notified on whatever connections they have now.
    pub async fn end(&self, conn: &ConnectionHandle, call_id: &str) -> Result<Call, EventError> {
        let call = self.require_call(call_id).await?;
        let other = self.other_party(&call, &conn.user_id)?;
        if !call.status.is_active() {
            return Err(EventError::conflict("call is already over"));
        }
        let updated = self.settle(call_id, CallStatus::Ended).await?;
        self.notify_user(&other, EventName::CALL_ENDED, &updated);
        tracing::info!(call_id = %updated.id, ended_by = %conn.user_id, "call ended");
        Ok(updated)
    }

    /// Forwards an opaque signaling payload. Delivery is addressed, not
    /// acknowledged: an unreachable target counts zero deliveries and is
    /// not an error, because WebRTC stacks regenerate what matters.
    pub async fn relay_signal(
        &self,
        from: &ConnectionHandle,
        target: SignalTarget,
        payload: Value,
    ) -> Result<usize, EventError> {
        let (call_id, targets) = match target {
            SignalTarget::User(user_id) => (None, self.registry.connections_for(&user_id)),
            SignalTarget::Connection(connection_id) => (
                None,
                self.registry.connection(&connection_id).into_iter().collect(),
            ),
            SignalTarget::CallPeer(call_id) => {
                let targets = self.resolve_call_peer(from, &call_id).await?;
                (Some(call_id), targets)
            }
        };

        let data = json!({
            "call_id": call_id,
            "from_user": &from.user_id,
            "from_connection": &from.connection_id,
            "payload": payload,
        });
        let mut delivered = 0;
        for handle in &targets {
            if handle.send(EventName::RECEIVE_SIGNAL, data.clone()) {
                delivered += 1;
            }
        }
        if delivered == 0 {
            tracing::debug!(from = %from.connection_id, "signal dropped, no reachable target");
        }
        Ok(delivered)
    }

    /// Live connections of the other party of `call_id`.
    ///
    /// While the call is still ringing, a caller-side signal parks on the
    /// answer slot until the callee accepts, bounded by the answer wait.
    /// Timing out is a quiet drop, not an error.
    async fn resolve_call_peer(
        &self,
        from: &ConnectionHandle,
        call_id: &str,
    ) -> Result<Vec<ConnectionHandle>, EventError> {
        let call = self.require_call(call_id).await?;
        let other = self.other_party(&call, &from.user_id)?;

        if from.user_id == call.caller_id && call.status == CallStatus::Ringing {
            return Ok(match self.wait_for_answer(call_id).await {
                Some(connection_id) => self.connection_or_user(&connection_id, &other),
                None => Vec::new(),
            });
        }

        let preferred = if from.user_id == call.caller_id {
            call.answer_conn.clone()
        } else {
            Some(call.caller_conn.clone())
        };
        Ok(match preferred {
            Some(connection_id) => self.connection_or_user(&connection_id, &other),
            None => self.registry.connections_for(&other),
        })
    }

    // The addressed connection while it lives, otherwise whatever
    // connections the user has now.
    fn connection_or_user(&self, connection_id: &str, user_id: &str) -> Vec<ConnectionHandle> {
        match self.registry.connection(connection_id) {
            Some(handle) => vec![handle],
            None => self.registry.connections_for(user_id),
        }
    }

    /// Waits for the callee to pick up. `None` on timeout or when the call
    /// settled without an answer.
    async fn wait_for_answer(&self, call_id: &str) -> Option<String> {
        let slot = self
            .answers
            .entry(call_id.to_string())
            .or_default()
            .clone();
        let receiver = slot.subscribe();
        // The slot may have been fulfilled and detached while we were
        // subscribing; re-check the store before parking.
        if let Ok(Some(call)) = self.store.get_call(call_id).await {
            if call.status == CallStatus::Accepted {
                if let Some(answered_by) = call.answer_conn {
                    return Some(answered_by);
                }
            }
            if !call.status.is_active() {
                return None;
            }
        }
        match timeout(self.answer_wait, receiver).await {
            Ok(Ok(connection_id)) => Some(connection_id),
            _ => None,
        }
    }

    async fn settle(&self, call_id: &str, status: CallStatus) -> Result<Call, EventError> {
        self.answers.remove(call_id);
        self.store
            .update_call_status(call_id, status, None)
            .await?
            .ok_or_else(|| EventError::not_found("call not found"))
    }

    fn other_party(&self, call: &Call, user_id: &str) -> Result<String, EventError> {
        if user_id == call.caller_id {
            Ok(call.callee_id.clone())
        } else if user_id == call.callee_id {
            Ok(call.caller_id.clone())
        } else {
            Err(EventError::forbidden("not a party to this call"))
        }
    }

    fn notify_user(&self, user_id: &str, event: &'static str, call: &Call) {
        let data = serde_json::to_value(call).unwrap_or_default();
        for handle in self.registry.connections_for(user_id) {
            handle.send(event, data.clone());
        }
    }

    async fn require_call(&self, call_id: &str) -> Result<Call, EventError> {
        self.store
            .get_call(call_id)
            .await?
            .ok_or_else(|| EventError::not_found("call not found"))
    }
}
