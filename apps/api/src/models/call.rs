use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fika_common::id::{prefix, prefixed_ulid};

use super::user::UserClaims;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallKind {
    Audio,
    Video,
}

/// Lifecycle of a call.
///
/// `Ringing` and `Accepted` are live; everything else is settled. A ringing
/// call may settle as `Accepted`, `Rejected`, `Missed`, `Failed` or `Ended`;
/// an accepted call only as `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Ringing,
    Accepted,
    Rejected,
    Missed,
    Failed,
    Ended,
}

impl CallStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, CallStatus::Ringing | CallStatus::Accepted)
    }
}

/// A persisted call record. `caller_conn` is the return address for
/// callee-side signaling; `answer_conn` is filled in when the callee
/// accepts and is the return address for caller-side signaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub caller_avatar_url: Option<String>,
    pub callee_id: String,
    pub kind: CallKind,
    pub status: CallStatus,
    pub caller_conn: String,
    pub answer_conn: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Call {
    /// A fresh ringing call from `caller_conn`.
    pub fn ringing(
        caller_id: &str,
        claims: &UserClaims,
        callee_id: &str,
        kind: CallKind,
        caller_conn: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: prefixed_ulid(prefix::CALL),
            caller_id: caller_id.to_string(),
            caller_name: claims.name.clone(),
            caller_avatar_url: claims.avatar_url.clone(),
            callee_id: callee_id.to_string(),
            kind,
            status: CallStatus::Ringing,
            caller_conn: caller_conn.to_string(),
            answer_conn: None,
            created_at: now,
            updated_at: now,
        }
    }
}
