use serde::{Deserialize, Serialize};

/// Identity attributes taken from a verified credential at identify time
/// and frozen onto everything the connection later produces. A profile
/// rename never rewrites history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserClaims {
    pub name: String,
    pub avatar_url: Option<String>,
}
