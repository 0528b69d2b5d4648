use ulid::Ulid;

/// Generates a new ULID-based ID with the given prefix.
///
/// # Examples
/// ```
/// let id = fika_common::id::prefixed_ulid("conn");
/// assert!(id.starts_with("conn_"));
/// ```
pub fn prefixed_ulid(prefix: &str) -> String {
    format!("{}_{}", prefix, Ulid::new().to_string())
}

/// Well-known ID prefixes.
pub mod prefix {
    pub const USER: &str = "usr";
    pub const CONNECTION: &str = "conn";
    pub const CHAT: &str = "chat";
    pub const COMMUNITY: &str = "com";
    pub const CALL: &str = "call";
    pub const ATTACHMENT: &str = "att";
}
