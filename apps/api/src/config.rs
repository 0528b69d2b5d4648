//! Environment-driven configuration, read once at startup.

#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the listener binds.
    pub port: u16,
    /// HS256 secret shared with the account service.
    pub auth_secret: String,
    /// Base URL of the blob service. When unset, uploads land in the
    /// in-memory object store and disappear on restart.
    pub storage_url: Option<String>,
    /// Worker index folded into message IDs. Must be unique per instance.
    pub worker_id: u16,
}

impl Config {
    /// # Panics
    ///
    /// Panics when a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", 4000),
            auth_secret: required_var("AUTH_SECRET"),
            storage_url: std::env::var("STORAGE_URL").ok(),
            worker_id: env_or("WORKER_ID", 0),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("missing required environment variable {name}"))
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
