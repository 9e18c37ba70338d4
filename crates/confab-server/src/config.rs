//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use confab_shared::constants::{
    DEFAULT_EVENT_BURST, DEFAULT_EVENT_RATE, DEFAULT_HTTP_PORT, DEFAULT_OUTBOUND_BUFFER,
    DEFAULT_STORE_TIMEOUT_MS, DEFAULT_TYPING_TIMEOUT_SECS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP / WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `None`, meaning `confab.db` in the platform data directory.
    pub database_path: Option<PathBuf>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Typing indicators without a refresh for this long are dropped.
    /// Env: `TYPING_TIMEOUT_SECS`
    pub typing_timeout: Duration,

    /// Deadline for a single store call.
    /// Env: `STORE_TIMEOUT_MS`
    pub store_timeout: Duration,

    /// Outbound events queued per connection before deliveries are dropped.
    /// Env: `OUTBOUND_BUFFER`
    pub outbound_buffer: usize,

    /// Sustained inbound events per second per connection.
    /// Env: `EVENT_RATE`
    pub event_rate: f64,

    /// Inbound burst allowance per connection.
    /// Env: `EVENT_BURST`
    pub event_burst: f64,

    /// Maximum number of live connections (0 = unlimited).
    /// Env: `MAX_CONNECTIONS`
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            instance_name: "Confab Node".to_string(),
            typing_timeout: Duration::from_secs(DEFAULT_TYPING_TIMEOUT_SECS),
            store_timeout: Duration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            event_rate: DEFAULT_EVENT_RATE,
            event_burst: DEFAULT_EVENT_BURST,
            max_connections: 0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parsed::<SocketAddr>(&lookup, "HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Some(path) = lookup("DATABASE_PATH").filter(|p| !p.is_empty()) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(name) = lookup("INSTANCE_NAME").filter(|n| !n.trim().is_empty()) {
            config.instance_name = name;
        }

        if let Some(secs) = parsed::<u64>(&lookup, "TYPING_TIMEOUT_SECS").filter(|s| *s > 0) {
            config.typing_timeout = Duration::from_secs(secs);
        }

        if let Some(ms) = parsed::<u64>(&lookup, "STORE_TIMEOUT_MS").filter(|ms| *ms > 0) {
            config.store_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parsed::<usize>(&lookup, "OUTBOUND_BUFFER").filter(|n| *n > 0) {
            config.outbound_buffer = n;
        }

        if let Some(rate) = parsed::<f64>(&lookup, "EVENT_RATE").filter(|r| *r > 0.0) {
            config.event_rate = rate;
        }

        if let Some(burst) = parsed::<f64>(&lookup, "EVENT_BURST").filter(|b| *b >= 1.0) {
            config.event_burst = burst;
        }

        if let Some(n) = parsed::<usize>(&lookup, "MAX_CONNECTIONS") {
            config.max_connections = n;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid value, using default");
            None
        }
    }
}
