// Runtime configuration, loaded once at startup from the environment.

use std::env;
use std::time::Duration;

/// Process-wide configuration. Constructed once in `main` and handed down
/// explicitly to the collaborators that need it rather than read from
/// ambient globals.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub websocket_path: String,
    pub heartbeat_interval: Duration,
    pub ack_timeout: Duration,
    pub batch_sync_timeout: Duration,
}

impl Config {
    /// Reads configuration from the environment, falling back to
    /// development-friendly defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/canvas.db".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            websocket_path: env::var("WEBSOCKET_PATH").unwrap_or_else(|_| "/ws".to_string()),
            heartbeat_interval: Duration::from_secs(
                env::var("HEARTBEAT_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            ack_timeout: Duration::from_secs(
                env::var("ACK_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
            batch_sync_timeout: Duration::from_secs(
                env::var("BATCH_SYNC_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            bind_addr: "127.0.0.1:3000".to_string(),
            websocket_path: "/ws".to_string(),
            heartbeat_interval: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(5),
            batch_sync_timeout: Duration::from_secs(60),
        }
    }
}
