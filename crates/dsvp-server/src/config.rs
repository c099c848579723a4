//! Server configuration.

use std::time::Duration;

use dsvp_settings::ServerSettings;
use serde::{Deserialize, Serialize};

/// Runtime configuration of a [`DsvpServer`](crate::DsvpServer).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Realm advertised in `WWW-Authenticate` challenges.
    pub realm: String,
    /// Interval between pings and liveness checks.
    pub heartbeat_interval: Duration,
    /// Close a socket after this long without a sign of life.
    pub heartbeat_timeout: Duration,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue length.
    pub send_queue_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            realm: "dsvp".into(),
            heartbeat_interval: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(75),
            max_message_size: 1024 * 1024,
            send_queue_size: 64,
        }
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        Self {
            host: s.host.clone(),
            port: s.port,
            realm: s.realm.clone(),
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(s.heartbeat_timeout_ms),
            max_message_size: s.max_message_size,
            send_queue_size: s.send_queue_size,
        }
    }
}

impl ServerConfig {
    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
