//! Settings type definitions.
//!
//! Every struct is `#[serde(default)]`, so a settings file only needs the
//! keys it wants to change.

use dsvp_logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings document.
///
/// ```json
/// {
///   "server": { "port": 9000, "redisUrl": "redis://127.0.0.1/" },
///   "worker": { "serverUrl": "ws://coordinator:8080/sock" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DsvpSettings {
    /// Coordinator settings.
    pub server: ServerSettings,
    /// Worker settings.
    pub worker: WorkerSettings,
}

/// Coordinator network, store, and logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP + WebSocket port.
    pub port: u16,
    /// Redis URL of the credential store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis_url: Option<String>,
    /// Realm advertised in `WWW-Authenticate`.
    pub realm: String,
    /// Interval between WebSocket pings in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Close a socket after this long without a pong, in milliseconds.
    pub heartbeat_timeout_ms: u64,
    /// Largest accepted WebSocket frame in bytes.
    pub max_message_size: usize,
    /// Per-connection outbound queue length.
    pub send_queue_size: usize,
    /// Default log filter.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            redis_url: None,
            realm: "dsvp".to_string(),
            heartbeat_interval_ms: 25_000,
            heartbeat_timeout_ms: 75_000,
            max_message_size: 1024 * 1024,
            send_queue_size: 64,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

impl ServerSettings {
    /// The credential store URL, which has no default.
    pub fn require_redis_url(&self) -> Result<&str> {
        self.redis_url
            .as_deref()
            .ok_or(SettingsError::Missing("DSVP_REDIS_URL"))
    }
}

/// Worker connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSettings {
    /// WebSocket URL of the coordinator, e.g. `ws://host:8080/sock`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,
    /// Base64 credential token sent in the `auth` message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Default log filter.
    pub log_level: String,
    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            server_url: None,
            auth_token: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
        }
    }
}

impl WorkerSettings {
    /// URL and token, both of which are required to start a worker.
    pub fn require_credentials(&self) -> Result<(&str, &str)> {
        let url = self
            .server_url
            .as_deref()
            .ok_or(SettingsError::Missing("DSVP_SERVER_URL"))?;
        let token = self
            .auth_token
            .as_deref()
            .ok_or(SettingsError::Missing("DSVP_CLIENT_AUTH_TOKEN"))?;
        Ok((url, token))
    }
}
