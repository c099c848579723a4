//! Worker client errors.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors that stop the worker loop.
///
/// Transport failures while running are not errors: they end the current
/// connection and schedule a reconnect.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The server URL cannot be turned into a `WebSocket` request.
    #[error("invalid server url {url}: {source}")]
    InvalidUrl {
        /// The configured URL.
        url: String,
        /// Why it was rejected.
        #[source]
        source: tungstenite::Error,
    },
}
