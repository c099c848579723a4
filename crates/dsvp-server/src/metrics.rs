//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus recorder as the global `metrics` recorder.
///
/// Returns the handle used to render `/metrics`. Call once at startup.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Worker sockets opened (counter).
pub const WORKER_CONNECTIONS_TOTAL: &str = "worker_connections_total";
/// Worker sockets closed (counter).
pub const WORKER_DISCONNECTIONS_TOTAL: &str = "worker_disconnections_total";
/// Worker sockets currently open (gauge).
pub const WORKER_CONNECTIONS_ACTIVE: &str = "worker_connections_active";
/// Socket authentication attempts (counter, labels: result).
pub const WORKER_AUTH_TOTAL: &str = "worker_auth_total";
/// Inbound frames thrown away as malformed (counter).
pub const WORKER_MESSAGES_DISCARDED_TOTAL: &str = "worker_messages_discarded_total";
/// Outbound frames dropped on a full or closed queue (counter).
pub const WORKER_SEND_DROPS_TOTAL: &str = "worker_send_drops_total";
/// Socket lifetime (histogram).
pub const WORKER_CONNECTION_DURATION_SECONDS: &str = "worker_connection_duration_seconds";
/// HTTP bearer authentication attempts (counter, labels: principal, result).
pub const HTTP_AUTH_TOTAL: &str = "http_auth_total";
