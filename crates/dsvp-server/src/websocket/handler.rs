//! Per-socket task: runs one worker connection from upgrade through disconnect.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::heartbeat::{HeartbeatResult, MIN_INTERVAL, run_heartbeat};
use super::registry::WorkerRegistry;
use crate::config::ServerConfig;
use crate::metrics as m;

/// Serve one upgraded worker socket until it closes, times out, or `cancel` fires.
///
/// 1. Registers a connection and spawns the writer (queue drain + pings)
/// 2. Spawns the heartbeat watchdog
/// 3. Dispatches inbound text frames in order, one at a time
/// 4. On exit clears the online flag and leaves the registry
#[instrument(skip_all, fields(worker_id))]
pub async fn serve_socket(
    socket: WebSocket,
    registry: Arc<WorkerRegistry>,
    config: Arc<ServerConfig>,
    cancel: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(config.send_queue_size.max(1));
    let conn = registry.register_connection(send_tx);
    let _ = tracing::Span::current().record("worker_id", conn.id);
    let started = Instant::now();

    let writer_cancel = cancel.clone();
    let ping_interval = config.heartbeat_interval.max(MIN_INTERVAL);
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        // first tick fires immediately
        let _ = ping.tick().await;
        loop {
            tokio::select! {
                frame = send_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(String::clone(&frame).into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                () = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        writer_cancel.cancel();
    });

    let heartbeat = tokio::spawn({
        let conn = conn.clone();
        let cancel = cancel.clone();
        let (interval, timeout) = (config.heartbeat_interval, config.heartbeat_timeout);
        async move {
            if run_heartbeat(conn.clone(), interval, timeout, cancel.clone()).await
                == HeartbeatResult::TimedOut
            {
                warn!(
                    worker_id = conn.id,
                    silent_ms = u64::try_from(conn.last_seen_elapsed().as_millis()).unwrap_or(u64::MAX),
                    "worker unresponsive, closing socket"
                );
                cancel.cancel();
            }
        }
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = cancel.cancelled() => break,
        };
        match msg {
            Some(Ok(Message::Text(text))) => conn.handle_message(text.as_str(), &registry).await,
            Some(Ok(Message::Pong(_) | Message::Ping(_))) => conn.mark_alive(),
            Some(Ok(Message::Binary(data))) => {
                conn.mark_alive();
                info!(worker_id = conn.id, len = data.len(), "discarding binary frame");
                metrics::counter!(m::WORKER_MESSAGES_DISCARDED_TOTAL).increment(1);
            }
            Some(Ok(Message::Close(_))) => {
                debug!(worker_id = conn.id, "worker sent close frame");
                break;
            }
            Some(Err(e)) => {
                info!(worker_id = conn.id, error = %e, "socket error");
                break;
            }
            None => break,
        }
    }

    conn.mark_closed();
    cancel.cancel();
    let _ = writer.await;
    let _ = heartbeat.await;
    conn.on_close(&registry).await;
    metrics::histogram!(m::WORKER_CONNECTION_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
}
