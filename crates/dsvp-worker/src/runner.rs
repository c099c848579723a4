//! Reconnect loop driving a [`WorkerSession`] over `tokio-tungstenite`.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::WorkerError;
use crate::session::{Control, SessionState, WorkerSession};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Give up on a handshake after this long; counts as a failed attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How a single connection ended.
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Closed,
    Shutdown,
}

/// Owns a session and keeps it connected until shutdown.
pub struct Runner {
    url: String,
    session: WorkerSession,
    state_tx: watch::Sender<SessionState>,
}

impl Runner {
    /// Validate `url` and prepare a disconnected session.
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self, WorkerError> {
        let url = url.into();
        if let Err(source) = url.as_str().into_client_request() {
            return Err(WorkerError::InvalidUrl { url, source });
        }
        let session = WorkerSession::new(token);
        let (state_tx, _) = watch::channel(session.state());
        Ok(Self {
            url,
            session,
            state_tx,
        })
    }

    /// Follow session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Connect, serve, and reconnect until `shutdown` fires.
    #[instrument(skip_all, fields(url = %self.url))]
    pub async fn run(mut self, shutdown: CancellationToken) {
        loop {
            self.session.begin_connect();
            self.publish();
            debug!(attempt = self.session.retries(), "connecting");

            let connect = tokio::select! {
                result = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.url.as_str())) => result,
                () = shutdown.cancelled() => break,
            };

            match connect {
                Ok(Ok((ws, _))) => {
                    if self.serve(ws, &shutdown).await == Exit::Shutdown {
                        break;
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "connection failed"),
                Err(_) => warn!(timeout_secs = CONNECT_TIMEOUT.as_secs(), "connection timed out"),
            }

            let delay = self.session.on_close();
            self.publish();
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = shutdown.cancelled() => break,
            }
        }

        let _ = self.session.on_close();
        self.publish();
        info!("worker stopped");
    }

    /// Pump one open socket until it closes.
    async fn serve(&mut self, ws: WsStream, shutdown: &CancellationToken) -> Exit {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.session.on_open(tx);
        self.publish();

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Exit::Shutdown;
                }
                Some(frame) = rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        info!(error = %e, "send failed");
                        return Exit::Closed;
                    }
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let control = self.session.on_message(text.as_str());
                        self.publish();
                        if control == Control::Close {
                            let _ = sink.send(Message::Close(None)).await;
                            return Exit::Closed;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed the connection");
                        return Exit::Closed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        info!(error = %e, "connection lost");
                        return Exit::Closed;
                    }
                    None => return Exit::Closed,
                },
            }
        }
    }

    fn publish(&self) {
        let _ = self.state_tx.send_replace(self.session.state());
    }
}

/// Run a worker against `url` until `shutdown` fires.
pub async fn run(
    url: impl Into<String>,
    token: impl Into<String>,
    shutdown: CancellationToken,
) -> Result<(), WorkerError> {
    Runner::new(url, token)?.run(shutdown).await;
    Ok(())
}
