//! Worker session state machine.
//!
//! The session never touches the network. The runner feeds it transport
//! events (`begin_connect`, `on_open`, `on_message`, `on_close`) and acts on
//! what it returns; outbound frames go through the sender handed over in
//! `on_open`, which is dropped again on close.

use std::time::Duration;

use dsvp_core::backoff::{self, AUTH_REJECTED_RETRIES};
use dsvp_core::envelope::{self, Auth, AuthFailure, Envelope};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Connection lifecycle of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// No transport; waiting for the backoff timer.
    Disconnected,
    /// Transport being opened.
    Connecting,
    /// Transport open, `auth` sent, no answer yet.
    Connected,
    /// The server accepted our credential.
    Authenticated,
}

/// What the runner should do after a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Control {
    /// Keep reading.
    Continue,
    /// Close the transport.
    Close,
}

/// One worker's view of its link to the coordinator.
pub struct WorkerSession {
    token: String,
    state: SessionState,
    retries: u32,
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl WorkerSession {
    /// A disconnected session that will authenticate with `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            state: SessionState::Disconnected,
            retries: 0,
            outbound: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Failed attempts since the last successful open.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether the server accepted our credential on the current transport.
    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// A connect attempt is starting. Counts the attempt up front.
    pub fn begin_connect(&mut self) {
        self.state = SessionState::Connecting;
        self.retries = self.retries.saturating_add(1);
    }

    /// The transport opened: send `auth` and reset the retry counter.
    pub fn on_open(&mut self, outbound: mpsc::UnboundedSender<String>) {
        self.outbound = Some(outbound);
        self.state = SessionState::Connected;
        info!("connected, authenticating");
        let _ = self.send(&Envelope::auth_request(self.token.clone()));
        self.retries = 0;
    }

    /// Dispatch one inbound text frame.
    pub fn on_message(&mut self, raw: &str) -> Control {
        let envelope = match envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                info!(error = %e, raw, "discarding invalid message");
                return Control::Continue;
            }
        };

        match envelope {
            Envelope::Auth(Auth {
                result: Some(true), ..
            }) => {
                self.state = SessionState::Authenticated;
                info!("authenticated");
                Control::Continue
            }
            Envelope::Auth(Auth { reason, .. }) => {
                // anything short of an explicit `result: true` is a rejection
                error!(
                    reason = reason.map(AuthFailure::as_str).unwrap_or_default(),
                    "authentication rejected, backing off"
                );
                self.retries = AUTH_REJECTED_RETRIES;
                Control::Close
            }
            Envelope::Unknown { sent_type } => {
                warn!(
                    sent_type = sent_type.as_deref().unwrap_or_default(),
                    "server reports a message we sent as unknown"
                );
                Control::Continue
            }
            other => {
                debug!(kind = ?other.kind(), "no handler for message");
                let _ = self.send(&Envelope::unknown(other.kind()));
                Control::Continue
            }
        }
    }

    /// The transport closed (or never opened). Returns how long to wait
    /// before the next attempt.
    pub fn on_close(&mut self) -> Duration {
        self.outbound = None;
        self.state = SessionState::Disconnected;
        let delay = backoff::delay(self.retries);
        info!(
            retries = self.retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "disconnected, reconnect scheduled"
        );
        delay
    }

    /// Queue an envelope on the open transport. A no-op when disconnected.
    pub fn send(&self, envelope: &Envelope) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(envelope::encode(envelope)).is_ok(),
            None => {
                debug!(kind = ?envelope.kind(), "not connected, dropping message");
                false
            }
        }
    }
}
