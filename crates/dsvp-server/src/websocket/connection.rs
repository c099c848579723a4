//! State and message dispatch of one worker socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dsvp_core::envelope::{self, AuthFailure, Envelope};
use dsvp_core::CredentialKey;
use dsvp_store::Principal;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::registry::WorkerRegistry;
use crate::metrics as m;

/// A worker connected over the socket.
///
/// Authenticated once `key` is set. Outbound frames go through a bounded
/// channel drained by the socket's writer task.
pub struct WorkerConnection {
    /// Numeric id assigned by the registry.
    pub id: u64,
    /// Credential key after a successful `auth`.
    key: Mutex<Option<CredentialKey>>,
    /// Send channel to the socket's write task.
    tx: mpsc::Sender<Arc<String>>,
    /// Cleared once the socket is gone.
    open: AtomicBool,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the worker has shown signs of life since the last heartbeat check.
    is_alive: AtomicBool,
    /// When the last pong (or any frame) arrived.
    last_seen: Mutex<Instant>,
    /// Count of frames dropped due to a full or closed channel.
    dropped_messages: AtomicU64,
}

impl WorkerConnection {
    /// Create a connection. Only the registry does this.
    pub(crate) fn new(id: u64, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            key: Mutex::new(None),
            tx,
            open: AtomicBool::new(true),
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// The authenticated credential key.
    pub fn key(&self) -> Option<CredentialKey> {
        self.key.lock().clone()
    }

    /// Whether a previous `auth` succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.key.lock().is_some()
    }

    /// Whether the socket is still live.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Mark the socket as gone. Late results (e.g. a slow credential check) are ignored afterwards.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    /// Encode and queue an envelope.
    ///
    /// Returns `false` and counts a drop if the queue is full or closed.
    pub fn send(&self, envelope: &Envelope) -> bool {
        let frame = Arc::new(envelope::encode(envelope));
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            metrics::counter!(m::WORKER_SEND_DROPS_TOTAL).increment(1);
            warn!(worker_id = self.id, kind = ?envelope.kind(), "dropped outbound message");
            false
        }
    }

    /// Total frames dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record activity (pong or inbound frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    /// Check and reset the alive flag. `true` if alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Time since the last sign of life.
    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Handle one inbound text frame.
    pub async fn handle_message(&self, raw: &str, registry: &WorkerRegistry) {
        self.mark_alive();
        let envelope = match envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                info!(worker_id = self.id, error = %e, raw, "discarding invalid message");
                metrics::counter!(m::WORKER_MESSAGES_DISCARDED_TOTAL).increment(1);
                return;
            }
        };
        debug!(worker_id = self.id, raw, "received message");

        match envelope {
            Envelope::Auth(auth) => self.authenticate(auth.token.as_deref(), registry).await,
            Envelope::Unknown { sent_type } => {
                warn!(
                    worker_id = self.id,
                    sent_type = sent_type.as_deref().unwrap_or_default(),
                    "worker reports a message we sent as unknown"
                );
            }
            other if !self.is_authenticated() => {
                let _ = self.send(&Envelope::unauthorized(other.kind()));
            }
            other => {
                let _ = self.send(&Envelope::unknown(other.kind()));
            }
        }
    }

    /// Verify an `auth` token against the credential store.
    ///
    /// Re-authentication over the same socket is allowed; a failed attempt
    /// leaves any existing identity in place.
    async fn authenticate(&self, token: Option<&str>, registry: &WorkerRegistry) {
        let key = match token.map(CredentialKey::from_token) {
            Some(Ok(key)) => key,
            Some(Err(e)) => {
                warn!(worker_id = self.id, error = %e, "rejecting auth token");
                self.reject(AuthFailure::InvalidKey);
                return;
            }
            None => {
                warn!(worker_id = self.id, "auth message without token");
                self.reject(AuthFailure::InvalidKey);
                return;
            }
        };

        let exists = match registry.store().exists(Principal::Worker, &key).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(worker_id = self.id, key = %key, error = %e, "credential check failed, rejecting");
                false
            }
        };

        if !self.is_open() {
            debug!(worker_id = self.id, key = %key, "socket closed during credential check, dropping result");
            return;
        }

        if !exists {
            warn!(worker_id = self.id, key = %key, "worker key not found (sock)");
            self.reject(AuthFailure::NotFound);
            return;
        }

        let previous = self.key.lock().replace(key.clone());
        if let Some(previous) = previous.filter(|p| p != &key) {
            registry.set_online(&previous, false).await;
        }
        registry.set_online(&key, true).await;
        metrics::counter!(m::WORKER_AUTH_TOTAL, "result" => "accepted").increment(1);
        info!(worker_id = self.id, key = %key, "worker authenticated");
        registry.on_authenticated(self);
        let _ = self.send(&Envelope::auth_accepted());
    }

    fn reject(&self, reason: AuthFailure) {
        metrics::counter!(m::WORKER_AUTH_TOTAL, "result" => reason.as_str()).increment(1);
        let _ = self.send(&Envelope::auth_rejected(reason));
    }

    /// Tear down after the socket closed: clear the online flag and leave the registry.
    pub async fn on_close(&self, registry: &WorkerRegistry) {
        self.mark_closed();
        info!(worker_id = self.id, age_secs = self.age().as_secs(), "worker disconnected");
        if let Some(key) = self.key() {
            registry.set_online(&key, false).await;
        }
        let _ = registry.remove_connection(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use dsvp_store::{CredentialStore, MemoryStore};
    use serde_json::{Value, json};

    const TOKEN: &str = "ZHN2cA=="; // "dsvp"

    fn worker_key() -> CredentialKey {
        CredentialKey::from_token(TOKEN).unwrap()
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: WorkerRegistry,
        conn: Arc<WorkerConnection>,
        rx: mpsc::Receiver<Arc<String>>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            store.add_worker(worker_key());
            let registry = WorkerRegistry::new(store.clone());
            let (tx, rx) = mpsc::channel(32);
            let conn = registry.register_connection(tx);
            Self {
                store,
                registry,
                conn,
                rx,
            }
        }

        async fn send(&self, raw: &str) {
            self.conn.handle_message(raw, &self.registry).await;
        }

        fn reply(&mut self) -> Value {
            let frame = self.rx.try_recv().expect("expected a reply");
            serde_json::from_str(&frame).unwrap()
        }

        fn no_reply(&mut self) {
            assert!(self.rx.try_recv().is_err(), "expected no reply");
        }
    }

    #[tokio::test]
    async fn auth_with_known_key_succeeds() {
        let mut f = Fixture::new();
        f.send(&json!({"type": "auth", "token": TOKEN}).to_string()).await;
        assert_eq!(f.reply(), json!({"type": "auth", "result": true}));
        assert!(f.conn.is_authenticated());
        assert_eq!(f.conn.key(), Some(worker_key()));
        assert_eq!(f.store.worker_online(&worker_key()), Some(true));
    }

    #[tokio::test]
    async fn auth_with_unknown_key_is_not_found() {
        let mut f = Fixture::new();
        let token = CredentialKey::encode_token(b"stranger");
        f.send(&json!({"type": "auth", "token": token}).to_string()).await;
        assert_eq!(
            f.reply(),
            json!({"type": "auth", "result": false, "reason": "not_found"})
        );
        assert!(!f.conn.is_authenticated());
        let stranger = CredentialKey::from_bytes(b"stranger").unwrap();
        assert_eq!(f.store.worker_online(&stranger), None);
    }

    #[tokio::test]
    async fn empty_token_is_invalid_key_and_stops() {
        let mut f = Fixture::new();
        f.send(r#"{"type":"auth","token":""}"#).await;
        assert_eq!(
            f.reply(),
            json!({"type": "auth", "result": false, "reason": "invalid_key"})
        );
        // exactly one reply: no fall-through into the credential check
        f.no_reply();
        assert!(!f.conn.is_authenticated());
    }

    #[tokio::test]
    async fn missing_token_is_invalid_key() {
        let mut f = Fixture::new();
        f.send(r#"{"type":"auth","token":7}"#).await;
        assert_eq!(f.reply()["reason"], "invalid_key");
        f.send(r#"{"type":"auth"}"#).await;
        assert_eq!(f.reply()["reason"], "invalid_key");
    }

    #[tokio::test]
    async fn retry_after_not_found_on_same_socket() {
        let mut f = Fixture::new();
        let wrong = CredentialKey::encode_token(b"nope");
        f.send(&json!({"type": "auth", "token": wrong}).to_string()).await;
        assert_eq!(f.reply()["result"], false);
        f.send(&json!({"type": "auth", "token": TOKEN}).to_string()).await;
        assert_eq!(f.reply()["result"], true);
        assert!(f.conn.is_authenticated());
    }

    #[tokio::test]
    async fn store_outage_fails_closed() {
        let mut f = Fixture::new();
        f.store.set_unavailable(true);
        f.send(&json!({"type": "auth", "token": TOKEN}).to_string()).await;
        assert_eq!(
            f.reply(),
            json!({"type": "auth", "result": false, "reason": "not_found"})
        );
        assert!(!f.conn.is_authenticated());
    }

    #[tokio::test]
    async fn unauthenticated_message_is_refused() {
        let mut f = Fixture::new();
        f.send(r#"{"type":"ping"}"#).await;
        assert_eq!(f.reply(), json!({"type": "unauthorized", "sent_type": "ping"}));
        f.no_reply();
        assert!(f.conn.is_open());
        assert_eq!(f.registry.len(), 1);
    }

    #[tokio::test]
    async fn unknown_type_after_auth_gets_unknown() {
        let mut f = Fixture::new();
        f.send(&json!({"type": "auth", "token": TOKEN}).to_string()).await;
        let _ = f.reply();
        f.send(r#"{"type":"ping"}"#).await;
        assert_eq!(f.reply(), json!({"type": "unknown", "sent_type": "ping"}));
    }

    #[tokio::test]
    async fn unknown_report_is_only_logged() {
        let (logs, _guard) = dsvp_logging::capture_logs();
        let mut f = Fixture::new();
        f.send(r#"{"type":"unknown","sent_type":"job"}"#).await;
        f.no_reply();
        assert!(logs.has_event(tracing::Level::WARN, "unknown"));
    }

    #[tokio::test]
    async fn malformed_messages_are_discarded() {
        let mut f = Fixture::new();
        for raw in ["not json", "null", "[1,2]", "42", "\"auth\""] {
            f.send(raw).await;
        }
        f.no_reply();
        assert!(f.conn.is_open());
    }

    #[tokio::test]
    async fn message_without_type_is_refused_without_sent_type() {
        let mut f = Fixture::new();
        f.send(r#"{"hello":"world"}"#).await;
        assert_eq!(f.reply(), json!({"type": "unauthorized"}));
    }

    #[tokio::test]
    async fn close_after_auth_clears_flag_and_registry() {
        let mut f = Fixture::new();
        f.send(&json!({"type": "auth", "token": TOKEN}).to_string()).await;
        let _ = f.reply();
        f.conn.on_close(&f.registry).await;
        assert_eq!(f.store.worker_online(&worker_key()), Some(false));
        assert!(f.registry.is_empty());
        assert!(!f.conn.is_open());
    }

    #[tokio::test]
    async fn close_before_auth_leaves_flag_alone() {
        let f = Fixture::new();
        f.conn.on_close(&f.registry).await;
        assert_eq!(f.store.worker_online(&worker_key()), None);
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn result_after_close_is_dropped() {
        let mut f = Fixture::new();
        f.conn.mark_closed();
        f.send(&json!({"type": "auth", "token": TOKEN}).to_string()).await;
        f.no_reply();
        assert!(!f.conn.is_authenticated());
        assert_eq!(f.store.worker_online(&worker_key()), None);
    }

    /// Holds every `exists` call until `gate` is notified.
    struct GatedStore {
        inner: MemoryStore,
        entered: tokio::sync::Notify,
        gate: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl CredentialStore for GatedStore {
        async fn exists(
            &self,
            principal: Principal,
            key: &CredentialKey,
        ) -> Result<bool, dsvp_store::StoreError> {
            self.entered.notify_one();
            self.gate.notified().await;
            self.inner.exists(principal, key).await
        }

        async fn set_worker_online(
            &self,
            key: &CredentialKey,
            online: bool,
        ) -> Result<(), dsvp_store::StoreError> {
            self.inner.set_worker_online(key, online).await
        }
    }

    #[tokio::test]
    async fn close_during_pending_check_drops_result() {
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            entered: tokio::sync::Notify::new(),
            gate: tokio::sync::Notify::new(),
        });
        store.inner.add_worker(worker_key());
        let registry = Arc::new(WorkerRegistry::new(store.clone()));
        let (tx, mut rx) = mpsc::channel(8);
        let conn = registry.register_connection(tx);

        let auth = tokio::spawn({
            let conn = conn.clone();
            let registry = registry.clone();
            async move {
                let raw = json!({"type": "auth", "token": TOKEN}).to_string();
                conn.handle_message(&raw, &registry).await;
            }
        });

        store.entered.notified().await;
        conn.on_close(&registry).await;
        store.gate.notify_one();
        auth.await.unwrap();

        assert!(rx.try_recv().is_err(), "no reply after close");
        assert!(!conn.is_authenticated());
        assert_eq!(store.inner.worker_online(&worker_key()), None);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn reauth_with_other_key_moves_online_flag() {
        let mut f = Fixture::new();
        let other = CredentialKey::from_bytes(b"other").unwrap();
        f.store.add_worker(other.clone());
        f.send(&json!({"type": "auth", "token": TOKEN}).to_string()).await;
        let _ = f.reply();
        let token = CredentialKey::encode_token(b"other");
        f.send(&json!({"type": "auth", "token": token}).to_string()).await;
        assert_eq!(f.reply()["result"], true);
        assert_eq!(f.store.worker_online(&worker_key()), Some(false));
        assert_eq!(f.store.worker_online(&other), Some(true));
        assert_eq!(f.conn.key(), Some(other));
    }

    #[tokio::test]
    async fn failed_reauth_keeps_identity() {
        let mut f = Fixture::new();
        f.send(&json!({"type": "auth", "token": TOKEN}).to_string()).await;
        let _ = f.reply();
        let wrong = CredentialKey::encode_token(b"nope");
        f.send(&json!({"type": "auth", "token": wrong}).to_string()).await;
        assert_eq!(f.reply()["reason"], "not_found");
        assert_eq!(f.conn.key(), Some(worker_key()));
        assert!(f.store.exists(Principal::Worker, &worker_key()).await.unwrap());
    }

    #[tokio::test]
    async fn send_to_closed_channel_counts_drop() {
        let f = Fixture::new();
        drop(f.rx);
        assert!(!f.conn.send(&Envelope::auth_accepted()));
        assert_eq!(f.conn.drop_count(), 1);
        assert!(!f.conn.is_open());
    }

    #[test]
    fn check_alive_resets_flag() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = WorkerConnection::new(1, tx);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
    }
}
