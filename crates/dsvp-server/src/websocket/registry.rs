//! Live worker connections owned by one server instance.

use std::collections::HashMap;
use std::sync::Arc;

use dsvp_core::CredentialKey;
use dsvp_store::CredentialStore;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::connection::WorkerConnection;
use crate::metrics as m;

struct Inner {
    next_id: u64,
    workers: HashMap<u64, Arc<WorkerConnection>>,
}

/// Tracks every connected worker socket, authenticated or not.
///
/// Ids start at 1 and are never reused within a process.
pub struct WorkerRegistry {
    store: Arc<dyn CredentialStore>,
    inner: Mutex<Inner>,
}

impl WorkerRegistry {
    /// Create an empty registry backed by `store`.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner {
                next_id: 1,
                workers: HashMap::new(),
            }),
        }
    }

    /// The credential store used for authentication and online tracking.
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Assign the next id to a new socket and start tracking it.
    pub fn register_connection(&self, tx: mpsc::Sender<Arc<String>>) -> Arc<WorkerConnection> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let conn = Arc::new(WorkerConnection::new(id, tx));
        let _ = inner.workers.insert(id, conn.clone());
        let active = inner.workers.len();
        drop(inner);

        metrics::counter!(m::WORKER_CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(m::WORKER_CONNECTIONS_ACTIVE).set(gauge_value(active));
        info!(worker_id = id, active, "worker connected");
        conn
    }

    /// Stop tracking a socket. Returns `false` if it was already gone.
    pub fn remove_connection(&self, id: u64) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.workers.remove(&id).is_some();
        let active = inner.workers.len();
        drop(inner);

        if removed {
            metrics::counter!(m::WORKER_DISCONNECTIONS_TOTAL).increment(1);
            metrics::gauge!(m::WORKER_CONNECTIONS_ACTIVE).set(gauge_value(active));
            debug!(worker_id = id, active, "worker removed from registry");
        }
        removed
    }

    /// Called once a connection has passed `auth`.
    pub fn on_authenticated(&self, conn: &WorkerConnection) {
        debug!(
            worker_id = conn.id,
            authenticated = self.authenticated_count(),
            "registry updated after auth"
        );
    }

    /// Persist the online flag, logging (not propagating) store failures.
    pub async fn set_online(&self, key: &CredentialKey, online: bool) {
        if let Err(e) = self.store.set_worker_online(key, online).await {
            error!(key = %key, online, error = %e, "failed to update worker online flag");
        }
    }

    /// Look up a connection by id.
    pub fn get(&self, id: u64) -> Option<Arc<WorkerConnection>> {
        self.inner.lock().workers.get(&id).cloned()
    }

    /// Number of tracked sockets.
    pub fn len(&self) -> usize {
        self.inner.lock().workers.len()
    }

    /// Whether no sockets are tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().workers.is_empty()
    }

    /// Number of tracked sockets that have authenticated.
    pub fn authenticated_count(&self) -> usize {
        self.inner
            .lock()
            .workers
            .values()
            .filter(|c| c.is_authenticated())
            .count()
    }

    /// Snapshot of all tracked connections.
    pub fn connections(&self) -> Vec<Arc<WorkerConnection>> {
        self.inner.lock().workers.values().cloned().collect()
    }
}

fn gauge_value(n: usize) -> f64 {
    f64::from(u32::try_from(n).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsvp_store::MemoryStore;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn register(reg: &WorkerRegistry) -> Arc<WorkerConnection> {
        let (tx, _rx) = mpsc::channel(4);
        reg.register_connection(tx)
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let reg = registry();
        let a = register(&reg);
        let b = register(&reg);
        let c = register(&reg);
        assert_eq!((a.id, b.id, c.id), (1, 2, 3));
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn ids_are_not_reused_after_removal() {
        let reg = registry();
        let a = register(&reg);
        assert!(reg.remove_connection(a.id));
        let b = register(&reg);
        assert_eq!(b.id, 2);
    }

    #[test]
    fn removal_is_idempotent() {
        let reg = registry();
        let a = register(&reg);
        assert!(reg.remove_connection(a.id));
        assert!(!reg.remove_connection(a.id));
        assert!(!reg.remove_connection(999));
        assert!(reg.is_empty());
    }

    #[test]
    fn get_returns_tracked_connection() {
        let reg = registry();
        let a = register(&reg);
        assert_eq!(reg.get(a.id).map(|c| c.id), Some(a.id));
        assert!(reg.get(42).is_none());
    }

    #[test]
    fn new_connections_are_unauthenticated() {
        let reg = registry();
        let _ = register(&reg);
        assert_eq!(reg.authenticated_count(), 0);
        assert_eq!(reg.connections().len(), 1);
    }

    #[tokio::test]
    async fn set_online_swallows_store_errors() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let reg = WorkerRegistry::new(store.clone());
        let key = CredentialKey::from_bytes(b"w").unwrap();
        let (logs, _guard) = dsvp_logging::capture_logs();
        reg.set_online(&key, true).await;
        assert!(logs.has_event(tracing::Level::ERROR, "online flag"));
        assert_eq!(store.worker_online(&key), None);
    }

    #[test]
    fn concurrent_registration_yields_unique_ids() {
        let reg = Arc::new(registry());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    (0..50).map(|_| register(&reg).id).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut ids: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 400);
        assert_eq!(ids.first(), Some(&1));
        assert_eq!(ids.last(), Some(&400));
    }
}
