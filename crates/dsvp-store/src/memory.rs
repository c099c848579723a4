//! In-process credential store.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dsvp_core::CredentialKey;
use parking_lot::RwLock;

use crate::{CredentialStore, Principal, StoreError};

/// Credential store held in memory.
///
/// Workers map to their online flag (`None` until first reported). The
/// store can be switched to an "unavailable" mode to exercise outage paths.
#[derive(Default)]
pub struct MemoryStore {
    workers: RwLock<HashMap<CredentialKey, Option<bool>>>,
    users: RwLock<HashSet<CredentialKey>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker key.
    pub fn add_worker(&self, key: CredentialKey) {
        let _ = self.workers.write().entry(key).or_insert(None);
    }

    /// Register a user key.
    pub fn add_user(&self, key: CredentialKey) {
        let _ = self.users.write().insert(key);
    }

    /// Last online flag written for a worker, `None` if never written or unknown.
    pub fn worker_online(&self, key: &CredentialKey) -> Option<bool> {
        self.workers.read().get(key).copied().flatten()
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            Err(StoreError::Unavailable("memory store switched off".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn exists(&self, principal: Principal, key: &CredentialKey) -> Result<bool, StoreError> {
        self.check_available()?;
        Ok(match principal {
            Principal::Worker => self.workers.read().contains_key(key),
            Principal::User => self.users.read().contains(key),
        })
    }

    async fn set_worker_online(&self, key: &CredentialKey, online: bool) -> Result<(), StoreError> {
        self.check_available()?;
        // HSET creates the hash when missing, so an unknown key is recorded too
        let _ = self.workers.write().insert(key.clone(), Some(online));
        Ok(())
    }
}
