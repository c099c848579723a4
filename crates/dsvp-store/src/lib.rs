//! # dsvp-store
//!
//! The coordinator never owns credentials: they live in an external
//! key-value store and are issued out of band. This crate is the adapter
//! layer in front of that store.
//!
//! - [`CredentialStore`]: existence checks and the worker online flag
//! - [`RedisStore`]: production adapter (`EXISTS` / `HSET` on `worker:<key>`, `user:<key>`)
//! - [`MemoryStore`]: in-process adapter for tests and local runs

#![deny(unsafe_code)]

pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use dsvp_core::CredentialKey;
use thiserror::Error;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Kind of credential being looked up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Principal {
    /// A worker process.
    Worker,
    /// A human or service submitting work.
    User,
}

impl Principal {
    /// Key namespace in the store.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::User => "user",
        }
    }

    /// Full store key, e.g. `worker:64737670`.
    pub fn store_key(self, key: &CredentialKey) -> String {
        format!("{}:{key}", self.prefix())
    }
}

/// Failures of the backing store (connection loss, protocol errors).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the command.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// External credential store.
///
/// Errors are surfaced so callers can choose their policy: the socket path
/// treats them as "not found", the HTTP guards answer 500.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether `key` is registered for `principal`.
    async fn exists(&self, principal: Principal, key: &CredentialKey) -> Result<bool, StoreError>;

    /// Persist the online flag of a worker.
    async fn set_worker_online(&self, key: &CredentialKey, online: bool) -> Result<(), StoreError>;
}
