//! Redis-backed credential store.
//!
//! Layout: a worker is the hash `worker:<hex>` whose `online` field holds
//! `"true"` / `"false"`; a user is any key `user:<hex>`.

use async_trait::async_trait;
use dsvp_core::CredentialKey;
use redis::aio::ConnectionManager;
use tracing::{debug, info, instrument};

use crate::{CredentialStore, Principal, StoreError};

/// Credential store on top of a reconnecting Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Open a connection manager and verify the server answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut conn = client.get_connection_manager().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("connected to credential store");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CredentialStore for RedisStore {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn exists(&self, principal: Principal, key: &CredentialKey) -> Result<bool, StoreError> {
        let store_key = principal.store_key(key);
        let mut conn = self.conn.clone();
        let found: i64 = redis::cmd("EXISTS")
            .arg(&store_key)
            .query_async(&mut conn)
            .await?;
        debug!(store_key = %store_key, found, "EXISTS");
        Ok(found > 0)
    }

    #[instrument(skip(self, key), fields(key = %key))]
    async fn set_worker_online(&self, key: &CredentialKey, online: bool) -> Result<(), StoreError> {
        let store_key = Principal::Worker.store_key(key);
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("HSET")
            .arg(&store_key)
            .arg("online")
            .arg(if online { "true" } else { "false" })
            .query_async(&mut conn)
            .await?;
        debug!(store_key = %store_key, online, "HSET online");
        Ok(())
    }
}
