//! Remote tier
//!
//! [`RemoteStore`] and [`RemoteConnector`] are the seam to the shared
//! key-value service; [`RemoteCacheAdapter`] wraps them so that every call is
//! bounded by a timeout and fails open.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{
    CacheError,
    connection::ConnectionManager,
    orchestrator::{BackingStore, Stats},
};

/// Counters reported by the remote service itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteInfo {
    pub key_count: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Operations on an established remote connection.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn ping(&self) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Store `value` under `key`, expiring after `ttl_secs`.
    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<(), CacheError>;

    /// Returns whether the key existed.
    async fn del(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete every key matching the glob; returns how many were removed.
    async fn del_matching(&self, glob: &str) -> Result<u64, CacheError>;

    async fn info(&self) -> Result<RemoteInfo, CacheError>;
}

/// Opens connections to the remote service.
#[async_trait]
pub trait RemoteConnector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Arc<dyn RemoteStore>, CacheError>;
}

/// Fail-open client for the remote tier.
///
/// Every method returns a neutral value when the tier is unavailable or the
/// call fails; transport failures are reported back to the
/// [`ConnectionManager`] so subsequent calls route to the fallback tier.
#[derive(Clone)]
pub struct RemoteCacheAdapter {
    connection: ConnectionManager,
    op_timeout: Duration,
    namespace: String,
}

impl RemoteCacheAdapter {
    pub fn new(connection: ConnectionManager) -> Self {
        let op_timeout = connection.config().op_timeout;
        let namespace = connection.config().namespace.clone();
        Self {
            connection,
            op_timeout,
            namespace,
        }
    }

    pub fn is_available(&self) -> bool {
        self.connection.is_available()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let store = self.connection.store()?;
        match self.bounded("GET", store.get(key)).await {
            Ok(value) => {
                debug!(
                    "Remote cache {} for key: {}",
                    if value.is_some() { "hit" } else { "miss" },
                    key
                );
                value
            }
            Err(e) => {
                warn!("Remote cache GET error for key {}: {}. Treating as miss.", key, e);
                self.connection.report_error(&e);
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> bool {
        let Some(store) = self.connection.store() else {
            return false;
        };
        // A zero expiry is rejected by the server; one second is the floor.
        let ttl_secs = ttl.as_secs().max(1);
        match self.bounded("SETEX", store.set_ex(key, value, ttl_secs)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Remote cache SETEX error for key {}: {}. Continuing.", key, e);
                self.connection.report_error(&e);
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        let Some(store) = self.connection.store() else {
            return false;
        };
        match self.bounded("DEL", store.del(key)).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!("Remote cache DEL error for key {}: {}. Continuing.", key, e);
                self.connection.report_error(&e);
                false
            }
        }
    }

    pub async fn delete_by_pattern(&self, glob: &str) -> u64 {
        let Some(store) = self.connection.store() else {
            return 0;
        };
        match self.bounded("SCAN/DEL", store.del_matching(glob)).await {
            Ok(count) => {
                debug!("Remote cache deleted {} keys matching {}", count, glob);
                count
            }
            Err(e) => {
                warn!("Remote cache pattern delete for {} failed: {}", glob, e);
                self.connection.report_error(&e);
                0
            }
        }
    }

    /// Remove every key in the cache namespace.
    pub async fn flush(&self) -> bool {
        let Some(store) = self.connection.store() else {
            return false;
        };
        let glob = format!("{}:*", self.namespace);
        match self.bounded("FLUSH", store.del_matching(&glob)).await {
            Ok(count) => {
                debug!("Remote cache flushed {} keys", count);
                true
            }
            Err(e) => {
                warn!("Remote cache flush failed: {}", e);
                self.connection.report_error(&e);
                false
            }
        }
    }

    /// Server-reported counters, or a disconnected shape.
    pub async fn introspect(&self) -> Stats {
        let Some(store) = self.connection.store() else {
            return Stats::disconnected();
        };
        match self.bounded("INFO", store.info()).await {
            Ok(info) => Stats::new(true, BackingStore::Remote, info.key_count, info.hits, info.misses),
            Err(e) => {
                warn!("Remote cache INFO failed: {}", e);
                self.connection.report_error(&e);
                Stats::disconnected()
            }
        }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        match timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                op,
                after: self.op_timeout,
            }),
        }
    }
}
