//! Tier selection
//!
//! [`CacheOrchestrator`] is the only entry point callers use. Each call checks
//! the connection state once and then talks to exactly one tier: the remote
//! tier when it is connected, the fallback tier otherwise. Nothing here
//! returns an error; failures become `None`, `false` or `0`.

use std::{sync::Arc, time::Duration};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{
    connection::ConnectionManager, fallback::FallbackMemoryCache, pattern::KeyPattern,
    remote::RemoteCacheAdapter,
};

/// Which tier served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackingStore {
    Remote,
    Memory,
}

/// Snapshot of the active tier's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub connected: bool,
    pub backing_store: BackingStore,
    pub key_count: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    /// Hits over lookups, 0.0 when nothing was looked up yet.
    pub hit_rate: f64,
}

impl Stats {
    pub fn new(
        connected: bool,
        backing_store: BackingStore,
        key_count: u64,
        hit_count: u64,
        miss_count: u64,
    ) -> Self {
        let lookups = hit_count + miss_count;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            hit_count as f64 / lookups as f64
        };
        Self {
            connected,
            backing_store,
            key_count,
            hit_count,
            miss_count,
            hit_rate,
        }
    }

    /// Shape reported for an unreachable remote tier.
    pub fn disconnected() -> Self {
        Self::new(false, BackingStore::Remote, 0, 0, 0)
    }
}

/// Routes every operation to the currently active tier.
#[derive(Clone)]
pub struct CacheOrchestrator {
    connection: ConnectionManager,
    remote: RemoteCacheAdapter,
    fallback: Arc<FallbackMemoryCache>,
}

impl CacheOrchestrator {
    pub fn new(
        connection: ConnectionManager,
        remote: RemoteCacheAdapter,
        fallback: Arc<FallbackMemoryCache>,
    ) -> Self {
        Self {
            connection,
            remote,
            fallback,
        }
    }

    /// Tier the next operation will use.
    pub fn active_tier(&self) -> BackingStore {
        if self.connection.is_available() {
            BackingStore::Remote
        } else {
            BackingStore::Memory
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        match self.active_tier() {
            BackingStore::Remote => self.remote.get(key).await,
            BackingStore::Memory => self.fallback.get(key),
        }
    }

    /// Store `value`. The fallback tier ignores `ttl` and uses its own.
    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> bool {
        match self.active_tier() {
            BackingStore::Remote => self.remote.set(key, value, ttl).await,
            BackingStore::Memory => {
                self.fallback.set(key, value);
                true
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        match self.active_tier() {
            BackingStore::Remote => self.remote.delete(key).await,
            BackingStore::Memory => self.fallback.delete(key),
        }
    }

    /// Delete every key matching `glob` in the active tier.
    pub async fn delete_by_pattern(&self, glob: &str) -> u64 {
        match self.active_tier() {
            BackingStore::Remote => self.remote.delete_by_pattern(glob).await,
            BackingStore::Memory => match KeyPattern::new(glob) {
                Ok(pattern) => self.fallback.delete_matching(&pattern),
                Err(e) => {
                    warn!("Ignoring invalid cache pattern {}: {}", glob, e);
                    0
                }
            },
        }
    }

    pub async fn flush(&self) -> bool {
        match self.active_tier() {
            BackingStore::Remote => self.remote.flush().await,
            BackingStore::Memory => {
                let cleared = self.fallback.clear();
                debug!("Fallback cache flushed {} entries", cleared);
                true
            }
        }
    }

    pub async fn stats(&self) -> Stats {
        match self.active_tier() {
            BackingStore::Remote => self.remote.introspect().await,
            BackingStore::Memory => Stats::new(
                false,
                BackingStore::Memory,
                self.fallback.len() as u64,
                self.fallback.hit_count(),
                self.fallback.miss_count(),
            ),
        }
    }

    /// Typed read; an undecodable payload is logged and treated as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Failed to deserialize cached value for key {}: {}", key, e);
                None
            }
        }
    }

    /// Typed write; an unencodable value is logged and skipped.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, bytes, ttl).await,
            Err(e) => {
                warn!("Failed to serialize value for key {}: {}", key, e);
                false
            }
        }
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }
}
