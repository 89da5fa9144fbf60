//! In-memory remote tier for tests.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    CacheConfig, CacheError, CacheOrchestrator, ConnectionManager, FallbackMemoryCache,
    RemoteCacheAdapter,
    pattern::KeyPattern,
    remote::{RemoteConnector, RemoteInfo, RemoteStore},
};

pub(crate) fn fake_config() -> CacheConfig {
    CacheConfig {
        connect_timeout: Duration::from_secs(1),
        op_timeout: Duration::from_millis(100),
        health_check_interval: Duration::from_secs(3600),
        ..CacheConfig::default()
    }
}

pub(crate) async fn orchestrator_with(
    config: CacheConfig,
    connector: Arc<FakeConnector>,
) -> CacheOrchestrator {
    let fallback = Arc::new(FallbackMemoryCache::new(
        config.fallback_capacity,
        config.fallback_ttl,
    ));
    let manager = ConnectionManager::new(config, connector);
    manager.connect().await;
    let remote = RemoteCacheAdapter::new(manager.clone());
    CacheOrchestrator::new(manager, remote, fallback)
}

/// Remote store whose reachability and latency can be flipped at runtime.
pub(crate) struct FakeStore {
    reachable: Arc<AtomicBool>,
    data: Mutex<HashMap<String, (Vec<u8>, u64)>>,
    delay: Mutex<Duration>,
    hits: AtomicU64,
    misses: AtomicU64,
    ops: AtomicU64,
}

impl FakeStore {
    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub(crate) fn insert_raw(&self, key: &str, value: Vec<u8>) {
        self.data.lock().insert(key.to_owned(), (value, 0));
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    pub(crate) fn ttl_of(&self, key: &str) -> Option<u64> {
        self.data.lock().get(key).map(|(_, ttl)| *ttl)
    }

    pub(crate) fn op_calls(&self) -> u64 {
        self.ops.load(Ordering::SeqCst)
    }

    async fn enter(&self, count: bool) -> Result<(), CacheError> {
        if count {
            self.ops.fetch_add(1, Ordering::SeqCst);
        }
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable)
        }
    }
}

#[async_trait]
impl RemoteStore for FakeStore {
    async fn ping(&self) -> Result<(), CacheError> {
        self.enter(false).await
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.enter(true).await?;
        let value = self.data.lock().get(key).map(|(v, _)| v.clone());
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::SeqCst);
        } else {
            self.misses.fetch_add(1, Ordering::SeqCst);
        }
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<(), CacheError> {
        self.enter(true).await?;
        self.data.lock().insert(key.to_owned(), (value, ttl_secs));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        self.enter(true).await?;
        Ok(self.data.lock().remove(key).is_some())
    }

    async fn del_matching(&self, glob: &str) -> Result<u64, CacheError> {
        self.enter(true).await?;
        let pattern = KeyPattern::new(glob)?;
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|k, _| !pattern.matches(k));
        Ok((before - data.len()) as u64)
    }

    async fn info(&self) -> Result<RemoteInfo, CacheError> {
        self.enter(true).await?;
        Ok(RemoteInfo {
            key_count: self.data.lock().len() as u64,
            hits: self.hits.load(Ordering::SeqCst),
            misses: self.misses.load(Ordering::SeqCst),
        })
    }
}

/// Hands out the same [`FakeStore`] on every successful connect.
pub(crate) struct FakeConnector {
    reachable: Arc<AtomicBool>,
    store: Arc<FakeStore>,
    connects: AtomicU32,
}

impl FakeConnector {
    fn with_reachability(reachable: bool) -> Arc<Self> {
        let flag = Arc::new(AtomicBool::new(reachable));
        Arc::new(Self {
            store: Arc::new(FakeStore {
                reachable: Arc::clone(&flag),
                data: Mutex::new(HashMap::new()),
                delay: Mutex::new(Duration::ZERO),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                ops: AtomicU64::new(0),
            }),
            reachable: flag,
            connects: AtomicU32::new(0),
        })
    }

    pub(crate) fn reachable() -> Arc<Self> {
        Self::with_reachability(true)
    }

    pub(crate) fn unreachable() -> Arc<Self> {
        Self::with_reachability(false)
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub(crate) fn connect_calls(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn store(&self) -> &FakeStore {
        &self.store
    }
}

#[async_trait]
impl RemoteConnector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteStore>, CacheError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable);
        }
        Ok(Arc::clone(&self.store) as Arc<dyn RemoteStore>)
    }
}
