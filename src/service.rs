//! Service lifecycle
//!
//! [`CacheService`] wires the tiers together once at startup and is handed to
//! the HTTP layer by reference. Tests build as many isolated instances as
//! they like.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{
    CacheConfig, CacheOrchestrator, ConnectionManager, FallbackMemoryCache, InvalidationRouter,
    RemoteCacheAdapter,
    admin::AdminState,
    redis_store::RedisConnector,
    remote::RemoteConnector,
};

/// The wired-up cache with its background tasks.
pub struct CacheService {
    cache: CacheOrchestrator,
    invalidation: InvalidationRouter,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl CacheService {
    /// Build against Redis and connect.
    ///
    /// Never fails: an unreachable remote only means the fallback tier
    /// serves until a reconnect succeeds.
    pub async fn init(config: CacheConfig) -> Self {
        let connector = Arc::new(RedisConnector::new(&config));
        Self::init_with_connector(config, connector).await
    }

    /// Build against any remote implementation and connect.
    pub async fn init_with_connector(
        config: CacheConfig,
        connector: Arc<dyn RemoteConnector>,
    ) -> Self {
        let fallback = Arc::new(FallbackMemoryCache::new(
            config.fallback_capacity,
            config.fallback_ttl,
        ));
        let sweep_interval = config.sweep_interval;
        let enabled = config.enabled;

        let connection = ConnectionManager::new(config, connector);
        let remote = RemoteCacheAdapter::new(connection.clone());
        let cache = CacheOrchestrator::new(connection.clone(), remote, Arc::clone(&fallback));
        let invalidation = InvalidationRouter::new(cache.clone());

        let sweeper = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = fallback.sweep();
                debug!("Fallback sweep finished; {} entries removed", removed);
            }
        });

        if enabled {
            connection.connect().await;
        } else {
            info!("Remote cache disabled; serving from in-process memory only");
        }

        Self {
            cache,
            invalidation,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn cache(&self) -> &CacheOrchestrator {
        &self.cache
    }

    pub fn invalidation(&self) -> &InvalidationRouter {
        &self.invalidation
    }

    pub fn admin_state(&self) -> AdminState {
        AdminState::new(self.cache.clone(), self.invalidation.clone())
    }

    /// Stop background work and drop the remote connection.
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.abort();
        }
        self.cache.connection().disconnect();
        info!("Cache service shut down");
    }
}

impl Drop for CacheService {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BackingStore, ConnectionState,
        testing::{FakeConnector, fake_config},
    };
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(180);

    #[tokio::test]
    async fn test_end_to_end_customer_list_scenario() {
        let connector = FakeConnector::reachable();
        let service = CacheService::init_with_connector(fake_config(), connector.clone()).await;
        let cache = service.cache();
        let key = "cache:/api/customer/list";
        let payload = br#"{"success":true,"data":[{"id":"c-1","name":"Ada"}]}"#.to_vec();

        assert!(cache.set(key, payload.clone(), TTL).await);
        assert_eq!(cache.get(key).await, Some(payload));

        // Remote forced down: the fallback tier never saw this key.
        cache.connection().disconnect();
        assert_eq!(cache.active_tier(), BackingStore::Memory);
        assert_eq!(cache.get(key).await, None);

        let cleared = service.invalidation().invalidate("customer").await;
        assert_eq!(cleared, 0);
        assert_eq!(cache.get(key).await, None);

        service.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_fallback_entries() {
        let mut config = fake_config();
        config.enabled = false;
        config.fallback_ttl = Duration::from_secs(300);
        config.sweep_interval = Duration::from_secs(300);
        let service = CacheService::init_with_connector(config, FakeConnector::reachable()).await;
        let cache = service.cache();

        cache.set("cache:/api/account/list", vec![1], TTL).await;
        assert_eq!(cache.stats().await.key_count, 1);

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert_eq!(cache.stats().await.key_count, 0);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_disconnects() {
        let connector = FakeConnector::reachable();
        let service = CacheService::init_with_connector(fake_config(), connector).await;
        assert_eq!(service.cache().connection().state(), ConnectionState::Connected);

        service.shutdown();
        assert_eq!(service.cache().connection().state(), ConnectionState::Disconnected);
        // Still usable, now from memory.
        assert!(service.cache().set("cache:/x", vec![1], TTL).await);
        assert_eq!(service.cache().get("cache:/x").await, Some(vec![1]));
    }
}
