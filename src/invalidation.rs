//! Entity-driven invalidation
//!
//! Write paths call [`InvalidationRouter::invalidate`] after a successful
//! mutation. Each entity type maps to the key patterns whose cached
//! responses embed that entity, so a customer change also purges the
//! dashboards and summaries built from customer data.

use futures::future::join_all;
use tracing::{debug, info};

use crate::CacheOrchestrator;

/// Entity type that clears the whole namespace.
pub const ALL_ENTITIES: &str = "all";

/// Patterns purged per entity type, relative to the namespace.
const ENTITY_PATTERNS: &[(&str, &[&str])] = &[
    ("customer", &["*/customer*", "*/dashboard*", "*/summary*"]),
    (
        "account",
        &["*/account*", "*/customer*", "*/dashboard*", "*/summary*"],
    ),
    (
        "transaction",
        &["*/transaction*", "*/account*", "*/dashboard*", "*/summary*"],
    ),
    ("loan", &["*/loan*", "*/customer*", "*/dashboard*"]),
    ("user", &["*/user*"]),
    ("device", &["*/device*"]),
];

/// Maps entity changes to cache purges.
#[derive(Clone)]
pub struct InvalidationRouter {
    cache: CacheOrchestrator,
    namespace: String,
}

impl InvalidationRouter {
    pub fn new(cache: CacheOrchestrator) -> Self {
        let namespace = cache.connection().config().namespace.clone();
        Self { cache, namespace }
    }

    /// Full key globs for `entity_type`.
    ///
    /// Unknown entity types get a single `*/<entity>*` pattern.
    pub fn patterns_for(&self, entity_type: &str) -> Vec<String> {
        let entity = entity_type.trim().to_lowercase();
        if entity == ALL_ENTITIES {
            return vec![format!("{}:*", self.namespace)];
        }

        match ENTITY_PATTERNS.iter().find(|(name, _)| *name == entity) {
            Some((_, patterns)) => patterns
                .iter()
                .map(|p| format!("{}:{}", self.namespace, p))
                .collect(),
            None => {
                debug!("No invalidation mapping for '{}'; using a generic pattern", entity);
                vec![format!("{}:*/{}*", self.namespace, escape_glob(&entity))]
            }
        }
    }

    /// Purge every entry tied to `entity_type`; returns the number removed.
    pub async fn invalidate(&self, entity_type: &str) -> u64 {
        let patterns = self.patterns_for(entity_type);
        let counts = join_all(
            patterns
                .iter()
                .map(|pattern| self.cache.delete_by_pattern(pattern)),
        )
        .await;

        let cleared = counts.into_iter().sum();
        info!(
            entity_type = %entity_type,
            cleared,
            "Cache invalidated"
        );
        cleared
    }
}

fn escape_glob(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        BackingStore,
        testing::{FakeConnector, fake_config, orchestrator_with},
    };
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(180);

    async fn seed(cache: &CacheOrchestrator) {
        for key in [
            "cache:/api/customer/list",
            "cache:/api/customer/7?include=accounts",
            "cache:/api/dashboard/summary",
            "cache:/api/account/list",
            "cache:/api/transaction/list",
            "cache:/api/device/list",
        ] {
            assert!(cache.set(key, b"{}".to_vec(), TTL).await);
        }
    }

    #[tokio::test]
    async fn test_patterns_are_namespaced() {
        let cache = orchestrator_with(fake_config(), FakeConnector::reachable()).await;
        let router = InvalidationRouter::new(cache);

        assert_eq!(router.patterns_for("all"), vec!["cache:*".to_owned()]);
        assert_eq!(
            router.patterns_for("Customer"),
            vec![
                "cache:*/customer*".to_owned(),
                "cache:*/dashboard*".to_owned(),
                "cache:*/summary*".to_owned(),
            ]
        );
        assert_eq!(router.patterns_for("widget"), vec!["cache:*/widget*".to_owned()]);
        assert_eq!(router.patterns_for("we*rd"), vec![r"cache:*/we\*rd*".to_owned()]);
    }

    #[tokio::test]
    async fn test_customer_invalidation_leaves_unrelated_entries() {
        for connector in [FakeConnector::reachable(), FakeConnector::unreachable()] {
            let cache = orchestrator_with(fake_config(), connector).await;
            seed(&cache).await;
            let router = InvalidationRouter::new(cache.clone());

            assert_eq!(router.invalidate("customer").await, 3);
            assert_eq!(cache.get("cache:/api/customer/list").await, None);
            assert_eq!(cache.get("cache:/api/customer/7?include=accounts").await, None);
            assert_eq!(cache.get("cache:/api/dashboard/summary").await, None);
            assert!(cache.get("cache:/api/account/list").await.is_some());
            assert!(cache.get("cache:/api/transaction/list").await.is_some());
            assert!(cache.get("cache:/api/device/list").await.is_some());
        }
    }

    #[tokio::test]
    async fn test_overlapping_patterns_count_each_key_once_per_tier() {
        let cache = orchestrator_with(fake_config(), FakeConnector::unreachable()).await;
        assert_eq!(cache.active_tier(), BackingStore::Memory);
        seed(&cache).await;
        let router = InvalidationRouter::new(cache.clone());

        // "transaction" touches transaction, account, dashboard: three keys.
        assert_eq!(router.invalidate("transaction").await, 3);
        assert_eq!(router.invalidate("transaction").await, 0);
    }

    #[tokio::test]
    async fn test_all_clears_namespace() {
        let connector = FakeConnector::reachable();
        let cache = orchestrator_with(fake_config(), connector.clone()).await;
        seed(&cache).await;
        connector.store().insert_raw("session:keep", vec![1]);
        let router = InvalidationRouter::new(cache.clone());

        assert_eq!(router.invalidate("all").await, 6);
        assert!(connector.store().contains("session:keep"));
    }

    #[tokio::test]
    async fn test_invalidate_on_unreachable_remote_returns_zero() {
        let connector = FakeConnector::reachable();
        let cache = orchestrator_with(fake_config(), connector.clone()).await;
        seed(&cache).await;
        connector.set_reachable(false);

        let router = InvalidationRouter::new(cache);
        assert_eq!(router.invalidate("customer").await, 0);
    }
}
