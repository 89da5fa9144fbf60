//! Cache configuration

use std::time::Duration;

/// Step added to the reconnect delay on every failed attempt.
pub const RECONNECT_BACKOFF_STEP: Duration = Duration::from_millis(50);

/// Upper bound for the reconnect delay.
pub const RECONNECT_BACKOFF_CAP: Duration = Duration::from_millis(2000);

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_OP_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_NAMESPACE: &str = "cache";
const DEFAULT_FALLBACK_CAPACITY: usize = 100;
const DEFAULT_FALLBACK_TTL_SECS: u64 = 300;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_HEALTH_CHECK_INTERVAL_SECS: u64 = 30;

/// Configuration for the tiered cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Administrative switch; when off the remote tier is never contacted
    pub enabled: bool,
    /// Remote cache host
    pub host: String,
    /// Remote cache port
    pub port: u16,
    /// Optional password for the remote cache
    pub password: Option<String>,
    /// Logical database index on the remote cache
    pub db_index: i64,
    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
    /// Handshake timeout
    pub connect_timeout: Duration,
    /// Per-operation timeout for remote calls
    pub op_timeout: Duration,
    /// Prefix for every cache key (`<namespace>:<path-and-query>`)
    pub namespace: String,
    /// Maximum number of entries in the fallback tier
    pub fallback_capacity: usize,
    /// Uniform TTL applied by the fallback tier
    pub fallback_ttl: Duration,
    /// How often the fallback tier is swept for expired entries
    pub sweep_interval: Duration,
    /// How often a live remote connection is pinged
    pub health_check_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            password: None,
            db_index: 0,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            op_timeout: Duration::from_millis(DEFAULT_OP_TIMEOUT_MS),
            namespace: DEFAULT_NAMESPACE.to_owned(),
            fallback_capacity: DEFAULT_FALLBACK_CAPACITY,
            fallback_ttl: Duration::from_secs(DEFAULT_FALLBACK_TTL_SECS), // 5 minutes
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS), // 5 minutes
            health_check_interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
        }
    }
}

impl CacheConfig {
    /// Create a CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_ENABLED`: Use the remote tier at all (default: true)
    /// - `CACHE_HOST` / `CACHE_PORT`: Remote cache address (default: 127.0.0.1:6379)
    /// - `CACHE_PASSWORD`: Remote cache password (default: none)
    /// - `CACHE_DB_INDEX`: Logical database (default: 0)
    /// - `CACHE_MAX_RECONNECT_ATTEMPTS`: Reconnect budget (default: 5)
    /// - `CACHE_CONNECT_TIMEOUT_MS`: Handshake timeout (default: 10000)
    /// - `CACHE_OP_TIMEOUT_MS`: Per-operation timeout (default: 2000)
    /// - `CACHE_NAMESPACE`: Key prefix (default: "cache")
    /// - `CACHE_FALLBACK_CAPACITY`: Fallback tier size (default: 100)
    /// - `CACHE_FALLBACK_TTL_SECS`: Fallback tier TTL (default: 300)
    /// - `CACHE_SWEEP_INTERVAL_SECS`: Fallback sweep period (default: 300)
    /// - `CACHE_HEALTH_CHECK_INTERVAL_SECS`: Remote ping period (default: 30)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |name: &str| lookup(name).and_then(|s| s.trim().parse::<u64>().ok());

        let enabled = lookup("CACHE_ENABLED")
            .map(|s| !matches!(s.trim().to_lowercase().as_str(), "false" | "0" | "no" | "off"))
            .unwrap_or(true);

        let host = lookup("CACHE_HOST")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_HOST.to_owned());

        let port = lookup("CACHE_PORT")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let password = lookup("CACHE_PASSWORD").filter(|s| !s.is_empty());

        let db_index = lookup("CACHE_DB_INDEX")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0);

        let max_reconnect_attempts = lookup("CACHE_MAX_RECONNECT_ATTEMPTS")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_RECONNECT_ATTEMPTS);

        let namespace = lookup("CACHE_NAMESPACE")
            .map(|s| s.trim().trim_end_matches(':').to_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_owned());

        let fallback_capacity = lookup("CACHE_FALLBACK_CAPACITY")
            .and_then(|s| s.trim().parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_FALLBACK_CAPACITY);

        Self {
            enabled,
            host,
            port,
            password,
            db_index,
            max_reconnect_attempts,
            connect_timeout: Duration::from_millis(
                parsed("CACHE_CONNECT_TIMEOUT_MS").unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            op_timeout: Duration::from_millis(
                parsed("CACHE_OP_TIMEOUT_MS").unwrap_or(DEFAULT_OP_TIMEOUT_MS),
            ),
            namespace,
            fallback_capacity,
            fallback_ttl: Duration::from_secs(
                parsed("CACHE_FALLBACK_TTL_SECS").unwrap_or(DEFAULT_FALLBACK_TTL_SECS),
            ),
            sweep_interval: Duration::from_secs(
                parsed("CACHE_SWEEP_INTERVAL_SECS")
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
            ),
            health_check_interval: Duration::from_secs(
                parsed("CACHE_HEALTH_CHECK_INTERVAL_SECS")
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
            ),
        }
    }

    /// Build the full cache key for a request path (including query string).
    pub fn key_for(&self, path_and_query: &str) -> String {
        format!("{}:{}", self.namespace, path_and_query)
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn reconnect_delay(attempt: u32) -> Duration {
        RECONNECT_BACKOFF_STEP
            .saturating_mul(attempt)
            .min(RECONNECT_BACKOFF_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = CacheConfig::from_lookup(|_| None);

        assert!(config.enabled);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 6379);
        assert_eq!(config.password, None);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.fallback_capacity, 100);
        assert_eq!(config.fallback_ttl, Duration::from_secs(300));
        assert_eq!(config.namespace, "cache");
    }

    #[test]
    fn test_reads_recognized_variables() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("CACHE_ENABLED", "false"),
            ("CACHE_HOST", "cache.internal"),
            ("CACHE_PORT", "6380"),
            ("CACHE_PASSWORD", "s3cret"),
            ("CACHE_DB_INDEX", "2"),
            ("CACHE_MAX_RECONNECT_ATTEMPTS", "9"),
            ("CACHE_CONNECT_TIMEOUT_MS", "2500"),
            ("CACHE_NAMESPACE", "svc:"),
        ]));

        assert!(!config.enabled);
        assert_eq!(config.host, "cache.internal");
        assert_eq!(config.port, 6380);
        assert_eq!(config.password.as_deref(), Some("s3cret"));
        assert_eq!(config.db_index, 2);
        assert_eq!(config.max_reconnect_attempts, 9);
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.namespace, "svc");
    }

    #[test]
    fn test_garbage_values_fall_back_to_defaults() {
        let config = CacheConfig::from_lookup(lookup_from(&[
            ("CACHE_PORT", "not-a-port"),
            ("CACHE_FALLBACK_CAPACITY", "0"),
            ("CACHE_CONNECT_TIMEOUT_MS", "-1"),
        ]));

        assert_eq!(config.port, 6379);
        assert_eq!(config.fallback_capacity, 100);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_reconnect_delay_is_linear_and_capped() {
        assert_eq!(CacheConfig::reconnect_delay(1), Duration::from_millis(50));
        assert_eq!(CacheConfig::reconnect_delay(5), Duration::from_millis(250));
        assert_eq!(CacheConfig::reconnect_delay(40), Duration::from_millis(2000));
        assert_eq!(CacheConfig::reconnect_delay(u32::MAX), Duration::from_millis(2000));
    }

    #[test]
    fn test_key_for_prefixes_namespace() {
        let config = CacheConfig::default();
        assert_eq!(
            config.key_for("/api/customer/list?page=2"),
            "cache:/api/customer/list?page=2"
        );
    }
}
