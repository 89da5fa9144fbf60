//! Redis implementation of the remote tier

use std::sync::Arc;

use async_trait::async_trait;
use redis::{AsyncCommands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tracing::debug;

use crate::{
    CacheConfig, CacheError,
    remote::{RemoteConnector, RemoteInfo, RemoteStore},
};

/// Keys fetched per SCAN round trip.
const SCAN_BATCH: usize = 100;

/// Opens [`RedisStore`] connections from a [`CacheConfig`].
pub struct RedisConnector {
    info: ConnectionInfo,
}

impl RedisConnector {
    pub fn new(config: &CacheConfig) -> Self {
        let info = ConnectionInfo {
            addr: ConnectionAddr::Tcp(config.host.clone(), config.port),
            redis: RedisConnectionInfo {
                db: config.db_index,
                password: config.password.clone(),
                ..Default::default()
            },
        };
        Self { info }
    }
}

#[async_trait]
impl RemoteConnector for RedisConnector {
    async fn connect(&self) -> Result<Arc<dyn RemoteStore>, CacheError> {
        let client = redis::Client::open(self.info.clone())?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Arc::new(RedisStore { conn }))
    }
}

/// A live Redis connection.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set_ex(&self, key: &str, value: Vec<u8>, ttl_secs: u64) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn del_matching(&self, glob: &str) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut total = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(glob)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await?;
                total += removed;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        debug!("Redis: removed {} keys matching {}", total, glob);
        Ok(total)
    }

    async fn info(&self) -> Result<RemoteInfo, CacheError> {
        let mut conn = self.conn.clone();
        let stats: String = redis::cmd("INFO")
            .arg("stats")
            .query_async(&mut conn)
            .await?;
        let key_count: u64 = redis::cmd("DBSIZE").query_async(&mut conn).await?;

        let (hits, misses) = parse_keyspace_counters(&stats);
        Ok(RemoteInfo {
            key_count,
            hits,
            misses,
        })
    }
}

/// Extract `keyspace_hits` / `keyspace_misses` from an `INFO stats` reply.
fn parse_keyspace_counters(info: &str) -> (u64, u64) {
    let mut hits = 0;
    let mut misses = 0;
    for line in info.lines() {
        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        match name {
            "keyspace_hits" => hits = value.parse().unwrap_or(0),
            "keyspace_misses" => misses = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    (hits, misses)
}
