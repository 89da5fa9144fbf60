//! savings-cache - Tiered response cache for the savings back office
//!
//! This library provides a two-tier, fail-open caching layer:
//! - Remote: a shared Redis instance, used whenever it is connected
//! - Fallback: a bounded in-process table, used when Redis is down or disabled
//!
//! The cache supports:
//! - Per-call tier selection driven by a connection state machine
//! - Backoff reconnect with a bounded attempt budget
//! - Read-through caching of axum `GET` routes with per-route TTLs
//! - Entity-driven invalidation by key pattern
//! - No cache failure ever reaching the request path

pub mod admin;
mod config;
mod connection;
mod error;
mod fallback;
pub mod invalidation;
pub mod middleware;
mod orchestrator;
mod pattern;
mod redis_store;
pub mod remote;
mod service;
#[cfg(test)]
mod testing;

pub use config::CacheConfig;
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionState};
pub use error::CacheError;
pub use fallback::{CacheEntry, FallbackMemoryCache};
pub use invalidation::InvalidationRouter;
pub use middleware::{ResponseCache, cache_response};
pub use orchestrator::{BackingStore, CacheOrchestrator, Stats};
pub use pattern::KeyPattern;
pub use redis_store::{RedisConnector, RedisStore};
pub use remote::{RemoteCacheAdapter, RemoteConnector, RemoteInfo, RemoteStore};
pub use service::CacheService;

// Re-export async_trait for remote implementations
pub use async_trait::async_trait;
