//! In-process fallback tier
//!
//! A bounded, insertion-ordered table used whenever the remote tier is down
//! or disabled. Every entry gets the same coarse TTL regardless of what the
//! caller asked for. When full, expired entries go first and then the oldest
//! insertions, never by access recency.

use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::pattern::KeyPattern;

/// A stored value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= self.ttl
    }
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, (u64, CacheEntry)>,
    /// Insertion sequence -> key, oldest first.
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl Table {
    fn insert(&mut self, entry: CacheEntry) {
        self.remove(&entry.key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, entry.key.clone());
        self.entries.insert(entry.key.clone(), (seq, entry));
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((seq, _)) => {
                self.order.remove(&seq);
                true
            }
            None => false,
        }
    }

    fn remove_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .values()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(_, e)| e.key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    /// Drop oldest insertions until at most `limit` remain.
    fn evict_oldest(&mut self, limit: usize) -> usize {
        let mut evicted = 0;
        while self.entries.len() > limit {
            let Some((_, key)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&key);
            evicted += 1;
        }
        evicted
    }

    fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        self.order.clear();
        n
    }
}

/// Bounded TTL map behind a single lock.
pub struct FallbackMemoryCache {
    table: RwLock<Table>,
    capacity: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FallbackMemoryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            capacity: capacity.max(1),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Unexpired value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        let found = {
            let table = self.table.read();
            table
                .entries
                .get(key)
                .filter(|(_, e)| !e.is_expired(now))
                .map(|(_, e)| e.value.clone())
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Fallback cache hit for key: {}", key);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("Fallback cache miss for key: {}", key);
        }
        found
    }

    /// Insert with the tier's fixed TTL, making room first when full.
    pub fn set(&self, key: &str, value: Vec<u8>) {
        let now = Instant::now();
        let mut table = self.table.write();

        if !table.entries.contains_key(key) && table.entries.len() >= self.capacity {
            let expired = table.remove_expired(now);
            let evicted = table.evict_oldest(self.capacity - 1);
            if expired + evicted > 0 {
                debug!(
                    "Fallback cache made room: {} expired, {} evicted",
                    expired, evicted
                );
            }
        }

        table.insert(CacheEntry {
            key: key.to_owned(),
            value,
            inserted_at: now,
            ttl: self.ttl,
        });
    }

    pub fn delete(&self, key: &str) -> bool {
        self.table.write().remove(key)
    }

    /// Delete every key matching `pattern`; returns how many were removed.
    pub fn delete_matching(&self, pattern: &KeyPattern) -> u64 {
        let mut table = self.table.write();
        let doomed: Vec<String> = table
            .entries
            .keys()
            .filter(|k| pattern.matches(k))
            .cloned()
            .collect();
        for key in &doomed {
            table.remove(key);
        }
        doomed.len() as u64
    }

    pub fn clear(&self) -> u64 {
        self.table.write().clear() as u64
    }

    /// Expire stale entries, then enforce capacity.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut table = self.table.write();
        let expired = table.remove_expired(now);
        let evicted = table.evict_oldest(self.capacity);
        if expired + evicted > 0 {
            debug!(
                "Fallback sweep removed {} expired and {} excess entries",
                expired, evicted
            );
        }
        expired + evicted
    }

    /// Stored entry count, including not-yet-swept expired entries.
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.table.read().order.values().cloned().collect()
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
