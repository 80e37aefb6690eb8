use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::retailers::Retailer;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceResult {
    pub price: f64,
    pub fetched_at: DateTime<Utc>,
}

impl PriceResult {
    pub fn new(price: f64) -> Self {
        Self {
            price,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    result: PriceResult,
    /// `None` when the TTL reaches past what the clock can represent.
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }
}

/// `"<retailer>:<normalized item>"`.
pub fn cache_key(retailer: Retailer, normalized_item: &str) -> String {
    format!("{}:{}", retailer.id(), normalized_item)
}

/// In-memory price cache. Keys are opaque strings; every entry carries its
/// own expiry and is evicted by the first read that finds it stale.
#[derive(Debug, Default)]
pub struct PriceCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<PriceResult> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.result),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write().await;
        // Another writer may have refreshed the entry between the two locks.
        let entry = entries.get(key)?;
        if !entry.is_expired(now) {
            return Some(entry.result);
        }

        entries.remove(key);
        debug!("Evicted stale cache entry {}", key);
        None
    }

    pub async fn put(&self, key: impl Into<String>, result: PriceResult, ttl: Duration) {
        let entry = CacheEntry {
            result,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Drop every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Entries held in memory, stale ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Periodically purge expired entries so keys that are never read again do
/// not stay in memory for the life of the process.
pub fn spawn_sweeper(cache: Arc<PriceCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = cache.purge_expired().await;
            if removed > 0 {
                debug!("Cache sweep removed {} expired entries", removed);
            }
        }
    })
}
