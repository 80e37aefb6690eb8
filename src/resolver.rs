use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;
use tracing::{debug, info, warn};

use crate::cache::{cache_key, PriceCache, PriceResult};
use crate::config::{AppConfig, ExtractionConfig, ResolverConfig};
use crate::extraction::extract;
use crate::render::{RenderPool, SlotHealth};
use crate::retailers::{AdapterRegistry, Retailer, RetailerAdapter};
use crate::utils::error::ResolveError;

type Resolution = BoxFuture<'static, Result<PriceResult, ResolveError>>;

/// In-flight extractions by cache key, tagged with a generation so a stale
/// cleanup never removes a newer entry for the same key.
type InflightMap = HashMap<String, (u64, WeakShared<Resolution>)>;

/// A validated request: a registered retailer and a normalized item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuery {
    pub retailer: Retailer,
    /// Trimmed and lower-cased.
    pub item: String,
}

impl PriceQuery {
    pub fn parse(retailer: &str, item: &str) -> Result<Self, ResolveError> {
        if retailer.trim().is_empty() {
            return Err(ResolveError::InvalidInput("Store is required".to_string()));
        }

        let item = item.trim().to_lowercase();
        if item.is_empty() {
            return Err(ResolveError::InvalidInput("Item is required".to_string()));
        }

        Ok(Self {
            retailer: retailer.parse()?,
            item,
        })
    }

    pub fn cache_key(&self) -> String {
        cache_key(self.retailer, &self.item)
    }
}

/// Knobs the resolver needs from the application configuration.
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub extraction: ExtractionConfig,
    pub resolver: ResolverConfig,
    pub cache_ttl: Duration,
}

impl ResolverSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            extraction: config.extraction.clone(),
            resolver: config.resolver.clone(),
            cache_ttl: config.cache.ttl(),
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Single entry point for price lookups: cache first, then a pooled
/// extraction whose result is written back to the cache.
pub struct PriceResolver {
    registry: Arc<AdapterRegistry>,
    pool: Arc<RenderPool>,
    cache: Arc<PriceCache>,
    settings: Arc<ResolverSettings>,
    inflight: Arc<Mutex<InflightMap>>,
    generation: AtomicU64,
}

impl PriceResolver {
    pub fn new(
        registry: Arc<AdapterRegistry>,
        pool: Arc<RenderPool>,
        cache: Arc<PriceCache>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            registry,
            pool,
            cache,
            settings: Arc::new(settings),
            inflight: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<RenderPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<PriceCache> {
        &self.cache
    }

    pub async fn resolve(&self, retailer: &str, item: &str) -> Result<PriceResult, ResolveError> {
        let result = self.resolve_uncounted(retailer, item).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics::counter!("price_resolutions_total", "outcome" => outcome).increment(1);

        result
    }

    /// Keys with an extraction currently shared between callers.
    pub fn inflight(&self) -> usize {
        self.lock_inflight().len()
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    async fn resolve_uncounted(&self, retailer: &str, item: &str) -> Result<PriceResult, ResolveError> {
        let query = PriceQuery::parse(retailer, item)?;
        let adapter = self.registry.resolve(query.retailer.id())?.clone();
        let key = query.cache_key();

        if let Some(cached) = self.cache.get(&key).await {
            metrics::counter!("price_cache_hits_total").increment(1);
            debug!("Cache hit for {}", key);
            return Ok(cached);
        }
        metrics::counter!("price_cache_misses_total").increment(1);
        debug!("Cache miss for {}", key);

        let fetcher = self.fetcher();
        if !self.settings.resolver.coalesce_inflight {
            return fetcher.fetch(adapter, query).await;
        }

        let resolution = {
            let mut inflight = self.lock_inflight();
            match inflight.get(&key).and_then(|(_, weak)| weak.upgrade()) {
                Some(existing) => {
                    debug!("Joining in-flight extraction for {}", key);
                    existing
                }
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let entry = InflightEntry {
                        map: Arc::clone(&self.inflight),
                        key: key.clone(),
                        generation,
                    };
                    let shared = async move {
                        // Dropped on completion and on cancellation alike.
                        let _entry = entry;
                        fetcher.fetch(adapter, query).await
                    }
                    .boxed()
                    .shared();

                    // Weak handle: once every waiter gives up, the extraction is
                    // dropped and its context released.
                    if let Some(weak) = shared.downgrade() {
                        inflight.insert(key, (generation, weak));
                    }
                    shared
                }
            }
        };

        resolution.await
    }

    fn fetcher(&self) -> Fetcher {
        Fetcher {
            pool: Arc::clone(&self.pool),
            cache: Arc::clone(&self.cache),
            settings: Arc::clone(&self.settings),
        }
    }

    fn lock_inflight(&self) -> MutexGuard<'_, InflightMap> {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes its key from the in-flight map when the extraction owning it
/// finishes or is dropped.
struct InflightEntry {
    map: Arc<Mutex<InflightMap>>,
    key: String,
    generation: u64,
}

impl Drop for InflightEntry {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(PoisonError::into_inner);
        if map.get(&self.key).is_some_and(|(generation, _)| *generation == self.generation) {
            map.remove(&self.key);
        }
    }
}

/// Owned handles for one miss, so the work can outlive the caller that
/// started it when other callers are waiting on it.
#[derive(Clone)]
struct Fetcher {
    pool: Arc<RenderPool>,
    cache: Arc<PriceCache>,
    settings: Arc<ResolverSettings>,
}

impl Fetcher {
    async fn fetch(self, adapter: RetailerAdapter, query: PriceQuery) -> Result<PriceResult, ResolveError> {
        let retries = FixedInterval::from_millis(self.settings.resolver.retry_delay_ms)
            .take(self.settings.resolver.retry_attempts);

        let result = RetryIf::spawn(
            retries,
            || self.attempt(&adapter, &query),
            |e: &ResolveError| e.is_retryable(),
        )
        .await;

        if let Ok(fresh) = &result {
            self.cache
                .put(query.cache_key(), *fresh, self.settings.cache_ttl)
                .await;
            info!("Resolved {} '{}' at {:.2}", query.retailer, query.item, fresh.price);
        }
        result
    }

    async fn attempt(&self, adapter: &RetailerAdapter, query: &PriceQuery) -> Result<PriceResult, ResolveError> {
        let mut lease = self.pool.acquire().await?;

        let outcome = match lease.context_mut() {
            Ok(context) => extract(adapter, &query.item, context, &self.settings.extraction).await,
            Err(e) => Err(e.into()),
        };

        match outcome {
            Ok(extracted) => {
                lease.release(SlotHealth::Healthy).await;
                Ok(PriceResult::new(extracted.price))
            }
            Err(e) => {
                warn!(
                    retailer = %query.retailer,
                    item = %query.item,
                    kind = e.kind(),
                    slot = lease.slot_id(),
                    "Price extraction failed: {}",
                    e
                );
                metrics::counter!("price_extraction_failures_total", "kind" => e.kind()).increment(1);
                lease.release(SlotHealth::Poisoned).await;
                Err(ResolveError::Unavailable(e))
            }
        }
    }
}
