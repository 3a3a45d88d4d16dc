//! Read-through query cache.
//!
//! [`QueryCache::run`] wraps an arbitrary async computation: it serves a
//! cached value on hit, otherwise computes and stores the result. Any failure
//! of the cache itself (unreachable store, timeout, undecodable bytes, failed
//! write) is logged and degrades to computing directly. Only the
//! computation's own error is returned to the caller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Error;
use crate::cache::{CacheStore, TagIndex, bounded};
use crate::config::CacheConfig;
use crate::flight::{self, Flight, InFlight, Join};
use crate::invalidate::CacheInvalidator;
use crate::strategy::{CacheStrategyConfig, StrategyRegistry};

enum Lookup<T> {
    Hit(T),
    Miss,
    Unavailable,
}

/// Read-through cache over a [`CacheStore`].
///
/// Cloning is cheap and clones share the store, the tag index, and the
/// in-flight registry.
#[derive(Debug, Clone)]
pub struct QueryCache {
    store: Arc<dyn CacheStore>,
    index: Arc<dyn TagIndex>,
    registry: Arc<StrategyRegistry>,
    invalidator: CacheInvalidator,
    flights: InFlight,
    enabled: bool,
    coalesce_misses: bool,
    timeout: Duration,
}

impl QueryCache {
    /// Build a cache whose strategies come from `config`.
    pub fn new(store: Arc<dyn CacheStore>, index: Arc<dyn TagIndex>, config: &CacheConfig) -> Self {
        let registry = StrategyRegistry::from_config(config, store.supports_enumeration());
        Self::with_registry(store, index, registry, config)
    }

    /// Build a cache with an explicit registry.
    pub fn with_registry(
        store: Arc<dyn CacheStore>, index: Arc<dyn TagIndex>, registry: StrategyRegistry, config: &CacheConfig,
    ) -> Self {
        let timeout = config.store_timeout();
        Self {
            invalidator: CacheInvalidator::new(store.clone(), index.clone(), timeout),
            store,
            index,
            registry: Arc::new(registry),
            flights: InFlight::new(),
            enabled: config.enabled,
            coalesce_misses: config.coalesce_misses,
            timeout,
        }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn invalidator(&self) -> &CacheInvalidator {
        &self.invalidator
    }

    /// Return the cached value for `key`, or compute, cache, and return it.
    ///
    /// 1. Resolve `strategy` (unknown names use the default strategy).
    /// 2. If the cache is disabled or the store is unavailable, compute
    ///    directly without reading or writing.
    /// 3. On hit, return the decoded value without computing.
    /// 4. On miss, compute; if that succeeds, write the result with the
    ///    strategy's TTL and tags. A failed write is logged and ignored.
    ///
    /// With miss coalescing on, concurrent misses on one key share a single
    /// computation. A follower whose leader fails or is cancelled computes on
    /// its own.
    ///
    /// # Errors
    ///
    /// Only errors returned by `compute`, unchanged.
    pub async fn run<T, E, F, Fut>(&self, key: &str, strategy: &str, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let strategy = self.registry.resolve(strategy);

        if !self.enabled {
            return compute().await;
        }

        if !self.store_available().await {
            tracing::debug!(key, "cache store unavailable; computing directly");
            return compute().await;
        }

        match self.read::<T>(key).await {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Unavailable => return compute().await,
            Lookup::Miss => {}
        }

        if !self.coalesce_misses {
            return self.compute_and_store(key, strategy, compute).await;
        }

        match self.flights.join(key) {
            Join::Leader(guard) => match compute().await {
                Ok(value) => {
                    let encoded = encode(key, &value);
                    self.write(key, strategy, &encoded).await;
                    guard.complete(encoded);
                    Ok(value)
                }
                Err(e) => {
                    guard.complete(None);
                    Err(e)
                }
            },
            Join::Follower(rx) => {
                if let Some(bytes) = flight::wait(rx).await
                    && let Some(value) = decode(key, &bytes)
                {
                    tracing::debug!(key, "cache miss coalesced with in-flight computation");
                    return Ok(value);
                }
                self.compute_and_store(key, strategy, compute).await
            }
        }
    }

    /// Delete `key` so the next `run` recomputes.
    pub async fn invalidate(&self, key: &str) -> Result<usize, Error> {
        self.invalidator.invalidate_key(key).await
    }

    /// Invalidate `key` with the mode of the named strategy.
    pub async fn invalidate_with_strategy(&self, key: &str, strategy: &str) -> Result<usize, Error> {
        self.invalidator.invalidate(key, self.registry.resolve(strategy)).await
    }

    /// Delete every entry written under `tag`.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<usize, Error> {
        self.invalidator.invalidate_by_tag(tag).await
    }

    async fn store_available(&self) -> bool {
        tokio::time::timeout(self.timeout, self.store.is_available())
            .await
            .unwrap_or(false)
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        match bounded(self.timeout, "get", self.store.get(key)).await {
            Ok(Some(bytes)) => match decode(key, &bytes) {
                Some(value) => {
                    tracing::debug!(key, "cache hit");
                    Lookup::Hit(value)
                }
                None => Lookup::Miss,
            },
            Ok(None) => {
                tracing::debug!(key, "cache miss");
                Lookup::Miss
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed; computing directly");
                Lookup::Unavailable
            }
        }
    }

    async fn compute_and_store<T, E, F, Fut>(
        &self, key: &str, strategy: &CacheStrategyConfig, compute: F,
    ) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = compute().await?;
        self.write(key, strategy, &encode(key, &value)).await;
        Ok(value)
    }

    /// The entry is written before its tags are registered. A tag sweep that
    /// runs in between misses the new entry, which then gains its tags; it can
    /// never leave a live entry without them. A failed registration removes
    /// the entry again. Registration always runs, so a rewrite under an
    /// untagged strategy drops tags left by earlier writes.
    async fn write(&self, key: &str, strategy: &CacheStrategyConfig, encoded: &Flight) {
        let Some(bytes) = encoded else {
            return;
        };

        if let Err(e) = bounded(self.timeout, "set", self.store.set(key, bytes.to_vec(), strategy.ttl_seconds)).await {
            tracing::warn!(key, error = %e, "failed to write cache entry");
            return;
        }

        if let Err(e) = bounded(self.timeout, "register", self.index.register(key, &strategy.tag_list())).await {
            tracing::warn!(key, error = %e, "failed to register cache tags; removing entry");
            if let Err(e) = bounded(self.timeout, "delete", self.store.delete(key)).await {
                tracing::warn!(key, error = %e, "failed to remove untagged cache entry");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> &InFlight {
        &self.flights
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> Flight {
    match serde_json::to_vec(value) {
        Ok(bytes) => Some(Arc::from(bytes)),
        Err(e) => {
            tracing::warn!(key, error = %Error::from(e), "cannot encode value for cache");
            None
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(key, error = %Error::from(e), "cannot decode cached value; treating as miss");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheDb, MemoryStore, MemoryTagIndex};
    use crate::clock::ManualClock;
    use crate::config::StrategySpec;
    use crate::strategy::InvalidationMode;
    use chrono::Duration as ChronoDuration;
    use serde::Deserialize;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Metrics {
        open_conversations: u32,
        won_deals: u32,
    }

    fn metrics() -> Metrics {
        Metrics { open_conversations: 12, won_deals: 3 }
    }

    fn config() -> CacheConfig {
        CacheConfig::default().with_strategy(
            "dashboard_metrics",
            StrategySpec {
                ttl_seconds: 300,
                tags: vec!["dashboard".into()],
                invalidation_mode: InvalidationMode::Tag,
            },
        )
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        index: Arc<MemoryTagIndex>,
        clock: ManualClock,
        cache: QueryCache,
    }

    fn fixture(config: &CacheConfig) -> Fixture {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let index = Arc::new(MemoryTagIndex::new());
        let cache = QueryCache::new(store.clone(), index.clone(), config);
        Fixture { store, index, clock, cache }
    }

    async fn counted(calls: &AtomicUsize) -> Result<Metrics, Infallible> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(metrics())
    }

    async fn slow_counted(calls: &AtomicUsize) -> Result<Metrics, Infallible> {
        calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(metrics())
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_is_served_from_cache() {
        let f = fixture(&config());
        let calls = AtomicUsize::new(0);

        let first = f.cache.run("metrics:companyA", "dashboard_metrics", || counted(&calls)).await.unwrap();
        f.clock.advance(ChronoDuration::seconds(1));
        let second = f.cache.run("metrics:companyA", "dashboard_metrics", || counted(&calls)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_recomputes_after_ttl() {
        let f = fixture(&config());
        let calls = AtomicUsize::new(0);

        f.cache.run("metrics:companyA", "dashboard_metrics", || counted(&calls)).await.unwrap();
        f.clock.advance(ChronoDuration::seconds(301));
        f.cache.run("metrics:companyA", "dashboard_metrics", || counted(&calls)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_computes_once_without_writing() {
        let f = fixture(&config());
        f.store.set_available(false);
        let calls = AtomicUsize::new(0);

        let value = f.cache.run("metrics:companyA", "dashboard_metrics", || counted(&calls)).await.unwrap();

        assert_eq!(value, metrics());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_computes() {
        let f = fixture(&CacheConfig { enabled: false, ..config() });
        let calls = AtomicUsize::new(0);

        f.cache.run("k", "dashboard_metrics", || counted(&calls)).await.unwrap();
        f.cache.run("k", "dashboard_metrics", || counted(&calls)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_compute_error_propagates_and_is_not_cached() {
        let f = fixture(&config());

        let result: Result<Metrics, &str> = f.cache.run("k", "dashboard_metrics", || async { Err("backend down") }).await;
        assert_eq!(result.unwrap_err(), "backend down");
        assert!(f.store.is_empty().await);

        let calls = AtomicUsize::new(0);
        f.cache.run("k", "dashboard_metrics", || counted(&calls)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(f.cache.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_strategy_uses_default_ttl() {
        let f = fixture(&config());
        let calls = AtomicUsize::new(0);

        f.cache.run("k", "never_configured", || counted(&calls)).await.unwrap();
        f.clock.advance(ChronoDuration::seconds(299));
        f.cache.run("k", "never_configured", || counted(&calls)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        f.clock.advance(ChronoDuration::seconds(2));
        f.cache.run("k", "never_configured", || counted(&calls)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let f = fixture(&config());
        let calls = AtomicUsize::new(0);

        f.cache.run("k", "dashboard_metrics", || counted(&calls)).await.unwrap();
        f.cache.invalidate("k").await.unwrap();
        f.cache.invalidate("k").await.unwrap();
        f.cache.run("k", "dashboard_metrics", || counted(&calls)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_strategy_tags_drive_tag_invalidation() {
        let f = fixture(&config());
        let calls = AtomicUsize::new(0);

        f.cache.run("metrics:companyA", "dashboard_metrics", || counted(&calls)).await.unwrap();
        f.cache.run("metrics:companyB", "dashboard_metrics", || counted(&calls)).await.unwrap();
        assert_eq!(f.cache.invalidate_by_tag("dashboard").await.unwrap(), 2);

        f.cache.run("metrics:companyA", "dashboard_metrics", || counted(&calls)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss_and_overwritten() {
        let f = fixture(&config());
        f.store.set("k", b"not json".to_vec(), 300).await.unwrap();
        let calls = AtomicUsize::new(0);

        let value = f.cache.run("k", "dashboard_metrics", || counted(&calls)).await.unwrap();
        assert_eq!(value, metrics());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = f.store.get("k").await.unwrap().unwrap();
        assert_eq!(serde_json::from_slice::<Metrics>(&stored).unwrap(), metrics());
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_computation() {
        let f = fixture(&config());
        let calls = AtomicUsize::new(0);

        let (a, b, c) = tokio::join!(
            f.cache.run("k", "dashboard_metrics", || slow_counted(&calls)),
            f.cache.run("k", "dashboard_metrics", || slow_counted(&calls)),
            f.cache.run("k", "dashboard_metrics", || slow_counted(&calls)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap(), metrics());
        assert_eq!(b.unwrap(), metrics());
        assert_eq!(c.unwrap(), metrics());
        assert!(f.cache.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_without_coalescing_each_miss_computes() {
        let f = fixture(&CacheConfig { coalesce_misses: false, ..config() });
        let calls = AtomicUsize::new(0);

        let (a, b) = tokio::join!(
            f.cache.run("k", "dashboard_metrics", || slow_counted(&calls)),
            f.cache.run("k", "dashboard_metrics", || slow_counted(&calls)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(a.unwrap(), b.unwrap());
    }

    #[tokio::test]
    async fn test_follower_computes_when_leader_fails() {
        let f = fixture(&config());

        let leader = f.cache.run("k", "dashboard_metrics", || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err::<Metrics, &str>("leader failed")
        });
        let follower = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            f.cache.run("k", "dashboard_metrics", || async { Ok::<_, &str>(metrics()) }).await
        };

        let (leader, follower) = tokio::join!(leader, follower);
        assert_eq!(leader.unwrap_err(), "leader failed");
        assert_eq!(follower.unwrap(), metrics());
        assert!(f.store.get("k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancelled_computation_is_not_cached() {
        let f = fixture(&config());

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            f.cache.run("k", "dashboard_metrics", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, Infallible>(metrics())
            }),
        )
        .await;

        assert!(cancelled.is_err());
        assert!(f.store.is_empty().await);
        assert!(f.cache.in_flight().is_empty());
    }

    #[derive(Debug)]
    struct RejectingStore;

    #[async_trait::async_trait]
    impl CacheStore for RejectingStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, Error> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl_seconds: u64) -> Result<(), Error> {
            Err(Error::StoreUnavailable("read-only replica".into()))
        }

        async fn delete(&self, _key: &str) -> Result<bool, Error> {
            Ok(false)
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let cache = QueryCache::new(Arc::new(RejectingStore), Arc::new(MemoryTagIndex::new()), &config());
        let calls = AtomicUsize::new(0);

        let value = cache.run("k", "dashboard_metrics", || counted(&calls)).await.unwrap();
        assert_eq!(value, metrics());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug)]
    struct SlowStore;

    #[async_trait::async_trait]
    impl CacheStore for SlowStore {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, Error> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl_seconds: u64) -> Result<(), Error> {
            panic!("a timed-out read must not be followed by a write");
        }

        async fn delete(&self, _key: &str) -> Result<bool, Error> {
            Ok(false)
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_store_timeout_degrades_to_direct_compute() {
        let config = CacheConfig { store_timeout_ms: 20, ..config() };
        let cache = QueryCache::new(Arc::new(SlowStore), Arc::new(MemoryTagIndex::new()), &config);
        let calls = AtomicUsize::new(0);

        let value = cache.run("k", "dashboard_metrics", || counted(&calls)).await.unwrap();
        assert_eq!(value, metrics());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sqlite_backed_read_through() {
        let db = Arc::new(CacheDb::open_in_memory().await.unwrap());
        let cache = QueryCache::new(db.clone(), db.clone(), &config());
        let calls = AtomicUsize::new(0);

        cache.run("metrics:companyA", "dashboard_metrics", || counted(&calls)).await.unwrap();
        cache.run("metrics:companyA", "dashboard_metrics", || counted(&calls)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(db.keys_for_tag("dashboard").await.unwrap(), vec!["metrics:companyA".to_string()]);
        cache.invalidate_with_strategy("metrics:companyA", "dashboard_metrics").await.unwrap();
        assert!(db.get("metrics:companyA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_ttl_is_not_cached_and_does_not_panic() {
        let config = CacheConfig::default().with_strategy(
            "long",
            StrategySpec { ttl_seconds: 10_u64.pow(16), tags: vec![], invalidation_mode: InvalidationMode::Exact },
        );
        let f = fixture(&config);
        let calls = AtomicUsize::new(0);

        let value = f.cache.run("k", "long", || counted(&calls)).await.unwrap();
        assert_eq!(value, metrics());
        assert!(f.store.is_empty().await);
    }

    #[tokio::test]
    async fn test_untagged_rewrite_drops_old_tags() {
        let config = config().with_strategy(
            "plain",
            StrategySpec { ttl_seconds: 60, tags: vec![], invalidation_mode: InvalidationMode::Exact },
        );
        let f = fixture(&config);
        let calls = AtomicUsize::new(0);

        f.cache.run("k", "dashboard_metrics", || counted(&calls)).await.unwrap();
        f.clock.advance(ChronoDuration::seconds(301));
        f.cache.run("k", "plain", || counted(&calls)).await.unwrap();

        assert!(f.index.tags_for_key("k").await.is_empty());
        assert_eq!(f.cache.invalidate_by_tag("dashboard").await.unwrap(), 0);
        assert!(f.store.get("k").await.unwrap().is_some());
    }

    /// Delegates to a [`MemoryStore`] but takes 60ms to write.
    #[derive(Debug, Default)]
    struct SlowWriteStore {
        inner: MemoryStore,
    }

    #[async_trait::async_trait]
    impl CacheStore for SlowWriteStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl_seconds: u64) -> Result<(), Error> {
            tokio::time::sleep(Duration::from_millis(60)).await;
            self.inner.set(key, value, ttl_seconds).await
        }

        async fn delete(&self, key: &str) -> Result<bool, Error> {
            self.inner.delete(key).await
        }

        async fn is_available(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_tag_sweep_during_write_keeps_entry_tagged() {
        let store = Arc::new(SlowWriteStore::default());
        let index = Arc::new(MemoryTagIndex::new());
        let cache = QueryCache::new(store.clone(), index.clone(), &config());
        let calls = AtomicUsize::new(0);

        let write = cache.run("metrics:companyA", "dashboard_metrics", || counted(&calls));
        let sweep = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cache.invalidate_by_tag("dashboard").await
        };
        let (value, swept) = tokio::join!(write, sweep);
        assert_eq!(value.unwrap(), metrics());
        assert_eq!(swept.unwrap(), 0);

        assert!(store.get("metrics:companyA").await.unwrap().is_some());
        assert_eq!(index.keys_for_tag("dashboard").await.unwrap(), vec!["metrics:companyA".to_string()]);

        assert_eq!(cache.invalidate_by_tag("dashboard").await.unwrap(), 1);
        assert!(store.get("metrics:companyA").await.unwrap().is_none());
    }

    #[derive(Debug)]
    struct BrokenIndex;

    #[async_trait::async_trait]
    impl TagIndex for BrokenIndex {
        async fn register(&self, _key: &str, _tags: &[String]) -> Result<(), Error> {
            Err(Error::StoreUnavailable("tag index offline".into()))
        }

        async fn deregister(&self, _key: &str) -> Result<(), Error> {
            Ok(())
        }

        async fn keys_for_tag(&self, _tag: &str) -> Result<Vec<String>, Error> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failed_tag_registration_removes_entry() {
        let store = Arc::new(MemoryStore::new());
        let cache = QueryCache::new(store.clone(), Arc::new(BrokenIndex), &config());
        let calls = AtomicUsize::new(0);

        let value = cache.run("k", "dashboard_metrics", || counted(&calls)).await.unwrap();
        assert_eq!(value, metrics());
        assert!(store.is_empty().await);
    }
}
