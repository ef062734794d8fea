use crate::domain::{CacheEntry, Entity};
use crate::keys::KeySpace;
use crate::ports::{CacheEngine, EntityStore};
use crate::protection::{IdBoundGuard, SingleFlight, TtlJitter};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use shared::{Error, Result};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Store failures seen while loading are reported as load failures.
pub(crate) fn load_failure(err: Error) -> Error {
    match err {
        Error::Store(msg) => Error::LoadFailure(msg),
        other => other,
    }
}

/// Decode a stored cache entry, treating undecodable bytes as absent.
pub(crate) fn decode_entry<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<CacheEntry<T>> {
    match serde_json::from_slice(bytes) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!("Discarding undecodable cache entry '{}': {}", key, e);
            None
        }
    }
}

/// Snapshot of how often lookups were answered from the cache.
///
/// A cached miss counts as a hit: the store was spared either way.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HitStats {
    pub hits: u64,
    pub misses: u64,
}

impl HitStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Percentage of lookups served from the cache, 0 before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 * 100.0 / total as f64,
        }
    }

    /// Sum of two snapshots, e.g. id and natural-key lookups of one family.
    pub fn merged(self, other: HitStats) -> HitStats {
        HitStats {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
        }
    }
}

#[derive(Debug, Default)]
struct HitCounters {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl HitCounters {
    fn snapshot(&self) -> HitStats {
        HitStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache-aside lookup for one kind of value.
///
/// Layers negative caching and jittered TTLs on top of a single-flighted
/// loader: the first miss for a key loads once, and the result (including
/// "absent") is written back so later callers stop reaching the store.
pub struct CachedLoader<T> {
    engine: Arc<dyn CacheEngine>,
    flights: SingleFlight<Option<T>>,
    jitter: TtlJitter,
    counters: HitCounters,
}

impl<T> CachedLoader<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(engine: Arc<dyn CacheEngine>, jitter: TtlJitter) -> Self {
        Self {
            engine,
            flights: SingleFlight::new(),
            jitter,
            counters: HitCounters::default(),
        }
    }

    pub fn stats(&self) -> HitStats {
        self.counters.snapshot()
    }

    pub async fn get_or_load<F, Fut>(&self, key: &str, load: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        if let Some(entry) = self.read(key).await? {
            debug!("Cache hit for '{}'", key);
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(entry.into_option());
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        self.flights
            .execute(key, || async {
                // A leader that finished just before we claimed may have filled it
                if let Some(entry) = self.read(key).await? {
                    return Ok(entry.into_option());
                }
                debug!("Cache miss for '{}', loading from store", key);
                let loaded = load().await.map_err(load_failure)?;
                self.write(key, &loaded).await;
                Ok(loaded)
            })
            .await
    }

    pub async fn read(&self, key: &str) -> Result<Option<CacheEntry<T>>> {
        Ok(self
            .engine
            .get(key)
            .await?
            .and_then(|bytes| decode_entry(key, &bytes)))
    }

    /// Best effort: a failed write-back only costs a future reload.
    async fn write(&self, key: &str, value: &Option<T>) {
        let entry = CacheEntry::from_option(value.clone());
        let encoded = match serde_json::to_vec(&entry) {
            Ok(encoded) => Bytes::from(encoded),
            Err(e) => {
                warn!("Failed to encode cache entry '{}': {}", key, e);
                return;
            }
        };
        let ttl = self.jitter.next_ttl();
        if let Err(e) = self.engine.set(key, encoded, Some(ttl)).await {
            warn!("Failed to write cache entry '{}': {}", key, e);
        }
    }
}

impl<T> Debug for CachedLoader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedLoader")
            .field("flights", &self.flights)
            .field("jitter", &self.jitter)
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}

/// Point-lookup cache for one entity family.
///
/// Every id is checked against the [`IdBoundGuard`] first; rejected ids never
/// reach the cache or the store and are never cached.
pub struct CacheAsideStore<E: Entity> {
    engine: Arc<dyn CacheEngine>,
    store: Arc<dyn EntityStore<E>>,
    guard: Arc<IdBoundGuard>,
    keys: KeySpace,
    by_id: CachedLoader<E>,
    by_natural_key: CachedLoader<i64>,
}

impl<E: Entity> CacheAsideStore<E> {
    pub fn new(
        engine: Arc<dyn CacheEngine>,
        store: Arc<dyn EntityStore<E>>,
        guard: Arc<IdBoundGuard>,
        jitter: TtlJitter,
    ) -> Self {
        Self {
            by_id: CachedLoader::new(Arc::clone(&engine), jitter),
            by_natural_key: CachedLoader::new(Arc::clone(&engine), jitter),
            engine,
            store,
            guard,
            keys: KeySpace::of::<E>(),
        }
    }

    pub async fn get(&self, id: i64) -> Result<Option<E>> {
        self.guard.check_valid(id)?;
        self.load(id).await
    }

    /// Resolve a natural key to an id, negatively caching unknown keys.
    pub async fn get_id_by_natural_key(&self, natural_key: &str) -> Result<Option<i64>> {
        let key = self.keys.natural(natural_key);
        self.by_natural_key
            .get_or_load(&key, || self.store.find_id_by_natural_key(natural_key))
            .await
    }

    /// Load an id the store itself handed out, widening the bound if needed.
    pub async fn get_known(&self, id: i64) -> Result<Option<E>> {
        self.guard.update_bound(id);
        self.get(id).await
    }

    /// Hit and miss counts of id lookups.
    pub fn stats(&self) -> HitStats {
        self.by_id.stats()
    }

    /// Hit and miss counts of natural-key lookups.
    pub fn natural_key_stats(&self) -> HitStats {
        self.by_natural_key.stats()
    }

    /// Whether a positive or negative entry for `id` is currently cached.
    pub async fn is_cached(&self, id: i64) -> Result<bool> {
        Ok(self.engine.get(&self.keys.point(id)).await?.is_some())
    }

    async fn load(&self, id: i64) -> Result<Option<E>> {
        let key = self.keys.point(id);
        self.by_id
            .get_or_load(&key, || self.store.find_by_id(id))
            .await
    }
}

impl<E: Entity> Debug for CacheAsideStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAsideStore")
            .field("family", &self.keys.family())
            .field("guard", &self.guard)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Goods;

    #[test]
    fn test_store_errors_become_load_failures() {
        assert_eq!(
            load_failure(Error::Store("disk gone".to_string())),
            Error::LoadFailure("disk gone".to_string())
        );
        assert_eq!(
            load_failure(Error::IllegalIdentifier { id: 5, bound: 1 }),
            Error::IllegalIdentifier { id: 5, bound: 1 }
        );
    }

    #[test]
    fn test_hit_ratio() {
        assert_eq!(HitStats::default().hit_ratio(), 0.0);

        let stats = HitStats { hits: 1, misses: 1 };
        assert_eq!(stats.hit_ratio(), 50.0);

        let merged = stats.merged(HitStats { hits: 2, misses: 0 });
        assert_eq!(merged.lookups(), 4);
        assert_eq!(merged.hit_ratio(), 75.0);
    }

    #[test]
    fn test_decode_entry() {
        let miss = decode_entry::<Goods>("goods:id::1", br#"{"presence":"miss_cached"}"#);
        assert_eq!(miss, Some(CacheEntry::MissCached));

        let garbage = decode_entry::<Goods>("goods:id::1", b"not json");
        assert_eq!(garbage, None);
    }
}
