use crate::sorted_set::SortedSet;
use async_trait::async_trait;
use bytes::Bytes;
use moka::Expiry;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use parking_lot::Mutex;
use rampart::domain::ScoredMember;
use rampart::ports::CacheEngine;
use shared::{Error, Result};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
enum Stored {
    Value(Bytes),
    Sorted(Arc<Mutex<SortedSet>>),
}

/// One cache slot: the payload plus the TTL it was written with.
#[derive(Clone, Debug)]
struct Slot {
    data: Stored,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(data: Stored, ttl: Option<Duration>) -> Self {
        Self {
            data,
            ttl,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn sorted(&self, key: &str) -> Result<Arc<Mutex<SortedSet>>> {
        match &self.data {
            Stored::Sorted(set) => Ok(Arc::clone(set)),
            Stored::Value(_) => Err(Error::WrongType(format!(
                "Key '{}' holds a plain value, not a sorted set",
                key
            ))),
        }
    }
}

/// Lets every slot expire after its own TTL instead of a cache-wide one
struct SlotExpiry;

impl Expiry<String, Slot> for SlotExpiry {
    fn expire_after_create(&self, _key: &String, value: &Slot, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Slot,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Moka-based cache engine with per-entry TTL and sorted sets
/// Provides lock-free, concurrent cache with optional size bounds
pub struct MokaCacheEngine {
    cache: Cache<String, Slot>,
}

impl MokaCacheEngine {
    /// Create a new unbounded engine
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Create a new bounded engine holding at most `max_entries` keys
    pub fn new_bounded(max_entries: u64) -> Self {
        Self::build(Some(max_entries))
    }

    /// Create from an optional capacity, as read from configuration
    pub fn with_capacity(max_entries: Option<u64>) -> Self {
        Self::build(max_entries)
    }

    fn build(max_entries: Option<u64>) -> Self {
        let mut builder = Cache::builder().name("rampart").expire_after(SlotExpiry);

        if let Some(capacity) = max_entries {
            builder = builder.max_capacity(capacity);
        }

        Self {
            cache: builder.build(),
        }
    }

    /// Approximate number of live keys.
    pub async fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    async fn sorted_set(&self, key: &str) -> Result<Option<Arc<Mutex<SortedSet>>>> {
        match self.cache.get(key).await {
            Some(slot) => slot.sorted(key).map(Some),
            None => Ok(None),
        }
    }
}

impl Default for MokaCacheEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheEngine for MokaCacheEngine {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        match self.cache.get(key).await {
            Some(Slot {
                data: Stored::Value(bytes),
                ..
            }) => Ok(Some(bytes)),
            Some(_) => Err(Error::WrongType(format!(
                "Key '{}' holds a sorted set, not a plain value",
                key
            ))),
            None => Ok(None), // Either doesn't exist or TTL expired
        }
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.cache
            .insert(key.to_string(), Slot::new(Stored::Value(value), ttl))
            .await;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.cache.remove(key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let result = self
            .cache
            .entry(key.to_string())
            .and_compute_with(|existing| async move {
                match existing {
                    Some(entry) => Op::Put(Slot::new(entry.into_value().data, Some(ttl))),
                    None => Op::Nop,
                }
            })
            .await;
        Ok(matches!(result, CompResult::ReplacedWith(_)))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        Ok(self.cache.get(key).await.and_then(|slot| {
            slot.expires_at
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))
        }))
    }

    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize> {
        let slot = self
            .cache
            .entry(key.to_string())
            .or_insert_with(async { Slot::new(Stored::Sorted(Arc::default()), None) })
            .await
            .into_value();
        let set = slot.sorted(key)?;

        let mut set = set.lock();
        Ok(members
            .iter()
            .filter(|scored| set.add(scored.member, scored.score))
            .count())
    }

    async fn zrevrange(&self, key: &str, start: usize, stop: Option<usize>) -> Result<Vec<i64>> {
        Ok(match self.sorted_set(key).await? {
            Some(set) => set.lock().rev_range(start, stop),
            None => Vec::new(),
        })
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        Ok(match self.sorted_set(key).await? {
            Some(set) => set.lock().len(),
            None => 0,
        })
    }

    async fn zpopmin(&self, key: &str, count: usize) -> Result<Vec<ScoredMember>> {
        let Some(set) = self.sorted_set(key).await? else {
            return Ok(Vec::new());
        };

        let (popped, drained) = {
            let mut guard = set.lock();
            let popped = guard.pop_min(count);
            (popped, guard.is_empty())
        };

        // An emptied set disappears, unless a concurrent zadd refilled it
        if drained {
            self.cache
                .entry(key.to_string())
                .and_compute_with(|existing| async move {
                    match existing {
                        Some(entry) => match &entry.value().data {
                            Stored::Sorted(current)
                                if Arc::ptr_eq(current, &set) && current.lock().is_empty() =>
                            {
                                Op::Remove
                            }
                            _ => Op::Nop,
                        },
                        None => Op::Nop,
                    }
                })
                .await;
        }
        Ok(popped)
    }
}

impl Debug for MokaCacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCacheEngine")
            .field("entry_count", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}
