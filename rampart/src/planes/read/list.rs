use crate::domain::{CacheEntry, Entity, PageRequest, ScoredMember, rank_of};
use crate::keys::KeySpace;
use crate::planes::read::point::{decode_entry, load_failure};
use crate::ports::{CacheEngine, EntityStore};
use crate::protection::{SingleFlight, TtlJitter};
use bytes::Bytes;
use shared::{CachePolicy, Result};
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// "Latest items of a parent" cache.
///
/// Each parent gets a sorted index of at most `window` member ids, newest
/// first. Members themselves are served from the point cache, so the index
/// only ever holds ids. A parent the store reports as empty gets a
/// short-lived marker so repeated reads of it stop reaching the store.
pub struct ListCache<E: Entity> {
    engine: Arc<dyn CacheEngine>,
    store: Arc<dyn EntityStore<E>>,
    jitter: TtlJitter,
    empty_jitter: TtlJitter,
    keys: KeySpace,
    window: usize,
    flights: SingleFlight<Vec<i64>>,
}

impl<E: Entity> ListCache<E> {
    pub fn new(
        engine: Arc<dyn CacheEngine>,
        store: Arc<dyn EntityStore<E>>,
        jitter: TtlJitter,
        window: usize,
    ) -> Self {
        Self {
            engine,
            store,
            jitter,
            empty_jitter: empty_marker_jitter(CachePolicy::DEFAULT_EMPTY_LIST_TTL),
            keys: KeySpace::of::<E>(),
            window: window.max(1),
            flights: SingleFlight::new(),
        }
    }

    /// How long an empty parent is remembered before the store is asked again.
    pub fn with_empty_list_ttl(mut self, ttl: Duration) -> Self {
        self.empty_jitter = empty_marker_jitter(ttl);
        self
    }

    /// Max members kept per parent.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Members in `[offset, offset + limit)` of the parent's newest-first list.
    ///
    /// Windows reaching past the cached range go straight to the store.
    /// Point misses are filled through `load_by_id`, which should be the
    /// guarded, single-flighted point lookup.
    pub async fn get_latest<F, Fut>(
        &self,
        parent_id: i64,
        request: PageRequest,
        load_by_id: F,
    ) -> Result<Vec<E>>
    where
        F: Fn(i64) -> Fut,
        Fut: Future<Output = Result<Option<E>>>,
    {
        if request.end() > self.window {
            debug!(
                "Window {}..{} of parent {} exceeds cached {} items, querying store",
                request.offset,
                request.end(),
                parent_id,
                self.window
            );
            return self
                .store
                .find_page_by_parent(parent_id, request.offset, request.limit)
                .await
                .map_err(load_failure);
        }

        let ids: Vec<i64> = self
            .member_ids(parent_id)
            .await?
            .into_iter()
            .skip(request.offset)
            .take(request.limit)
            .collect();
        self.fetch_members(&ids, load_by_id).await
    }

    /// The parent's cached index, newest first, building it on first use.
    pub async fn member_ids(&self, parent_id: i64) -> Result<Vec<i64>> {
        let key = self.keys.list(parent_id);
        let cached = self.engine.zrevrange(&key, 0, None).await?;
        if !cached.is_empty() {
            return Ok(cached);
        }
        if self.known_empty(parent_id).await? {
            debug!("Parent {} is cached as empty", parent_id);
            return Ok(Vec::new());
        }
        self.flights
            .execute(&key, || self.load_index(parent_id, &key))
            .await
    }

    /// Resolve ids to members in the given order, skipping vanished ones.
    pub async fn fetch_members<F, Fut>(&self, ids: &[i64], load_by_id: F) -> Result<Vec<E>>
    where
        F: Fn(i64) -> Fut,
        Fut: Future<Output = Result<Option<E>>>,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let point_keys: Vec<String> = ids.iter().map(|&id| self.keys.point(id)).collect();
        let slots = self.engine.multi_get(&point_keys).await?;

        let mut resolved: Vec<Option<E>> = Vec::with_capacity(ids.len());
        let mut misses = Vec::new();
        for (position, (key, slot)) in point_keys.iter().zip(slots).enumerate() {
            match slot.and_then(|bytes| decode_entry::<E>(key, &bytes)) {
                Some(CacheEntry::Hit { value }) => resolved.push(Some(value)),
                Some(CacheEntry::MissCached) => resolved.push(None),
                None => {
                    resolved.push(None);
                    misses.push(position);
                }
            }
        }

        if !misses.is_empty() {
            debug!("Filling {} of {} list members from point lookups", misses.len(), ids.len());
            let loaded =
                futures::future::try_join_all(misses.iter().map(|&position| load_by_id(ids[position])))
                    .await?;
            for (position, member) in misses.into_iter().zip(loaded) {
                resolved[position] = member;
            }
        }

        Ok(resolved.into_iter().flatten().collect())
    }

    /// Append a newly created member, trimming the index back to `window`.
    ///
    /// An index that was never built is seeded from the store first, so the
    /// new member does not end up as the parent's only cached item.
    pub async fn on_create(&self, entity: &E) -> Result<()> {
        let (Some(parent_id), Some(id)) = (entity.parent_id(), entity.id()) else {
            return Ok(());
        };
        let key = self.keys.list(parent_id);

        if self.engine.zcard(&key).await? == 0 {
            self.member_ids(parent_id).await?;
        }

        self.engine
            .zadd(&key, &[ScoredMember::new(id, rank_of(id))])
            .await?;
        self.engine.expire(&key, self.jitter.next_ttl()).await?;

        let size = self.engine.zcard(&key).await?;
        if size > self.window {
            let evicted = self.engine.zpopmin(&key, size - self.window).await?;
            debug!(
                "Evicted {} oldest members from '{}' to keep {}",
                evicted.len(),
                key,
                self.window
            );
        }
        Ok(())
    }

    async fn load_index(&self, parent_id: i64, key: &str) -> Result<Vec<i64>> {
        let cached = self.engine.zrevrange(key, 0, None).await?;
        if !cached.is_empty() || self.known_empty(parent_id).await? {
            return Ok(cached);
        }

        let ids = self
            .store
            .find_ids_by_parent(parent_id, self.window)
            .await
            .map_err(load_failure)?;
        if ids.is_empty() {
            self.mark_empty(parent_id).await;
            return Ok(ids);
        }

        let members: Vec<ScoredMember> = ids
            .iter()
            .map(|&id| ScoredMember::new(id, rank_of(id)))
            .collect();
        let written = match self.engine.zadd(key, &members).await {
            Ok(_) => self.engine.expire(key, self.jitter.next_ttl()).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!("Failed to cache list index '{}': {}", key, e);
        } else {
            debug!("Built list index '{}' with {} members", key, ids.len());
        }
        Ok(ids)
    }
}

impl<E: Entity> ListCache<E> {
    async fn known_empty(&self, parent_id: i64) -> Result<bool> {
        Ok(self
            .engine
            .get(&self.keys.empty_list(parent_id))
            .await?
            .is_some())
    }

    /// Best effort, like the index write itself.
    async fn mark_empty(&self, parent_id: i64) {
        let key = self.keys.empty_list(parent_id);
        let ttl = self.empty_jitter.next_ttl();
        match self.engine.set(&key, Bytes::from_static(b"0"), Some(ttl)).await {
            Ok(()) => debug!("Marked parent {} empty for {:?}", parent_id, ttl),
            Err(e) => warn!("Failed to mark '{}' empty: {}", key, e),
        }
    }
}

fn empty_marker_jitter(ttl: Duration) -> TtlJitter {
    TtlJitter::new(ttl, ttl / 4)
}

impl<E: Entity> Debug for ListCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListCache")
            .field("family", &self.keys.family())
            .field("window", &self.window)
            .finish()
    }
}
