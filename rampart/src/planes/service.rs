use crate::domain::{Entity, PageRequest};
use crate::planes::read::{CacheAsideStore, HitStats, ListCache};
use crate::planes::write::InvalidationBroker;
use crate::ports::{CacheEngine, EntityStore};
use crate::protection::{IdBoundGuard, TtlJitter};
use shared::{CachePolicy, Error, Result};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Caller-facing API of one entity family
///
/// Reads go through the caches; writes hit the store first and only touch the
/// cache once the store reports the row was affected.
pub struct EntityService<E: Entity> {
    store: Arc<dyn EntityStore<E>>,
    guard: Arc<IdBoundGuard>,
    points: CacheAsideStore<E>,
    lists: ListCache<E>,
    broker: InvalidationBroker<E>,
}

impl<E: Entity> EntityService<E> {
    pub fn new(
        store: Arc<dyn EntityStore<E>>,
        engine: Arc<dyn CacheEngine>,
        policy: &CachePolicy,
    ) -> Self {
        let guard = Arc::new(IdBoundGuard::new(policy.safety_margin));
        Self::with_guard(store, engine, guard, policy)
    }

    /// Build around an existing guard, e.g. one shared with a bound refresher.
    pub fn with_guard(
        store: Arc<dyn EntityStore<E>>,
        engine: Arc<dyn CacheEngine>,
        guard: Arc<IdBoundGuard>,
        policy: &CachePolicy,
    ) -> Self {
        let jitter = TtlJitter::from_policy(policy);
        Self {
            points: CacheAsideStore::new(
                Arc::clone(&engine),
                Arc::clone(&store),
                Arc::clone(&guard),
                jitter,
            ),
            lists: ListCache::new(
                Arc::clone(&engine),
                Arc::clone(&store),
                jitter,
                policy.list_window,
            )
            .with_empty_list_ttl(policy.empty_list_ttl),
            broker: InvalidationBroker::new(engine),
            store,
            guard,
        }
    }

    /// Fails with `IllegalIdentifier` for ids beyond the known bound.
    pub async fn get(&self, id: i64) -> Result<Option<E>> {
        self.points.get(id).await
    }

    pub async fn get_by_natural_key(&self, natural_key: &str) -> Result<Option<E>> {
        match self.points.get_id_by_natural_key(natural_key).await? {
            Some(id) => self.points.get_known(id).await,
            None => Ok(None),
        }
    }

    /// Newest-first members of `parent_id` within the requested window.
    pub async fn get_latest_page(&self, parent_id: i64, request: PageRequest) -> Result<Vec<E>> {
        self.lists
            .get_latest(parent_id, request, |id| self.points.get_known(id))
            .await
    }

    /// Insert and assign an id. Returns false if the store affected no rows.
    pub async fn create(&self, entity: &mut E) -> Result<bool> {
        if self.store.insert(entity).await? == 0 {
            return Ok(false);
        }
        let id = entity.require_id()?;

        self.guard.update_bound(id);
        self.broker.after_create(entity).await;
        if let Err(e) = self.lists.on_create(entity).await {
            warn!(
                "Failed to append {} {} to its list index: {}",
                E::FAMILY,
                id,
                e
            );
            if let Some(parent_id) = entity.parent_id() {
                self.broker.drop_list(parent_id).await;
            }
        }

        debug!("Created {} {}", E::FAMILY, id);
        Ok(true)
    }

    pub async fn update(&self, entity: &E) -> Result<bool> {
        let id = entity.require_id()?;
        self.guard.check_valid(id)?;

        let Some(before) = self.store.find_by_id(id).await? else {
            return Ok(false);
        };
        if !E::REPARENTABLE && before.parent_id() != entity.parent_id() {
            return Err(Error::ParentChangeForbidden { id });
        }
        if self.store.update_by_id(entity).await? == 0 {
            return Ok(false);
        }

        self.broker.after_update(&before, entity).await;
        debug!("Updated {} {}", E::FAMILY, id);
        Ok(true)
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        self.guard.check_valid(id)?;

        let Some(before) = self.store.find_by_id(id).await? else {
            return Ok(false);
        };
        if self.store.delete_by_id(id).await? == 0 {
            return Ok(false);
        }

        self.broker.after_delete(&before).await;
        debug!("Deleted {} {}", E::FAMILY, id);
        Ok(true)
    }

    /// Reseed the id bound from the store's current maximum.
    pub async fn refresh_id_bound(&self) -> Result<i64> {
        let max_id = self.store.find_max_id().await?;
        self.guard.initialize_bound(max_id);
        info!("Refreshed {} id bound from max id {}", E::FAMILY, max_id);
        Ok(max_id)
    }

    pub async fn is_cached(&self, id: i64) -> Result<bool> {
        self.points.is_cached(id).await
    }

    /// Point lookups by id answered from the cache vs. loaded from the store.
    pub fn stats(&self) -> HitStats {
        self.points.stats()
    }

    /// Percentage of id lookups served from the cache, negative hits included.
    pub fn hit_ratio(&self) -> f64 {
        self.stats().hit_ratio()
    }

    pub fn id_bound(&self) -> &Arc<IdBoundGuard> {
        &self.guard
    }

    pub fn store(&self) -> &Arc<dyn EntityStore<E>> {
        &self.store
    }

    pub fn points(&self) -> &CacheAsideStore<E> {
        &self.points
    }

    pub fn lists(&self) -> &ListCache<E> {
        &self.lists
    }
}

impl<E: Entity> Debug for EntityService<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityService")
            .field("family", &E::FAMILY)
            .field("points", &self.points)
            .field("lists", &self.lists)
            .field("stats", &self.stats())
            .finish()
    }
}
