use crate::domain::Entity;
use crate::keys::KeySpace;
use crate::ports::CacheEngine;
use shared::Error;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Removes the cache entries a committed write made stale.
///
/// Only keys derivable from the written entity are touched, and nothing is
/// repopulated here; the next read rebuilds lazily. Deletes are best effort:
/// a failure is logged and left for TTL expiry to correct.
pub struct InvalidationBroker<E: Entity> {
    engine: Arc<dyn CacheEngine>,
    keys: KeySpace,
    _family: PhantomData<fn() -> E>,
}

impl<E: Entity> InvalidationBroker<E> {
    pub fn new(engine: Arc<dyn CacheEngine>) -> Self {
        Self {
            engine,
            keys: KeySpace::of::<E>(),
            _family: PhantomData,
        }
    }

    pub async fn after_create(&self, after: &E) {
        self.evict(self.keys_after_create(after)).await;
    }

    pub async fn after_update(&self, before: &E, after: &E) {
        self.evict(self.keys_after_update(before, after)).await;
    }

    pub async fn after_delete(&self, before: &E) {
        self.evict(self.keys_after_delete(before)).await;
    }

    /// Drop a parent's whole list index along with any empty marker.
    pub async fn drop_list(&self, parent_id: i64) {
        self.evict(vec![self.keys.list(parent_id), self.keys.empty_list(parent_id)])
            .await;
    }

    /// The point entry (it may hold a negative result for the new id), the
    /// natural-key entry and the parent's empty marker. The parent index is
    /// appended to, not dropped.
    pub fn keys_after_create(&self, after: &E) -> Vec<String> {
        let mut keys = Vec::with_capacity(3);
        if let Some(id) = after.id() {
            keys.push(self.keys.point(id));
        }
        if let Some(natural) = after.natural_key() {
            keys.push(self.keys.natural(&natural));
        }
        if let Some(parent_id) = after.parent_id() {
            keys.push(self.keys.empty_list(parent_id));
        }
        keys
    }

    /// Point entry plus list index, empty marker and natural key of both
    /// versions.
    pub fn keys_after_update(&self, before: &E, after: &E) -> Vec<String> {
        let mut keys = Vec::with_capacity(7);
        for id in [before.id(), after.id()].into_iter().flatten() {
            keys.push(self.keys.point(id));
        }
        for parent_id in [before.parent_id(), after.parent_id()].into_iter().flatten() {
            keys.push(self.keys.list(parent_id));
            keys.push(self.keys.empty_list(parent_id));
        }
        for natural in [before.natural_key(), after.natural_key()]
            .into_iter()
            .flatten()
        {
            keys.push(self.keys.natural(&natural));
        }
        dedup_in_order(keys)
    }

    /// A delete never turns a parent non-empty, so its marker is left alone.
    pub fn keys_after_delete(&self, before: &E) -> Vec<String> {
        let mut keys = Vec::with_capacity(3);
        if let Some(id) = before.id() {
            keys.push(self.keys.point(id));
        }
        if let Some(parent_id) = before.parent_id() {
            keys.push(self.keys.list(parent_id));
        }
        if let Some(natural) = before.natural_key() {
            keys.push(self.keys.natural(&natural));
        }
        keys
    }

    async fn evict(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        match self.engine.delete(&keys).await {
            Ok(removed) => {
                debug!("Invalidated {} of {} keys: {:?}", removed, keys.len(), keys);
            }
            Err(e) if e.is_retryable() => {
                let failure = Error::InvalidationFailure(e.to_string());
                warn!("{}; keys {:?} will expire via TTL", failure, keys);
            }
            Err(e) => {
                let failure = Error::InvalidationFailure(e.to_string());
                error!("{}; keys {:?} stay stale until TTL", failure, keys);
            }
        }
    }
}

impl<E: Entity> Debug for InvalidationBroker<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationBroker")
            .field("family", &self.keys.family())
            .finish()
    }
}

fn dedup_in_order(keys: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        if !unique.contains(&key) {
            unique.push(key);
        }
    }
    unique
}
