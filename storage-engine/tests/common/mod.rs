#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use rampart::domain::{Entity, ScoredMember};
use rampart::ports::{CacheEngine, EntityStore};
use shared::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use storage_engine::MokaCacheEngine;

/// Store wrapper that counts reads and can slow down point lookups.
pub struct CountingStore<E: Entity> {
    inner: Arc<dyn EntityStore<E>>,
    point_reads: AtomicUsize,
    parent_reads: AtomicUsize,
    delay: Duration,
}

impl<E: Entity> CountingStore<E> {
    pub fn new(inner: impl EntityStore<E>) -> Self {
        Self::with_delay(inner, Duration::ZERO)
    }

    pub fn with_delay(inner: impl EntityStore<E>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            point_reads: AtomicUsize::new(0),
            parent_reads: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn point_reads(&self) -> usize {
        self.point_reads.load(Ordering::SeqCst)
    }

    pub fn parent_reads(&self) -> usize {
        self.parent_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for CountingStore<E> {
    async fn find_by_id(&self, id: i64) -> Result<Option<E>> {
        self.point_reads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.find_by_id(id).await
    }

    async fn find_max_id(&self) -> Result<i64> {
        self.inner.find_max_id().await
    }

    async fn find_ids_by_parent(&self, parent_id: i64, limit: usize) -> Result<Vec<i64>> {
        self.parent_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_ids_by_parent(parent_id, limit).await
    }

    async fn find_page_by_parent(
        &self,
        parent_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<E>> {
        self.parent_reads.fetch_add(1, Ordering::SeqCst);
        self.inner
            .find_page_by_parent(parent_id, offset, limit)
            .await
    }

    async fn find_id_by_natural_key(&self, natural_key: &str) -> Result<Option<i64>> {
        self.inner.find_id_by_natural_key(natural_key).await
    }

    async fn insert(&self, entity: &mut E) -> Result<u64> {
        self.inner.insert(entity).await
    }

    async fn update_by_id(&self, entity: &E) -> Result<u64> {
        self.inner.update_by_id(entity).await
    }

    async fn delete_by_id(&self, id: i64) -> Result<u64> {
        self.inner.delete_by_id(id).await
    }
}

/// Moka engine whose deletes can be switched to fail.
#[derive(Default)]
pub struct FlakyEngine {
    inner: MokaCacheEngine,
    fail_deletes: AtomicBool,
}

impl FlakyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheEngine for FlakyEngine {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.inner.get(key).await
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.inner.multi_get(keys).await
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<usize> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::Store("connection reset".to_string()));
        }
        self.inner.delete(keys).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        self.inner.ttl(key).await
    }

    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize> {
        self.inner.zadd(key, members).await
    }

    async fn zrevrange(&self, key: &str, start: usize, stop: Option<usize>) -> Result<Vec<i64>> {
        self.inner.zrevrange(key, start, stop).await
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        self.inner.zcard(key).await
    }

    async fn zpopmin(&self, key: &str, count: usize) -> Result<Vec<ScoredMember>> {
        self.inner.zpopmin(key, count).await
    }
}

/// Store wrapper whose reads fail with `Error::Store` while switched on.
pub struct FailingStore<E: Entity> {
    inner: Arc<dyn EntityStore<E>>,
    failing: AtomicBool,
}

impl<E: Entity> FailingStore<E> {
    pub fn new(inner: impl EntityStore<E>) -> Self {
        Self {
            inner: Arc::new(inner),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Store("down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl<E: Entity> EntityStore<E> for FailingStore<E> {
    async fn find_by_id(&self, id: i64) -> Result<Option<E>> {
        self.check()?;
        self.inner.find_by_id(id).await
    }

    async fn find_max_id(&self) -> Result<i64> {
        self.check()?;
        self.inner.find_max_id().await
    }

    async fn find_ids_by_parent(&self, parent_id: i64, limit: usize) -> Result<Vec<i64>> {
        self.check()?;
        self.inner.find_ids_by_parent(parent_id, limit).await
    }

    async fn find_page_by_parent(
        &self,
        parent_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<E>> {
        self.check()?;
        self.inner
            .find_page_by_parent(parent_id, offset, limit)
            .await
    }

    async fn find_id_by_natural_key(&self, natural_key: &str) -> Result<Option<i64>> {
        self.check()?;
        self.inner.find_id_by_natural_key(natural_key).await
    }

    async fn insert(&self, entity: &mut E) -> Result<u64> {
        self.inner.insert(entity).await
    }

    async fn update_by_id(&self, entity: &E) -> Result<u64> {
        self.inner.update_by_id(entity).await
    }

    async fn delete_by_id(&self, id: i64) -> Result<u64> {
        self.inner.delete_by_id(id).await
    }
}
