use crate::domain::{Entity, ScoredMember};
use async_trait::async_trait;
use bytes::Bytes;
use shared::Result;
use std::time::Duration;

// Ports are the pluggable collaborators the caching core is built against

/// Port for the key-value cache engine (e.g. Moka, Redis)
///
/// Plain values and sorted sets share one keyspace; using a key with the
/// wrong kind of operation fails with `Error::WrongType`.
#[async_trait]
pub trait CacheEngine: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Positional batch get; the result has one slot per requested key.
    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Remove every listed key, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<usize>;

    /// Reset the TTL of an existing key. Returns false when the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining time to live, `None` for absent or persistent keys.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Add or re-score members, returning how many were new.
    async fn zadd(&self, key: &str, members: &[ScoredMember]) -> Result<usize>;

    /// Members by descending score, from `start` to `stop` inclusive
    /// (`None` runs to the end).
    async fn zrevrange(&self, key: &str, start: usize, stop: Option<usize>) -> Result<Vec<i64>>;

    async fn zcard(&self, key: &str) -> Result<usize>;

    /// Remove and return up to `count` lowest-scored members.
    async fn zpopmin(&self, key: &str, count: usize) -> Result<Vec<ScoredMember>>;
}

/// Port for the persistent store that owns the source of truth
///
/// Mutations report affected rows; zero means the write did not happen.
#[async_trait]
pub trait EntityStore<E: Entity>: Send + Sync + 'static {
    async fn find_by_id(&self, id: i64) -> Result<Option<E>>;

    /// Highest assigned id, 0 when the family is empty.
    async fn find_max_id(&self) -> Result<i64>;

    /// Ids owned by `parent_id`, newest first, at most `limit`.
    async fn find_ids_by_parent(&self, parent_id: i64, limit: usize) -> Result<Vec<i64>>;

    /// Entities owned by `parent_id`, newest first.
    async fn find_page_by_parent(
        &self,
        parent_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<E>>;

    async fn find_id_by_natural_key(&self, natural_key: &str) -> Result<Option<i64>>;

    /// Persist a new entity and assign its id.
    async fn insert(&self, entity: &mut E) -> Result<u64>;

    async fn update_by_id(&self, entity: &E) -> Result<u64>;

    async fn delete_by_id(&self, id: i64) -> Result<u64>;
}
