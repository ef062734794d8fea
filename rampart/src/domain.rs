use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::{Error, Result};
use std::fmt::Debug;

/// A persisted record family that rampart can cache.
///
/// `FAMILY` namespaces every cache key the family owns, so two families never
/// collide inside one cache engine.
pub trait Entity: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    const FAMILY: &'static str;

    /// Whether an update may move the entity to another parent.
    const REPARENTABLE: bool = true;

    /// `None` until the store has assigned an id.
    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    /// Owner whose "latest items" list this entity belongs to.
    fn parent_id(&self) -> Option<i64> {
        None
    }

    /// Secondary unique lookup key, if the family has one.
    fn natural_key(&self) -> Option<String> {
        None
    }

    fn require_id(&self) -> Result<i64> {
        self.id().ok_or_else(|| {
            Error::InvalidEntity(format!("{} entity has no identifier", Self::FAMILY))
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goods {
    pub id: Option<i64>,
    pub store_id: i64,
    pub name: String,
    pub stock: i32,
    pub price_cents: i64,
}

impl Goods {
    pub fn new(store_id: i64, name: impl Into<String>, stock: i32, price_cents: i64) -> Self {
        Self {
            id: None,
            store_id,
            name: name.into(),
            stock,
            price_cents,
        }
    }
}

impl Entity for Goods {
    const FAMILY: &'static str = "goods";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn parent_id(&self) -> Option<i64> {
        Some(self.store_id)
    }

    fn natural_key(&self) -> Option<String> {
        Some(Self::store_name_key(self.store_id, &self.name))
    }
}

impl Goods {
    /// Natural key of a goods item: its name is unique within a store.
    pub fn store_name_key(store_id: i64, name: &str) -> String {
        format!("{}:{}", store_id, name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    pub account: String,
}

impl User {
    pub fn new(name: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            account: account.into(),
        }
    }
}

impl Entity for User {
    const FAMILY: &'static str = "user";

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn natural_key(&self) -> Option<String> {
        Some(self.account.clone())
    }
}

/// A short post authored by a user; the author never changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Option<i64>,
    pub user_id: i64,
    pub content: String,
}

impl Post {
    pub fn new(user_id: i64, content: impl Into<String>) -> Self {
        Self {
            id: None,
            user_id,
            content: content.into(),
        }
    }
}

impl Entity for Post {
    const FAMILY: &'static str = "post";
    const REPARENTABLE: bool = false;

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn parent_id(&self) -> Option<i64> {
        Some(self.user_id)
    }
}

/// Stored form of a point cache entry.
///
/// `MissCached` is a confirmed absence: it answers "not found" without
/// reaching the store again until it expires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "presence", rename_all = "snake_case")]
pub enum CacheEntry<T> {
    Hit { value: T },
    MissCached,
}

impl<T> CacheEntry<T> {
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => CacheEntry::Hit { value },
            None => CacheEntry::MissCached,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            CacheEntry::Hit { value } => Some(value),
            CacheEntry::MissCached => None,
        }
    }
}

/// Score of an id inside a parent's list index; newer ids rank higher.
pub fn rank_of(id: i64) -> f64 {
    id as f64
}

/// One member of a sorted index together with its score.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredMember {
    pub member: i64,
    pub score: f64,
}

impl ScoredMember {
    pub fn new(member: i64, score: f64) -> Self {
        Self { member, score }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    pub fn new(offset: usize, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(Error::InvalidPage("limit must be positive".to_string()));
        }
        Ok(Self { offset, limit })
    }

    /// Build from a 1-based page number and a page size.
    pub fn from_page(page: usize, size: usize) -> Result<Self> {
        if page == 0 {
            return Err(Error::InvalidPage("page numbers start at 1".to_string()));
        }
        let offset = (page - 1)
            .checked_mul(size)
            .ok_or_else(|| Error::InvalidPage(format!("page {} overflows", page)))?;
        Self::new(offset, size)
    }

    /// Exclusive end index of the window.
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.limit)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
}

impl<T> Page<T> {
    pub fn empty(request: PageRequest) -> Self {
        Self {
            records: Vec::new(),
            total: 0,
            offset: request.offset,
            limit: request.limit,
        }
    }
}
