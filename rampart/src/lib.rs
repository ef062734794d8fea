#![deny(clippy::all)]

//! Cache-aside protection for a slow persistent store.
//!
//! Point reads are coalesced per key, identifiers beyond the known id range are
//! rejected before they reach the store, absent records are cached as explicit
//! misses, and every TTL carries random jitter. Recent children of a parent are
//! served from a bounded sorted index kept next to the point entries.

pub mod domain;
pub mod keys;
pub mod persistence;
pub mod planes;
pub mod ports;
pub mod protection;

pub use domain::{CacheEntry, Entity, Goods, Page, PageRequest, Post, User};
pub use keys::KeySpace;
pub use persistence::{MemoryEntityStore, SledEntityStore};
pub use planes::read::HitStats;
pub use planes::{EntityService, GoodsCatalog, GoodsOrdering};
pub use ports::{CacheEngine, EntityStore};
pub use protection::{IdBoundGuard, SingleFlight, TtlJitter};
