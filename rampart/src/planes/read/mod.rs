pub mod list;
pub mod point;

pub use list::ListCache;
pub use point::{CacheAsideStore, CachedLoader, HitStats};
