pub mod moka_engine;
pub mod sorted_set;

pub use moka_engine::MokaCacheEngine;
pub use sorted_set::SortedSet;
