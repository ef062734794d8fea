pub mod catalog;
pub mod read;
pub mod service;
pub mod write;

pub use catalog::{Direction, GoodsCatalog, GoodsOrdering, GoodsSortKey, SortSpec};
pub use service::EntityService;
