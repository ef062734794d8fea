pub mod memory_store;
pub mod sled_store;

pub use memory_store::MemoryEntityStore;
pub use sled_store::SledEntityStore;
