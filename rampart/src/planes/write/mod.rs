pub mod invalidation;

pub use invalidation::InvalidationBroker;
