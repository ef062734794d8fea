pub mod bound;
pub mod flight;
pub mod jitter;

pub use bound::IdBoundGuard;
pub use flight::SingleFlight;
pub use jitter::TtlJitter;
