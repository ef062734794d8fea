use shared::{Error, Result};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::{debug, info};

/// Process-local upper bound on identifiers worth looking up.
///
/// Ids above `highest known id + safety_margin` are rejected before the cache
/// or the store is touched, so scanning a sparse keyspace cannot fill the
/// cache with negative entries. The margin covers ids created by other
/// processes that this one has not observed yet.
///
/// Until the first `initialize_bound` the guard admits every positive id.
#[derive(Debug)]
pub struct IdBoundGuard {
    max_known_id: AtomicI64,
    safety_margin: i64,
}

impl IdBoundGuard {
    pub fn new(safety_margin: i64) -> Self {
        Self {
            max_known_id: AtomicI64::new(i64::MAX),
            safety_margin: safety_margin.max(0),
        }
    }

    pub fn check_valid(&self, id: i64) -> Result<()> {
        let bound = self.allowed_bound();
        if id < 1 || id > bound {
            debug!("Rejecting identifier {} (allowed bound {})", id, bound);
            return Err(Error::IllegalIdentifier { id, bound });
        }
        Ok(())
    }

    /// Record a freshly created id. Never lowers the bound.
    pub fn update_bound(&self, id: i64) {
        self.max_known_id.fetch_max(id, Ordering::AcqRel);
    }

    /// Seed from the store's true maximum; may lower the bound.
    pub fn initialize_bound(&self, current_max_id: i64) {
        self.max_known_id.store(current_max_id, Ordering::Release);
        info!(
            "Identifier bound set to {} (max id {}, margin {})",
            self.allowed_bound(),
            current_max_id,
            self.safety_margin
        );
    }

    pub fn max_known_id(&self) -> i64 {
        self.max_known_id.load(Ordering::Acquire)
    }

    pub fn safety_margin(&self) -> i64 {
        self.safety_margin
    }

    /// Highest id `check_valid` accepts.
    pub fn allowed_bound(&self) -> i64 {
        self.max_known_id().saturating_add(self.safety_margin)
    }
}
