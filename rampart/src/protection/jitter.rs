use rand::Rng;
use shared::CachePolicy;
use std::time::Duration;

/// Spreads expiry so entries written together do not expire together.
///
/// Call `compute_ttl` once per entry; sharing one result across a batch
/// defeats the point.
#[derive(Clone, Copy, Debug)]
pub struct TtlJitter {
    base_ttl: Duration,
    jitter_window: Duration,
}

impl TtlJitter {
    pub fn new(base_ttl: Duration, jitter_window: Duration) -> Self {
        Self {
            base_ttl,
            jitter_window,
        }
    }

    pub fn from_policy(policy: &CachePolicy) -> Self {
        Self::new(policy.base_ttl, policy.jitter_window)
    }

    /// `base + uniform(0, jitter_window)`, at millisecond resolution.
    pub fn compute_ttl(&self, base: Duration) -> Duration {
        let window_ms = u64::try_from(self.jitter_window.as_millis()).unwrap_or(u64::MAX);
        if window_ms == 0 {
            return base;
        }
        let offset = rand::rng().random_range(0..=window_ms);
        base.saturating_add(Duration::from_millis(offset))
    }

    /// Jittered TTL for a fresh entry under the configured base.
    pub fn next_ttl(&self) -> Duration {
        self.compute_ttl(self.base_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ttl_stays_within_window() {
        let jitter = TtlJitter::new(Duration::from_secs(60), Duration::from_secs(10));
        for _ in 0..500 {
            let ttl = jitter.next_ttl();
            assert!(ttl >= Duration::from_secs(60));
            assert!(ttl <= Duration::from_secs(70));
        }
    }

    #[test]
    fn test_entries_diverge() {
        let jitter = TtlJitter::new(Duration::from_secs(60), Duration::from_secs(60));
        let distinct: HashSet<Duration> = (0..50).map(|_| jitter.next_ttl()).collect();
        assert!(distinct.len() >= 2);
    }

    #[test]
    fn test_zero_window_returns_base() {
        let jitter = TtlJitter::new(Duration::from_secs(5), Duration::ZERO);
        assert_eq!(jitter.next_ttl(), Duration::from_secs(5));
        assert_eq!(
            jitter.compute_ttl(Duration::from_secs(9)),
            Duration::from_secs(9)
        );
    }

    #[test]
    fn test_from_policy() {
        let policy = CachePolicy {
            base_ttl: Duration::from_secs(1),
            jitter_window: Duration::ZERO,
            ..CachePolicy::default()
        };
        assert_eq!(
            TtlJitter::from_policy(&policy).next_ttl(),
            Duration::from_secs(1)
        );
    }
}
