use std::time::Duration;
use tracing::warn;

/// Tunables consumed by the caching core.
#[derive(Clone, Copy, Debug)]
pub struct CachePolicy {
    /// TTL every entry starts from before jitter is added.
    pub base_ttl: Duration,
    /// Upper bound of the random offset added to `base_ttl`.
    pub jitter_window: Duration,
    /// Slack added to the highest known id before lookups are rejected.
    pub safety_margin: i64,
    /// Max members kept per parent in a list index.
    pub list_window: usize,
    /// How long a parent with no members is remembered as empty.
    pub empty_list_ttl: Duration,
}

impl CachePolicy {
    pub const DEFAULT_BASE_TTL: Duration = Duration::from_secs(30 * 60);
    pub const DEFAULT_JITTER_WINDOW: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_SAFETY_MARGIN: i64 = 1000;
    pub const DEFAULT_LIST_WINDOW: usize = 50;
    pub const DEFAULT_EMPTY_LIST_TTL: Duration = Duration::from_secs(60);

    pub fn with_list_window(mut self, list_window: usize) -> Self {
        self.list_window = list_window;
        self
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            base_ttl: Self::DEFAULT_BASE_TTL,
            jitter_window: Self::DEFAULT_JITTER_WINDOW,
            safety_margin: Self::DEFAULT_SAFETY_MARGIN,
            list_window: Self::DEFAULT_LIST_WINDOW,
            empty_list_ttl: Self::DEFAULT_EMPTY_LIST_TTL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub data_dir: String,
    pub cache: CachePolicy,
    pub max_entries: Option<u64>,
    pub bound_refresh_interval: Duration,
}

impl Config {
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_BOUND_REFRESH_SECS: u64 = 300;

    pub fn from_env() -> Self {
        let base_ttl_secs = env_parse(
            "RAMPART_BASE_TTL_SECS",
            CachePolicy::DEFAULT_BASE_TTL.as_secs(),
        );
        let jitter_secs = env_parse(
            "RAMPART_TTL_JITTER_SECS",
            CachePolicy::DEFAULT_JITTER_WINDOW.as_secs(),
        );
        let list_window = env_parse("RAMPART_LIST_WINDOW", CachePolicy::DEFAULT_LIST_WINDOW);
        let list_window = if list_window == 0 {
            warn!(
                "RAMPART_LIST_WINDOW must be positive, using {}",
                CachePolicy::DEFAULT_LIST_WINDOW
            );
            CachePolicy::DEFAULT_LIST_WINDOW
        } else {
            list_window
        };

        Self {
            data_dir: std::env::var("RAMPART_DATA_DIR")
                .unwrap_or_else(|_| Self::DEFAULT_DATA_DIR.to_string()),
            cache: CachePolicy {
                base_ttl: Duration::from_secs(base_ttl_secs),
                jitter_window: Duration::from_secs(jitter_secs),
                safety_margin: env_parse(
                    "RAMPART_ID_SAFETY_MARGIN",
                    CachePolicy::DEFAULT_SAFETY_MARGIN,
                ),
                list_window,
                empty_list_ttl: Duration::from_secs(env_parse(
                    "RAMPART_EMPTY_LIST_TTL_SECS",
                    CachePolicy::DEFAULT_EMPTY_LIST_TTL.as_secs(),
                )),
            },
            max_entries: std::env::var("RAMPART_CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse::<u64>().ok()),
            bound_refresh_interval: Duration::from_secs(env_parse(
                "RAMPART_BOUND_REFRESH_SECS",
                Self::DEFAULT_BOUND_REFRESH_SECS,
            )),
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{} has unparseable value '{}', using {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = CachePolicy::default();
        assert_eq!(policy.base_ttl, Duration::from_secs(1800));
        assert_eq!(policy.jitter_window, Duration::from_secs(300));
        assert_eq!(policy.safety_margin, 1000);
        assert_eq!(policy.list_window, 50);
        assert_eq!(policy.empty_list_ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_with_list_window() {
        let policy = CachePolicy::default().with_list_window(5);
        assert_eq!(policy.list_window, 5);
        assert_eq!(policy.safety_margin, 1000);
    }

    #[test]
    fn test_env_parse_falls_back_on_missing_variable() {
        assert_eq!(env_parse("RAMPART_TEST_DEFINITELY_UNSET", 42u64), 42);
    }
}
