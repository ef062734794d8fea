// shared/src/lib.rs

/// Failure kinds surfaced by every rampart layer.
///
/// Legitimate absence is never an error: lookups return `Ok(None)` for it.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("illegal identifier {id}: allowed bound is {bound}")]
    IllegalIdentifier { id: i64, bound: i64 },
    #[error("load failure: {0}")]
    LoadFailure(String),
    #[error("invalidation failure: {0}")]
    InvalidationFailure(String),
    #[error("store: {0}")]
    Store(String),
    #[error("serialization: {0}")]
    Serialization(String),
    #[error("wrong type for key: {0}")]
    WrongType(String),
    #[error("invalid page request: {0}")]
    InvalidPage(String),
    #[error("invalid sort: {0}")]
    InvalidSort(String),
    #[error("invalid entity: {0}")]
    InvalidEntity(String),
    #[error("entity {id} may not change its parent")]
    ParentChangeForbidden { id: i64 },
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// Transient failures a caller may retry; the rest fail fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LoadFailure(_) | Error::InvalidationFailure(_) | Error::Store(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub mod config;
pub use config::CachePolicy;
