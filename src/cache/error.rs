use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the response cache.
///
/// None of these ever reach the client: a failed lookup degrades to a miss
/// and a failed persist leaves the live response untouched.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cached response is not decodable: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid cache configuration: {0}")]
    Config(#[source] serde_json::Error),
}

impl CacheError {
    /// Whether this is the ordinary "nothing cached yet" outcome.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_miss())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_misses_are_misses() {
        assert!(CacheError::from(StoreError::CacheMiss).is_miss());
        assert!(!CacheError::from(StoreError::NotStored).is_miss());

        let bad = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(!CacheError::from(bad).is_miss());
    }
}
