//! In-memory LRU cache for recently read transaction results.
//!
//! Fronts the point-get path so repeated lookups of hot hashes skip the
//! store read and the payload decode.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::RwLock;

use crate::types::TxResult;

/// Default number of transaction results to cache.
const DEFAULT_TX_CACHE_SIZE: usize = 4096;

/// Configuration for the read cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of transaction results to cache.
    pub tx_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tx_cache_size: DEFAULT_TX_CACHE_SIZE,
        }
    }
}

/// LRU cache of decoded results keyed by raw hash bytes.
pub struct TxCache {
    txs: RwLock<LruCache<Vec<u8>, Arc<TxResult>>>,
}

impl TxCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            txs: RwLock::new(LruCache::new(
                NonZeroUsize::new(config.tx_cache_size).unwrap(),
            )),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    pub fn get(&self, hash: &[u8]) -> Option<Arc<TxResult>> {
        self.txs.write().get(hash).cloned()
    }

    pub fn insert(&self, hash: &[u8], result: TxResult) {
        self.txs.write().put(hash.to_vec(), Arc::new(result));
    }

    /// Number of cached entries. Mostly useful in tests.
    pub fn len(&self) -> usize {
        self.txs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.txs.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecResult;

    fn result_at(height: i64) -> TxResult {
        TxResult {
            height,
            index: 0,
            tx: b"tx".to_vec(),
            result: ExecResult {
                code: 0,
                events: vec![],
            },
        }
    }

    #[test]
    fn insert_then_get() {
        let cache = TxCache::with_defaults();
        assert!(cache.get(b"h").is_none());
        cache.insert(b"h", result_at(1));
        assert_eq!(cache.get(b"h").unwrap().height, 1);
    }

    #[test]
    fn insert_overwrites_existing_entry() {
        let cache = TxCache::with_defaults();
        cache.insert(b"h", result_at(1));
        cache.insert(b"h", result_at(2));
        assert_eq!(cache.get(b"h").unwrap().height, 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used() {
        let cache = TxCache::new(CacheConfig { tx_cache_size: 2 });
        cache.insert(b"a", result_at(1));
        cache.insert(b"b", result_at(2));
        cache.insert(b"c", result_at(3));
        assert!(cache.get(b"a").is_none());
        assert!(cache.get(b"b").is_some());
        assert!(cache.get(b"c").is_some());
    }
}
