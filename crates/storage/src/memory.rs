//! In-memory ordered store for fast dev/test runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::{KvEntry, KvIter, KvStore, Operation, StoreResult};

/// Simple in-memory [`KvStore`] backed by a `BTreeMap`.
///
/// Cloning is cheap and shares the underlying state. Writes are atomic under
/// the lock; iterators observe a snapshot taken at creation time and are not
/// affected by later writes. This does not provide persistence.
#[derive(Clone, Default)]
pub struct MemoryKv {
    state: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries. Mostly useful in tests.
    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    fn snapshot(entries: Vec<KvEntry>) -> KvIter<'static> {
        Box::new(entries.into_iter().map(Ok))
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.state.read().get(key).cloned())
    }

    fn write_sync(&self, ops: Vec<Operation>) -> StoreResult<()> {
        let mut guard = self.state.write();
        for op in ops {
            match op {
                Operation::Set { key, value } => {
                    guard.insert(key, value);
                }
                Operation::Remove { key } => {
                    guard.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn iterate_prefix<'a>(&'a self, prefix: &[u8]) -> StoreResult<KvIter<'a>> {
        let guard = self.state.read();
        let entries: Vec<KvEntry> = guard
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self::snapshot(entries))
    }

    fn iterate_range<'a>(&'a self, from: &[u8], to: &[u8]) -> StoreResult<KvIter<'a>> {
        if from >= to {
            return Ok(Self::snapshot(Vec::new()));
        }
        let guard = self.state.read();
        let entries: Vec<KvEntry> = guard
            .range(from.to_vec()..to.to_vec())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self::snapshot(entries))
    }
}
