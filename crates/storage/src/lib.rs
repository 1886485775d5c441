//! Ordered key-value storage contract for the cinder transaction index.
//!
//! The index never talks to a concrete database; it consumes the [`KvStore`]
//! trait: point reads, atomic synchronous batches, and ascending iteration
//! by prefix or half-open range. Keys are ordered lexicographically as
//! unsigned bytes. [`MemoryKv`] is the in-tree backend for development and
//! tests; persistent engines plug in through the same trait.

pub mod memory;

pub use memory::MemoryKv;

use thiserror::Error;

/// Errors surfaced by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unexpected failure of the underlying store.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Failure reported by an iterator during or after a scan.
    #[error("storage iterator error: {0}")]
    Iterator(String),
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A single mutation inside an atomic batch.
#[derive(Debug, Clone)]
pub enum Operation {
    Set { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

/// One `(key, value)` entry yielded by a scan.
pub type KvEntry = (Vec<u8>, Vec<u8>);

/// A boxed scan over entries in ascending key order.
///
/// Dropping the iterator releases whatever the backend pinned for the scan
/// (snapshots, cursors), on every exit path.
pub type KvIter<'a> = Box<dyn Iterator<Item = StoreResult<KvEntry>> + 'a>;

/// The ordered-bytes store the transaction index runs on.
pub trait KvStore: Send + Sync {
    /// Point lookup. `Ok(None)` when the key is absent.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Apply `ops` atomically with synchronous durability: either every
    /// operation is visible after this returns, or none is.
    fn write_sync(&self, ops: Vec<Operation>) -> StoreResult<()>;

    /// Iterate all entries whose key starts with `prefix`, ascending.
    fn iterate_prefix<'a>(&'a self, prefix: &[u8]) -> StoreResult<KvIter<'a>>;

    /// Iterate entries with `from <= key < to`, ascending.
    fn iterate_range<'a>(&'a self, from: &[u8], to: &[u8]) -> StoreResult<KvIter<'a>>;
}

/// Smallest byte string strictly greater than every key starting with
/// `prefix`: increment the last non-`0xFF` byte and truncate after it.
///
/// Returns `None` when no such bound exists (empty or all-`0xFF` prefix);
/// callers then scan to the end of the keyspace.
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let last = prefix.iter().rposition(|&b| b != 0xFF)?;
    let mut end = prefix[..=last].to_vec();
    end[last] += 1;
    Some(end)
}
