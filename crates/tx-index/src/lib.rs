//! Transaction indexing and search over ordered key-value storage.
//!
//! This crate ingests transaction results emitted by a state machine, writes
//! them under three composite-key families, and answers structured queries
//! combining equality, substring, existence, and height-range predicates.
//!
//! # Architecture
//!
//! ```text
//!  index / add_batch ──► key codec ──► KvStore (cinder-storage)
//!
//!  search ──► planner ──┬─► hash fast path ───────────► materializer
//!                       └─► range + condition evaluators
//!                                 │ intersect (implicit AND)
//!                                 ▼
//!                            materializer ──► Vec<TxResult>
//! ```
//!
//! The index families share one byte-ordered keyspace (see [`keys`]):
//! transactions by hash, by height (with a big-endian prefix enabling
//! bounded range scans), and by event attribute (with an event sequence
//! enabling per-event matching via `match.events = 1`).

pub mod cache;
pub mod cancel;
pub mod error;
pub mod index;
pub mod keys;
pub mod query;
pub mod range;
pub mod types;

pub use cache::{CacheConfig, TxCache};
pub use cancel::CancelToken;
pub use error::{TxIndexError, TxIndexResult};
pub use index::{TxIndex, BLOCK_WINDOW};
pub use query::{Condition, Operand, Operator, Query};
pub use range::{HeightInfo, QueryRange};
pub use types::{Event, EventAttribute, ExecResult, TxHash, TxResult};
