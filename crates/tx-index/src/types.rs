//! Types for indexed transaction results.
//!
//! These are the storage-facing shapes: what the state machine hands to the
//! indexer and what a search materializes back out.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Execution result of one transaction at one height, the unit of indexing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    /// Block height the transaction was executed at.
    pub height: i64,
    /// Position within the block.
    pub index: u32,
    /// Opaque transaction payload; its SHA-256 digest is the primary key.
    pub tx: Vec<u8>,
    /// Outcome reported by the state machine.
    pub result: ExecResult,
}

/// Outcome of executing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    /// Response code; `0` means OK.
    pub code: u32,
    /// Events emitted during execution.
    pub events: Vec<Event>,
}

impl ExecResult {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// A typed event emitted by the state machine.
///
/// Events with an empty `kind` are counted for event sequencing but produce
/// no index entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

/// A key/value attribute of an [`Event`]. Only attributes with `index: true`
/// and a non-empty key are written to the event index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
    pub index: bool,
}

/// SHA-256 digest of a transaction payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Digest of the opaque transaction payload.
    pub fn digest(tx: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tx);
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", hex::encode(self.0))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl From<[u8; 32]> for TxHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(TxHash::digest(b"tx"), TxHash::digest(b"tx"));
        assert_ne!(TxHash::digest(b"tx"), TxHash::digest(b"other"));
    }

    #[test]
    fn display_is_hex() {
        let hash = TxHash::new([0xAB; 32]);
        assert_eq!(hash.to_string(), "ab".repeat(32));
    }

    #[test]
    fn exec_result_ok_iff_code_zero() {
        let ok = ExecResult { code: 0, events: vec![] };
        let failed = ExecResult { code: 1, events: vec![] };
        assert!(ok.is_ok());
        assert!(!failed.is_ok());
    }

    #[test]
    fn tx_result_round_trips_through_json() {
        let result = TxResult {
            height: 7,
            index: 2,
            tx: b"payload".to_vec(),
            result: ExecResult {
                code: 0,
                events: vec![Event {
                    kind: "acc".into(),
                    attributes: vec![EventAttribute {
                        key: "owner".into(),
                        value: "Ivan".into(),
                        index: true,
                    }],
                }],
            },
        };
        let raw = serde_json::to_vec(&result).unwrap();
        let decoded: TxResult = serde_json::from_slice(&raw).unwrap();
        assert_eq!(decoded, result);
    }
}
