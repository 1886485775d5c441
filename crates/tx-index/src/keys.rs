//! Composite key codec for the three index families.
//!
//! All families share one byte-ordered keyspace:
//!
//! ```text
//! by-hash:   <32-byte digest>                                  -> TxResult JSON
//! by-height: "tx.height" / BE4(height) / height / index / $es$0 -> hash
//! by-event:  "<type>.<key>" / <value> / <height> / <index> / $es$<seq> -> hash
//! ```
//!
//! `BE4` is the big-endian low 32 bits of the height, placed so that height
//! ranges become bounded byte-range scans. Attribute values may legally
//! contain the separator, so the extractors anchor on the trailing fields of
//! a key instead of counting from the front.

use crate::query::{Condition, Operand, TX_HEIGHT_KEY};
use crate::types::TxResult;

/// Separator between the fields of a composite key.
pub const TAG_KEY_SEPARATOR: &str = "/";
/// Marker preceding the event sequence in a key's last field.
pub const EVENT_SEQ_SEPARATOR: &str = "$es$";

const SEPARATOR_BYTE: u8 = b'/';

/// Big-endian low 32 bits of the height. Heights above 2^31 truncate here;
/// kept as-is for compatibility with existing on-disk indexes.
pub(crate) fn height_be4(height: i64) -> [u8; 4] {
    (height as u32).to_be_bytes()
}

/// Event-index key for one indexed attribute occurrence.
pub fn key_for_event(
    composite_key: &str,
    value: &str,
    result: &TxResult,
    event_seq: i64,
) -> Vec<u8> {
    format!(
        "{}/{}/{}/{}{}{}",
        composite_key, value, result.height, result.index, EVENT_SEQ_SEPARATOR, event_seq
    )
    .into_bytes()
}

/// Height-index key. The BE4 segment drives bounded range scans; the decimal
/// height keeps the key parseable by the field extractors.
pub fn key_for_height(result: &TxResult) -> Vec<u8> {
    let mut key = Vec::with_capacity(TX_HEIGHT_KEY.len() + 32);
    key.extend_from_slice(TX_HEIGHT_KEY.as_bytes());
    key.push(SEPARATOR_BYTE);
    key.extend_from_slice(&height_be4(result.height));
    key.extend_from_slice(
        format!(
            "/{}/{}{}0",
            result.height, result.index, EVENT_SEQ_SEPARATOR
        )
        .as_bytes(),
    );
    key
}

/// Scan prefix `"<composite_key>/"`.
pub fn start_key(composite_key: &str) -> Vec<u8> {
    let mut key = composite_key.as_bytes().to_vec();
    key.push(SEPARATOR_BYTE);
    key
}

/// Scan prefix for an equality condition: `"<key>/<operand>/"`, with the
/// query's pinned height appended when there is one.
pub fn start_key_for_condition(condition: &Condition, height: i64) -> Vec<u8> {
    let operand = condition
        .operand
        .as_ref()
        .map(Operand::to_string)
        .unwrap_or_default();
    let mut key = format!("{}/{}/", condition.composite_key, operand);
    if height > 0 {
        key.push_str(&height.to_string());
        key.push('/');
    }
    key.into_bytes()
}

/// A key belongs to an index family with trailing `height/index/$es$seq`
/// fields iff it has at least three separators; values containing the
/// separator only push the count higher.
pub fn is_tag_key(key: &[u8]) -> bool {
    key.iter().filter(|&&b| b == SEPARATOR_BYTE).count() >= 3
}

/// Decimal height, stored second-to-last among the separated fields.
/// `None` when the field does not parse; callers skip such keys.
pub fn extract_height_from_key(key: &[u8]) -> Option<i64> {
    let mut fields = key.rsplit(|&b| b == SEPARATOR_BYTE);
    fields.next()?;
    let height = fields.next()?;
    std::str::from_utf8(height).ok()?.parse().ok()
}

/// Attribute value: everything between the first separator and the trailing
/// `height/index` fields. `None` when the key has too few fields.
pub fn extract_value_from_key(key: &[u8]) -> Option<String> {
    let separators: Vec<usize> = key
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == SEPARATOR_BYTE)
        .map(|(i, _)| i)
        .collect();
    if separators.len() < 3 {
        return None;
    }
    let start = separators[0] + 1;
    let end = separators[separators.len() - 2];
    Some(String::from_utf8_lossy(&key[start..end]).into_owned())
}

/// Event sequence from the last field; `"0"` for entries written before
/// event sequences existed.
pub fn extract_event_seq_from_key(key: &[u8]) -> String {
    let last = key
        .rsplit(|&b| b == SEPARATOR_BYTE)
        .next()
        .unwrap_or_default();
    let last = String::from_utf8_lossy(last);
    match last.split_once(EVENT_SEQ_SEPARATOR) {
        Some((_, seq)) => seq.to_string(),
        None => "0".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Operator;
    use crate::types::{ExecResult, TxResult};

    fn result_at(height: i64, index: u32) -> TxResult {
        TxResult {
            height,
            index,
            tx: b"payload".to_vec(),
            result: ExecResult {
                code: 0,
                events: vec![],
            },
        }
    }

    #[test]
    fn height_key_round_trips_height() {
        for height in [1, 5, 47, 3000, i64::from(u32::MAX)] {
            let key = key_for_height(&result_at(height, 0));
            assert_eq!(extract_height_from_key(&key), Some(height), "height {height}");
            assert!(is_tag_key(&key));
        }
    }

    #[test]
    fn height_key_with_separator_byte_in_be4_still_parses() {
        // 47 is the separator byte itself; the BE4 segment then contains an
        // extra separator and the extractors must stay end-anchored.
        let key = key_for_height(&result_at(47, 3));
        assert_eq!(extract_height_from_key(&key), Some(47));
        assert_eq!(extract_event_seq_from_key(&key), "0");
    }

    #[test]
    fn be4_truncates_above_32_bits() {
        let low = key_for_height(&result_at(5, 0));
        let wrapped = key_for_height(&result_at(5 + (1 << 32), 0));
        assert_eq!(low[..14], wrapped[..14]); // "tx.height/" + BE4
        assert_ne!(low, wrapped); // decimal field still differs
    }

    #[test]
    fn event_key_round_trips_fields() {
        let result = result_at(5, 2);
        let key = key_for_event("acc.owner", "Ivan", &result, 7);
        assert_eq!(key, b"acc.owner/Ivan/5/2$es$7".to_vec());
        assert!(is_tag_key(&key));
        assert_eq!(extract_height_from_key(&key), Some(5));
        assert_eq!(extract_value_from_key(&key).as_deref(), Some("Ivan"));
        assert_eq!(extract_event_seq_from_key(&key), "7");
    }

    #[test]
    fn value_containing_separator_is_extracted_whole() {
        let key = key_for_event("acc.owner", "I/v/an", &result_at(9, 0), 1);
        assert_eq!(extract_value_from_key(&key).as_deref(), Some("I/v/an"));
        assert_eq!(extract_height_from_key(&key), Some(9));
    }

    #[test]
    fn legacy_key_without_seq_marker_reads_seq_zero() {
        assert_eq!(extract_event_seq_from_key(b"acc.owner/Ivan/5/2"), "0");
    }

    #[test]
    fn hash_keys_are_not_tag_keys() {
        assert!(!is_tag_key(&[0xAB; 32]));
        assert!(!is_tag_key(b"acc.owner/Ivan"));
    }

    #[test]
    fn start_keys_append_separator_per_field() {
        let condition = Condition {
            composite_key: "acc.owner".into(),
            op: Operator::Eq,
            operand: Some(Operand::Text("Ivan".into())),
        };
        assert_eq!(start_key("acc.owner"), b"acc.owner/".to_vec());
        assert_eq!(
            start_key_for_condition(&condition, 0),
            b"acc.owner/Ivan/".to_vec()
        );
        assert_eq!(
            start_key_for_condition(&condition, 5),
            b"acc.owner/Ivan/5/".to_vec()
        );
    }

    #[test]
    fn extract_value_requires_enough_fields() {
        assert_eq!(extract_value_from_key(b"acc.owner/Ivan"), None);
        assert_eq!(
            extract_value_from_key(b"acc.owner/Ivan/5/2$es$1").as_deref(),
            Some("Ivan")
        );
    }
}
