//! Numeric range predicates and per-search height bookkeeping.

use crate::query::{Condition, Operand, Operator, TX_HEIGHT_KEY};

/// A numeric range over one composite key, merged from all range conditions
/// on that key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRange {
    pub key: String,
    pub lower_bound: Option<i64>,
    pub upper_bound: Option<i64>,
    pub include_lower: bool,
    pub include_upper: bool,
}

impl QueryRange {
    /// Smallest value inside the range, adjusting an exclusive bound.
    pub fn lower_value(&self) -> Option<i64> {
        self.lower_bound.map(|v| {
            if self.include_lower {
                v
            } else {
                v.saturating_add(1)
            }
        })
    }

    /// Largest value inside the range, adjusting an exclusive bound.
    pub fn upper_value(&self) -> Option<i64> {
        self.upper_bound.map(|v| {
            if self.include_upper {
                v
            } else {
                v.saturating_sub(1)
            }
        })
    }

    /// Whether `value` lies inside the range.
    pub fn contains(&self, value: i64) -> bool {
        if let Some(lower) = self.lower_value() {
            if value < lower {
                return false;
            }
        }
        if let Some(upper) = self.upper_value() {
            if value > upper {
                return false;
            }
        }
        true
    }
}

/// Height constraints extracted from one query, threaded through the
/// evaluators. `height == 0` and `height_range == None` mean unconstrained.
#[derive(Debug, Clone, Default)]
pub struct HeightInfo {
    pub height: i64,
    pub height_eq_idx: Option<usize>,
    pub height_range: Option<QueryRange>,
    pub only_height_eq: bool,
    pub only_height_range: bool,
}

/// Collect every range condition, merged per composite key in first-use
/// order. Returns the merged ranges, the indexes of the consumed conditions,
/// and the height range (if any) separated out for per-event filtering.
pub fn look_for_ranges_with_height(
    conditions: &[Condition],
) -> (Vec<QueryRange>, Vec<usize>, Option<QueryRange>) {
    let mut ranges: Vec<QueryRange> = Vec::new();
    let mut indexes = Vec::new();
    let mut height_range = None;

    for (i, c) in conditions.iter().enumerate() {
        if !c.op.is_range() {
            continue;
        }
        indexes.push(i);

        let pos = match ranges.iter().position(|r| r.key == c.composite_key) {
            Some(pos) => pos,
            None => {
                ranges.push(QueryRange {
                    key: c.composite_key.clone(),
                    ..QueryRange::default()
                });
                ranges.len() - 1
            }
        };
        let range = &mut ranges[pos];

        // Non-integer operands leave the bound unset; the evaluator then
        // returns the filter set unchanged for that side.
        let bound = c.operand.as_ref().and_then(Operand::as_int);
        match c.op {
            Operator::Gt => {
                range.lower_bound = bound;
                range.include_lower = false;
            }
            Operator::Gte => {
                range.lower_bound = bound;
                range.include_lower = true;
            }
            Operator::Lt => {
                range.upper_bound = bound;
                range.include_upper = false;
            }
            Operator::Lte => {
                range.upper_bound = bound;
                range.include_upper = true;
            }
            Operator::Eq | Operator::Contains | Operator::Exists => {}
        }

        if range.key == TX_HEIGHT_KEY {
            height_range = Some(range.clone());
        }
    }

    (ranges, indexes, height_range)
}

/// Whether a key's height satisfies the query's height constraints. A height
/// range takes precedence over a height equality.
pub fn check_height_conditions(height_info: &HeightInfo, key_height: i64) -> bool {
    match &height_info.height_range {
        Some(range) => range.contains(key_height),
        None => height_info.height == 0 || key_height == height_info.height,
    }
}
