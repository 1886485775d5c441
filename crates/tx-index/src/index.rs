//! The transaction index: write path, query planner, and predicate
//! evaluators over an ordered key-value store.

use std::collections::{HashMap, HashSet};

use cinder_storage::{prefix_end, KvStore, Operation};

use crate::cache::{CacheConfig, TxCache};
use crate::cancel::CancelToken;
use crate::error::{TxIndexError, TxIndexResult};
use crate::keys::{
    extract_event_seq_from_key, extract_height_from_key, extract_value_from_key, height_be4,
    is_tag_key, key_for_event, key_for_height, start_key, start_key_for_condition,
    TAG_KEY_SEPARATOR,
};
use crate::query::{Condition, Operand, Operator, Query, MATCH_EVENTS_KEY, TX_HASH_KEY, TX_HEIGHT_KEY};
use crate::range::{check_height_conditions, look_for_ranges_with_height, HeightInfo, QueryRange};
use crate::types::{TxHash, TxResult};

/// Maximum number of heights one range scan may cover. Half-bounded ranges
/// are filled to this window; wider ranges are rejected.
pub const BLOCK_WINDOW: i64 = 5000;

/// Partial result set of a search. The map key is the raw hash, suffixed
/// with the event sequence under match-events so each matching event
/// occurrence is a distinct element; the value is always the raw hash.
type FilteredHashes = HashMap<Vec<u8>, Vec<u8>>;

/// Transaction indexer backed by ordered key-value storage.
///
/// Writes go through [`TxIndex::index`] / [`TxIndex::add_batch`]; reads
/// through [`TxIndex::get`] and [`TxIndex::search`]. Concurrent searches are
/// fine; writers to the same instance must be serialized by the caller
/// (the event-sequence counter is owned state).
pub struct TxIndex<S: KvStore> {
    store: S,
    /// Numbers every event processed by this indexer, indexed or not, so
    /// attributes of one event occurrence share a discriminator and
    /// sequences line up with positions in the event list.
    event_seq: i64,
    cache: TxCache,
}

impl<S: KvStore> TxIndex<S> {
    pub fn new(store: S) -> Self {
        Self::with_cache(store, CacheConfig::default())
    }

    pub fn with_cache(store: S, config: CacheConfig) -> Self {
        Self {
            store,
            event_seq: 0,
            cache: TxCache::new(config),
        }
    }

    /// Fetch a transaction result by its digest; `None` if not indexed (or
    /// pruned externally).
    pub fn get(&self, hash: &[u8]) -> TxIndexResult<Option<TxResult>> {
        if hash.is_empty() {
            return Err(TxIndexError::EmptyHash);
        }
        if let Some(cached) = self.cache.get(hash) {
            return Ok(Some((*cached).clone()));
        }
        match self.store.get(hash)? {
            None => Ok(None),
            Some(raw) => {
                let result: TxResult = serde_json::from_slice(&raw)
                    .map_err(|err| TxIndexError::Decode(err.to_string()))?;
                self.cache.insert(hash, result.clone());
                Ok(Some(result))
            }
        }
    }

    /// Index a single transaction result in one atomic commit.
    ///
    /// A failing result never overwrites an existing OK result for the same
    /// hash: users querying the hash keep seeing the transaction that
    /// actually executed.
    pub fn index(&mut self, result: &TxResult) -> TxIndexResult<()> {
        let hash = TxHash::digest(&result.tx);

        if !result.result.is_ok() {
            if let Some(old) = self.get(hash.as_bytes())? {
                if old.result.is_ok() {
                    log::debug!("skipping failed tx {hash}: an OK result is already indexed");
                    return Ok(());
                }
            }
        }

        let mut ops = Vec::new();
        self.index_events(result, &hash, &mut ops);
        ops.push(Operation::Set {
            key: key_for_height(result),
            value: hash.to_vec(),
        });
        ops.push(Operation::Set {
            key: hash.to_vec(),
            value: encode_result(result)?,
        });
        self.store.write_sync(ops)?;

        self.cache.insert(hash.as_bytes(), result.clone());
        log::debug!("indexed tx {hash} at height {}", result.height);
        Ok(())
    }

    /// Index a batch of results in one atomic commit.
    ///
    /// Unlike [`TxIndex::index`] this takes no notice of previously stored
    /// results: the last writer for a hash wins.
    pub fn add_batch(&mut self, batch: &[TxResult]) -> TxIndexResult<()> {
        let mut ops = Vec::new();
        let mut hashes = Vec::with_capacity(batch.len());
        for result in batch {
            let hash = TxHash::digest(&result.tx);
            self.index_events(result, &hash, &mut ops);
            ops.push(Operation::Set {
                key: key_for_height(result),
                value: hash.to_vec(),
            });
            ops.push(Operation::Set {
                key: hash.to_vec(),
                value: encode_result(result)?,
            });
            hashes.push(hash);
        }
        self.store.write_sync(ops)?;

        for (hash, result) in hashes.iter().zip(batch) {
            self.cache.insert(hash.as_bytes(), result.clone());
        }
        log::debug!("indexed batch of {} txs", batch.len());
        Ok(())
    }

    fn index_events(&mut self, result: &TxResult, hash: &TxHash, ops: &mut Vec<Operation>) {
        for event in &result.result.events {
            self.event_seq += 1;
            // Events with no type are counted but not indexed.
            if event.kind.is_empty() {
                continue;
            }
            for attr in &event.attributes {
                if attr.key.is_empty() || !attr.index {
                    continue;
                }
                let composite_key = format!("{}.{}", event.kind, attr.key);
                ops.push(Operation::Set {
                    key: key_for_event(&composite_key, &attr.value, result, self.event_seq),
                    value: hash.to_vec(),
                });
            }
        }
    }

    /// Search for transactions matching every condition of `query`,
    /// unordered.
    ///
    /// `tx.hash = '<hex>'` short-circuits to a point lookup. Cancellation is
    /// cooperative: a cancelled token makes the search return whatever it
    /// has gathered so far, never an error.
    pub fn search(&self, token: &CancelToken, query: &Query) -> TxIndexResult<Vec<TxResult>> {
        if token.is_cancelled() {
            return Ok(Vec::new());
        }

        let conditions = query.conditions().to_vec();

        if let Some(hash) = look_for_hash(&conditions)? {
            return match self.get(&hash)? {
                Some(result) => Ok(vec![result]),
                None => Ok(Vec::new()),
            };
        }

        let (conditions, match_events) = dedup_match_events(conditions);
        let mut skip_indexes: Vec<usize> = Vec::new();
        if match_events {
            skip_indexes.push(0);
        }

        let (conditions, mut height_info) = if match_events {
            // Repeated height equalities would silently overwrite each other
            // while every one of them must hold per event.
            dedup_height(conditions)
        } else {
            let mut info = HeightInfo::default();
            (info.height, info.height_eq_idx) = look_for_height(&conditions);
            (conditions, info)
        };
        if match_events && !height_info.only_height_eq {
            if let Some(idx) = height_info.height_eq_idx {
                skip_indexes.push(idx);
            }
        }

        let (ranges, range_indexes, height_range) = look_for_ranges_with_height(&conditions);
        height_info.height_range = height_range;

        let mut filtered = FilteredHashes::new();
        let mut first_run = true;

        if !ranges.is_empty() {
            skip_indexes.extend(range_indexes);
            for range in &ranges {
                // With match-events and further predicates present, the
                // height range is enforced per event inside the other
                // evaluators instead of being scanned on its own.
                if range.key == TX_HEIGHT_KEY && match_events && !height_info.only_height_range {
                    continue;
                }
                filtered =
                    self.match_range(token, range, filtered, first_run, match_events, &height_info)?;
                if first_run {
                    first_run = false;
                    // Implicit AND: a first condition with no matches
                    // settles the query.
                    if filtered.is_empty() {
                        break;
                    }
                }
            }
        }

        for (i, condition) in conditions.iter().enumerate() {
            if skip_indexes.contains(&i) {
                continue;
            }
            filtered = self.match_condition(
                token,
                condition,
                filtered,
                first_run,
                match_events,
                &height_info,
            )?;
            if first_run {
                first_run = false;
                if filtered.is_empty() {
                    break;
                }
            }
        }

        let mut results = Vec::with_capacity(filtered.len());
        let mut seen: HashSet<Vec<u8>> = HashSet::with_capacity(filtered.len());
        for hash in filtered.into_values() {
            if token.is_cancelled() {
                break;
            }
            // Under match-events one hash appears once per matching event.
            if !seen.insert(hash.clone()) {
                continue;
            }
            match self.get(&hash) {
                Ok(Some(result)) => results.push(result),
                // The row may have been pruned between scan and fetch.
                Ok(None) => {}
                Err(err) => {
                    return Err(TxIndexError::TxLookup {
                        hash: hex::encode(&hash),
                        reason: err.to_string(),
                    })
                }
            }
        }

        Ok(results)
    }

    /// Evaluate one equality / existence / substring condition into a set of
    /// candidate hashes, then fold it into the filter set.
    fn match_condition(
        &self,
        token: &CancelToken,
        condition: &Condition,
        filtered: FilteredHashes,
        first_run: bool,
        match_events: bool,
        height_info: &HeightInfo,
    ) -> TxIndexResult<FilteredHashes> {
        // A previous condition found nothing; under the implicit AND there
        // is nothing left to narrow.
        if !first_run && filtered.is_empty() {
            return Ok(filtered);
        }

        let mut tmp = FilteredHashes::new();

        match condition.op {
            Operator::Eq => {
                let prefix = start_key_for_condition(condition, height_info.height);
                for entry in self.store.iterate_prefix(&prefix)? {
                    if token.is_cancelled() {
                        break;
                    }
                    let (key, value) = entry?;
                    if match_events && !key_height_matches(&key, height_info) {
                        continue;
                    }
                    insert_hash(&mut tmp, &key, value, match_events);
                }
            }
            Operator::Exists => {
                // The operand plays no part: any entry under the composite
                // key is a hit.
                for entry in self.store.iterate_prefix(&start_key(&condition.composite_key))? {
                    if token.is_cancelled() {
                        break;
                    }
                    let (key, value) = entry?;
                    if match_events && !key_height_matches(&key, height_info) {
                        continue;
                    }
                    insert_hash(&mut tmp, &key, value, match_events);
                }
            }
            Operator::Contains => {
                // Equality's narrowed prefix does not apply: a stored value
                // like "Ulan" must still be visited to test a "lan" operand.
                let operand = condition
                    .operand
                    .as_ref()
                    .and_then(Operand::as_text)
                    .unwrap_or_default();
                for entry in self.store.iterate_prefix(&start_key(&condition.composite_key))? {
                    if token.is_cancelled() {
                        break;
                    }
                    let (key, value) = entry?;
                    if !is_tag_key(&key) {
                        continue;
                    }
                    let Some(stored) = extract_value_from_key(&key) else {
                        continue;
                    };
                    if !stored.contains(operand) {
                        continue;
                    }
                    if match_events && !key_height_matches(&key, height_info) {
                        continue;
                    }
                    insert_hash(&mut tmp, &key, value, match_events);
                }
            }
            Operator::Lt | Operator::Lte | Operator::Gt | Operator::Gte => {
                unreachable!("range operators are evaluated by match_range")
            }
        }

        Ok(merge(filtered, tmp, first_run))
    }

    /// Evaluate one numeric range condition via a bounded scan over the BE4
    /// cells between its bounds, then fold it into the filter set.
    fn match_range(
        &self,
        token: &CancelToken,
        range: &QueryRange,
        filtered: FilteredHashes,
        first_run: bool,
        match_events: bool,
        height_info: &HeightInfo,
    ) -> TxIndexResult<FilteredHashes> {
        if !first_run && filtered.is_empty() {
            return Ok(filtered);
        }

        // A missing bound is filled from the other one so a half-bounded
        // query never degenerates into a full scan.
        let (mut lower, upper) = match (range.lower_value(), range.upper_value()) {
            (Some(lower), Some(upper)) => (lower, upper),
            (Some(lower), None) => (lower, lower.saturating_add(BLOCK_WINDOW - 1)),
            (None, Some(upper)) => (upper.saturating_sub(BLOCK_WINDOW - 1), upper),
            (None, None) => return Ok(filtered),
        };
        if lower < 1 {
            lower = 1;
        }
        if lower > upper || upper - lower > BLOCK_WINDOW {
            log::warn!(
                "range over {} wider than {} heights, returning the filter set unchanged",
                range.key,
                BLOCK_WINDOW
            );
            return Ok(filtered);
        }

        let start = start_key(&range.key);
        let mut from_key = start.clone();
        from_key.extend_from_slice(&height_be4(lower));
        from_key.extend_from_slice(TAG_KEY_SEPARATOR.as_bytes());

        let mut upper_cell = start;
        upper_cell.extend_from_slice(&height_be4(upper));
        upper_cell.extend_from_slice(TAG_KEY_SEPARATOR.as_bytes());
        // Scan to the end of the upper BE4 cell so the upper bound itself is
        // included.
        let Some(to_key) = prefix_end(&upper_cell) else {
            return Ok(filtered);
        };

        let mut tmp = FilteredHashes::new();
        for entry in self.store.iterate_range(&from_key, &to_key)? {
            if token.is_cancelled() {
                break;
            }
            let (key, value) = entry?;
            if !is_tag_key(&key) {
                continue;
            }
            // When this range is the height range the scan bounds already
            // enforce it; entries of other keys still need the per-event
            // height check.
            if match_events
                && range.key != TX_HEIGHT_KEY
                && !key_height_matches(&key, height_info)
            {
                continue;
            }
            insert_hash(&mut tmp, &key, value, match_events);
        }

        Ok(merge(filtered, tmp, first_run))
    }
}

fn encode_result(result: &TxResult) -> TxIndexResult<Vec<u8>> {
    serde_json::to_vec(result).map_err(|err| TxIndexError::Encode(err.to_string()))
}

/// Whether a scanned key's height satisfies the query's height constraints.
/// Keys with an unparseable height field never match.
fn key_height_matches(key: &[u8], height_info: &HeightInfo) -> bool {
    match extract_height_from_key(key) {
        Some(height) => check_height_conditions(height_info, height),
        None => false,
    }
}

/// Record one candidate. Under match-events the set key carries the event
/// sequence, making each matching event occurrence a distinct element; the
/// value stays the raw hash so materialization dedupes back to transactions.
fn insert_hash(tmp: &mut FilteredHashes, key: &[u8], hash: Vec<u8>, match_events: bool) {
    if match_events {
        let mut set_key = hash.clone();
        set_key.extend_from_slice(extract_event_seq_from_key(key).as_bytes());
        tmp.insert(set_key, hash);
    } else {
        tmp.insert(hash.clone(), hash);
    }
}

/// Fold one evaluator's result into the filter set: seed it on the first
/// run, collapse it when the evaluator found nothing, intersect otherwise.
fn merge(mut filtered: FilteredHashes, tmp: FilteredHashes, first_run: bool) -> FilteredHashes {
    if first_run || tmp.is_empty() {
        return tmp;
    }
    filtered.retain(|key, value| tmp.get(key).is_some_and(|hash| hash == value));
    filtered
}

/// Hash fast path: an `Eq` condition on `tx.hash`, hex-decoded.
fn look_for_hash(conditions: &[Condition]) -> TxIndexResult<Option<Vec<u8>>> {
    for condition in conditions {
        if condition.composite_key != TX_HASH_KEY || condition.op != Operator::Eq {
            continue;
        }
        let operand = condition
            .operand
            .as_ref()
            .and_then(Operand::as_text)
            .ok_or_else(|| TxIndexError::InvalidHash("hash operand must be a string".into()))?;
        let hash = hex::decode(operand).map_err(|err| TxIndexError::InvalidHash(err.to_string()))?;
        return Ok(Some(hash));
    }
    Ok(None)
}

/// First `tx.height = N` condition: the pinned height and its index.
fn look_for_height(conditions: &[Condition]) -> (i64, Option<usize>) {
    for (i, condition) in conditions.iter().enumerate() {
        if condition.composite_key == TX_HEIGHT_KEY && condition.op == Operator::Eq {
            if let Some(height) = condition.operand.as_ref().and_then(Operand::as_int) {
                return (height, Some(i));
            }
        }
    }
    (0, None)
}

/// Honor `match.events` only at the head of the query; occurrences anywhere
/// else are stripped.
fn dedup_match_events(conditions: Vec<Condition>) -> (Vec<Condition>, bool) {
    let mut out = Vec::with_capacity(conditions.len());
    let mut match_events = false;
    for (i, condition) in conditions.into_iter().enumerate() {
        if condition.composite_key == MATCH_EVENTS_KEY {
            if i == 0 {
                match_events = true;
                out.push(condition);
            }
        } else {
            out.push(condition);
        }
    }
    (out, match_events)
}

/// Under match-events, keep only the first height equality (a range wins
/// over any equality) and classify whether the query consists solely of
/// height predicates.
fn dedup_height(conditions: Vec<Condition>) -> (Vec<Condition>, HeightInfo) {
    let mut info = HeightInfo {
        only_height_eq: true,
        only_height_range: true,
        ..HeightInfo::default()
    };
    let mut out = Vec::with_capacity(conditions.len());
    let mut height_condition = None;
    let mut height_range_exists = false;

    for condition in conditions {
        if condition.composite_key == TX_HEIGHT_KEY {
            if condition.op == Operator::Eq {
                if height_range_exists || height_condition.is_some() {
                    continue;
                }
                info.height = condition
                    .operand
                    .as_ref()
                    .and_then(Operand::as_int)
                    .unwrap_or(0);
                height_condition = Some(condition);
            } else {
                info.only_height_eq = false;
                height_range_exists = true;
                out.push(condition);
            }
        } else {
            if condition.composite_key != MATCH_EVENTS_KEY {
                info.only_height_eq = false;
                info.only_height_range = false;
            }
            out.push(condition);
        }
    }

    if height_range_exists {
        info.height = 0;
        info.height_eq_idx = None;
        info.only_height_eq = false;
    } else if let Some(condition) = height_condition {
        info.height_eq_idx = Some(out.len());
        info.only_height_range = false;
        out.push(condition);
    } else {
        info.only_height_eq = false;
        info.only_height_range = false;
    }

    (out, info)
}


// ==================== Model-based tests ====================
#[cfg(test)]
mod model_tests {
    use super::*;
    use crate::types::{Event, EventAttribute, ExecResult};
    use cinder_storage::MemoryKv;
    use proptest::prelude::*;
    use std::collections::{HashMap, HashSet};

    #[derive(Debug, Clone)]
    struct TxSpec {
        owner: String,
        num: String,
        height: i64,
    }

    fn arb_tx_spec() -> impl Strategy<Value = TxSpec> {
        (
            proptest::sample::select(vec!["Ivan", "John", "Ulan"]),
            0u8..3,
            1i64..50,
        )
            .prop_map(|(owner, num, height)| TxSpec {
                owner: owner.into(),
                num: num.to_string(),
                height,
            })
    }

    fn build_index(
        specs: &[TxSpec],
    ) -> (TxIndex<MemoryKv>, HashMap<(String, String), HashSet<Vec<u8>>>) {
        let mut index = TxIndex::new(MemoryKv::new());
        // Reference model: attribute (key, value) -> payloads carrying it.
        let mut model: HashMap<(String, String), HashSet<Vec<u8>>> = HashMap::new();

        for (i, spec) in specs.iter().enumerate() {
            let tx = format!("tx-{i}").into_bytes();
            let result = TxResult {
                height: spec.height,
                index: 0,
                tx: tx.clone(),
                result: ExecResult {
                    code: 0,
                    events: vec![Event {
                        kind: "acc".into(),
                        attributes: vec![
                            EventAttribute {
                                key: "owner".into(),
                                value: spec.owner.clone(),
                                index: true,
                            },
                            EventAttribute {
                                key: "num".into(),
                                value: spec.num.clone(),
                                index: true,
                            },
                        ],
                    }],
                },
            };
            index.index(&result).unwrap();
            model
                .entry(("owner".into(), spec.owner.clone()))
                .or_default()
                .insert(tx.clone());
            model
                .entry(("num".into(), spec.num.clone()))
                .or_default()
                .insert(tx);
        }

        (index, model)
    }

    fn search_payloads(index: &TxIndex<MemoryKv>, query: &str) -> HashSet<Vec<u8>> {
        index
            .search(&CancelToken::new(), &Query::parse(query).unwrap())
            .unwrap()
            .into_iter()
            .map(|r| r.tx)
            .collect()
    }

    proptest! {
        /// Every equality search returns exactly the model's set.
        #[test]
        fn prop_equality_search_matches_model(specs in proptest::collection::vec(arb_tx_spec(), 1..20)) {
            let (index, model) = build_index(&specs);

            for ((attr_key, value), expected) in &model {
                let got = search_payloads(&index, &format!("acc.{attr_key} = '{value}'"));
                prop_assert_eq!(&got, expected, "query acc.{} = '{}'", attr_key, value);
            }
        }

        /// Without match-events, a conjunction is exactly the intersection of
        /// its conditions' result sets.
        #[test]
        fn prop_conjunction_is_intersection(specs in proptest::collection::vec(arb_tx_spec(), 1..20)) {
            let (index, model) = build_index(&specs);

            for owner in ["Ivan", "John", "Ulan"] {
                for num in ["0", "1", "2"] {
                    let got = search_payloads(
                        &index,
                        &format!("acc.owner = '{owner}' AND acc.num = '{num}'"),
                    );
                    let owners = model
                        .get(&("owner".to_string(), owner.to_string()))
                        .cloned()
                        .unwrap_or_default();
                    let nums = model
                        .get(&("num".to_string(), num.to_string()))
                        .cloned()
                        .unwrap_or_default();
                    let expected: HashSet<Vec<u8>> = owners.intersection(&nums).cloned().collect();
                    prop_assert_eq!(got, expected, "owner {} num {}", owner, num);
                }
            }
        }
    }
}
