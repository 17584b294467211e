//! In-process store with the same reply semantics as the Redis adapter.
//!
//! Used by the test suite and by `--memory` runs of the binary. Expiry is
//! driven by `tokio::time`, so paused-clock tests can advance past a TTL.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::domain::query::{Aggregate, Operator, ScoreRange, SortOrder};
use crate::domain::range::{Page, RangeItems, ScoredMember};
use crate::domain::weighted_key::WeightedKey;
use crate::store::{BitmapStore, KeyspaceStore, SortedSetStore, StoreError};

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "infra::memory";
const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Clone)]
enum Value {
    SortedSet(HashMap<String, f64>),
    Hash(HashMap<String, String>),
    Counter(i64),
    Bitmap(BTreeSet<u64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Keyspace = HashMap<String, Entry>;

#[derive(Default)]
pub struct MemoryStore {
    keyspace: RwLock<Keyspace>,
    combinations: AtomicUsize,
    pending_evictions: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of union/intersection writes performed so far.
    pub fn combination_count(&self) -> usize {
        self.combinations.load(Ordering::SeqCst)
    }

    /// Make the next `times` positive `exists` answers drop the key right
    /// after replying, as if it had expired between the check and the read.
    pub fn evict_after_next_exists(&self, times: usize) {
        self.pending_evictions.store(times, Ordering::SeqCst);
    }

    /// Evictions armed by [`Self::evict_after_next_exists`] not yet triggered.
    pub fn pending_evictions(&self) -> usize {
        self.pending_evictions.load(Ordering::SeqCst)
    }

    /// Live key names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let keyspace = rw_read(&self.keyspace, SOURCE, "keys");
        let mut keys: Vec<String> = keyspace
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn with_keyspace<R>(&self, op: &'static str, f: impl FnOnce(&mut Keyspace) -> R) -> R {
        let now = Instant::now();
        let mut keyspace = rw_write(&self.keyspace, SOURCE, op);
        keyspace.retain(|_, entry| !entry.is_expired(now));
        f(&mut keyspace)
    }

    fn take_pending_eviction(&self) -> bool {
        self.pending_evictions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn sorted_set<'a>(
    keyspace: &'a Keyspace,
    key: &str,
    command: &'static str,
) -> Result<Option<&'a HashMap<String, f64>>, StoreError> {
    match keyspace.get(key).map(|entry| &entry.value) {
        None => Ok(None),
        Some(Value::SortedSet(set)) => Ok(Some(set)),
        Some(_) => Err(StoreError::command(command, WRONGTYPE)),
    }
}

fn ascending(set: &HashMap<String, f64>) -> Vec<ScoredMember> {
    let mut members: Vec<ScoredMember> = set
        .iter()
        .map(|(member, score)| ScoredMember {
            member: member.clone(),
            score: *score,
        })
        .collect();
    members.sort_by(compare_members);
    members
}

fn compare_members(a: &ScoredMember, b: &ScoredMember) -> CmpOrdering {
    a.score
        .total_cmp(&b.score)
        .then_with(|| a.member.cmp(&b.member))
}

fn ordered(set: &HashMap<String, f64>, order: SortOrder) -> Vec<ScoredMember> {
    let mut members = ascending(set);
    if order.is_descending() {
        members.reverse();
    }
    members
}

/// Resolve an inclusive, possibly negative, rank window against `len`.
fn rank_window(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop };
    if start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop.min(len - 1) as usize))
}

fn weighted(set: &HashMap<String, f64>, weight: f64) -> HashMap<String, f64> {
    set.iter()
        .map(|(member, score)| (member.clone(), score * weight))
        .collect()
}

fn combine(
    keyspace: &Keyspace,
    operator: Operator,
    sources: &[WeightedKey],
    aggregate: Aggregate,
    command: &'static str,
) -> Result<HashMap<String, f64>, StoreError> {
    let mut result: Option<HashMap<String, f64>> = None;
    for source in sources {
        let set = sorted_set(keyspace, source.key(), command)?
            .map(|set| weighted(set, source.weight()))
            .unwrap_or_default();
        result = Some(match (operator, result) {
            (_, None) => set,
            (Operator::Union, Some(mut acc)) => {
                for (member, score) in set {
                    acc.entry(member)
                        .and_modify(|current| *current = aggregate.combine(*current, score))
                        .or_insert(score);
                }
                acc
            }
            (Operator::Intersect, Some(acc)) => acc
                .into_iter()
                .filter_map(|(member, current)| {
                    set.get(&member)
                        .map(|score| (member, aggregate.combine(current, *score)))
                })
                .collect(),
        });
    }
    Ok(result.unwrap_or_default())
}

fn bitmap<'a>(
    keyspace: &'a Keyspace,
    key: &str,
    command: &'static str,
) -> Result<Option<&'a BTreeSet<u64>>, StoreError> {
    match keyspace.get(key).map(|entry| &entry.value) {
        None => Ok(None),
        Some(Value::Bitmap(bits)) => Ok(Some(bits)),
        Some(_) => Err(StoreError::command(command, WRONGTYPE)),
    }
}

fn byte_len(bits: &BTreeSet<u64>) -> u64 {
    bits.last().map_or(0, |highest| highest / 8 + 1)
}

fn hash_mut<'a>(
    keyspace: &'a mut Keyspace,
    key: &str,
    command: &'static str,
) -> Result<&'a mut HashMap<String, String>, StoreError> {
    let entry = keyspace
        .entry(key.to_string())
        .or_insert_with(|| Entry::persistent(Value::Hash(HashMap::new())));
    match &mut entry.value {
        Value::Hash(hash) => Ok(hash),
        _ => Err(StoreError::command(command, WRONGTYPE)),
    }
}

#[async_trait]
impl KeyspaceStore for MemoryStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let found = self.with_keyspace("exists", |keyspace| {
            let found = keyspace.contains_key(key);
            if found && self.take_pending_eviction() {
                keyspace.remove(key);
            }
            found
        });
        Ok(found)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError> {
        Ok(self.with_keyspace("expire", |keyspace| {
            if seconds == 0 {
                return keyspace.remove(key).is_some();
            }
            match keyspace.get_mut(key) {
                Some(entry) => {
                    entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                    true
                }
                None => false,
            }
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.with_keyspace("delete", |keyspace| keyspace.remove(key).is_some()))
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        Ok(self.with_keyspace("ttl", |keyspace| {
            let now = Instant::now();
            keyspace
                .get(key)
                .and_then(|entry| entry.expires_at)
                .map(|at| {
                    let remaining = at.saturating_duration_since(now).as_millis();
                    ((remaining + 500) / 1000) as u64
                })
        }))
    }
}

#[async_trait]
impl SortedSetStore for MemoryStore {
    async fn combine_and_expire(
        &self,
        dest: &str,
        operator: Operator,
        sources: &[WeightedKey],
        aggregate: Aggregate,
        expire_seconds: u64,
    ) -> Result<(), StoreError> {
        let command = match operator {
            Operator::Union => "ZUNIONSTORE",
            Operator::Intersect => "ZINTERSTORE",
        };
        self.with_keyspace("combine_and_expire", |keyspace| {
            let combined = combine(keyspace, operator, sources, aggregate, command)?;
            if combined.is_empty() || expire_seconds == 0 {
                keyspace.remove(dest);
            } else {
                keyspace.insert(
                    dest.to_string(),
                    Entry {
                        value: Value::SortedSet(combined),
                        expires_at: Some(Instant::now() + Duration::from_secs(expire_seconds)),
                    },
                );
            }
            Ok::<(), StoreError>(())
        })?;
        self.combinations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn card(&self, key: &str) -> Result<u64, StoreError> {
        self.with_keyspace("card", |keyspace| {
            Ok(sorted_set(keyspace, key, "ZCARD")?.map_or(0, |set| set.len() as u64))
        })
    }

    async fn count_in(&self, key: &str, range: &ScoreRange) -> Result<u64, StoreError> {
        self.with_keyspace("count_in", |keyspace| {
            Ok(sorted_set(keyspace, key, "ZCOUNT")?.map_or(0, |set| {
                set.values().filter(|score| range.contains(**score)).count() as u64
            }))
        })
    }

    async fn range_by_rank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: SortOrder,
        with_scores: bool,
    ) -> Result<RangeItems, StoreError> {
        self.with_keyspace("range_by_rank", |keyspace| {
            let Some(set) = sorted_set(keyspace, key, "ZRANGE")? else {
                return Ok(RangeItems::empty(with_scores));
            };
            let members = ordered(set, order);
            let window = match rank_window(members.len(), start, stop) {
                Some((first, last)) => members[first..=last].to_vec(),
                None => Vec::new(),
            };
            Ok(RangeItems::from_scored(window, with_scores))
        })
    }

    async fn range_by_score(
        &self,
        key: &str,
        range: &ScoreRange,
        order: SortOrder,
        page: Option<Page>,
        with_scores: bool,
    ) -> Result<RangeItems, StoreError> {
        self.with_keyspace("range_by_score", |keyspace| {
            let Some(set) = sorted_set(keyspace, key, "ZRANGEBYSCORE")? else {
                return Ok(RangeItems::empty(with_scores));
            };
            let matching = ordered(set, order)
                .into_iter()
                .filter(|item| range.contains(item.score));
            let selected: Vec<ScoredMember> = match page {
                Some(page) => matching
                    .skip(page.offset as usize)
                    .take(page.limit as usize)
                    .collect(),
                None => matching.collect(),
            };
            Ok(RangeItems::from_scored(selected, with_scores))
        })
    }

    async fn add(&self, key: &str, member: &str, score: f64) -> Result<bool, StoreError> {
        self.with_keyspace("add", |keyspace| {
            let entry = keyspace
                .entry(key.to_string())
                .or_insert_with(|| Entry::persistent(Value::SortedSet(HashMap::new())));
            match &mut entry.value {
                Value::SortedSet(set) => Ok(set.insert(member.to_string(), score).is_none()),
                _ => Err(StoreError::command("ZADD", WRONGTYPE)),
            }
        })
    }

    async fn remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with_keyspace("remove", |keyspace| {
            let Some(entry) = keyspace.get_mut(key) else {
                return Ok(false);
            };
            let Value::SortedSet(set) = &mut entry.value else {
                return Err(StoreError::command("ZREM", WRONGTYPE));
            };
            let removed = set.remove(member).is_some();
            if set.is_empty() {
                keyspace.remove(key);
            }
            Ok(removed)
        })
    }
}

#[async_trait]
impl BitmapStore for MemoryStore {
    async fn assign_offset(
        &self,
        id_to_offset: &str,
        offset_to_id: &str,
        counter: &str,
        id: &str,
    ) -> Result<u64, StoreError> {
        self.with_keyspace("assign_offset", |keyspace| {
            let known = hash_mut(keyspace, id_to_offset, "HGET")?.get(id).cloned();
            if let Some(offset) = known {
                return offset
                    .parse::<u64>()
                    .map_err(|err| StoreError::protocol(format!("bad offset `{offset}`: {err}")));
            }

            let next = match keyspace
                .entry(counter.to_string())
                .or_insert_with(|| Entry::persistent(Value::Counter(0)))
            {
                Entry {
                    value: Value::Counter(value),
                    ..
                } => {
                    *value += 1;
                    *value
                }
                _ => return Err(StoreError::command("INCR", WRONGTYPE)),
            };
            let offset = u64::try_from(next - 1)
                .map_err(|_| StoreError::protocol(format!("negative offset for `{id}`")))?;

            hash_mut(keyspace, id_to_offset, "HSET")?.insert(id.to_string(), offset.to_string());
            hash_mut(keyspace, offset_to_id, "HSET")?.insert(offset.to_string(), id.to_string());
            Ok(offset)
        })
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.with_keyspace("hash_get", |keyspace| {
            match keyspace.get(key).map(|entry| &entry.value) {
                None => Ok(None),
                Some(Value::Hash(hash)) => Ok(hash.get(field).cloned()),
                Some(_) => Err(StoreError::command("HGET", WRONGTYPE)),
            }
        })
    }

    async fn counter(&self, key: &str) -> Result<Option<u64>, StoreError> {
        self.with_keyspace("counter", |keyspace| {
            match keyspace.get(key).map(|entry| &entry.value) {
                None => Ok(None),
                Some(Value::Counter(value)) => u64::try_from(*value)
                    .map(Some)
                    .map_err(|_| StoreError::protocol(format!("negative counter {value}"))),
                Some(_) => Err(StoreError::command("GET", WRONGTYPE)),
            }
        })
    }

    async fn set_bit(&self, key: &str, offset: u64, value: bool) -> Result<bool, StoreError> {
        self.with_keyspace("set_bit", |keyspace| {
            let entry = keyspace
                .entry(key.to_string())
                .or_insert_with(|| Entry::persistent(Value::Bitmap(BTreeSet::new())));
            let Value::Bitmap(bits) = &mut entry.value else {
                return Err(StoreError::command("SETBIT", WRONGTYPE));
            };
            let previous = bits.contains(&offset);
            if value {
                bits.insert(offset);
            } else {
                bits.remove(&offset);
            }
            Ok(previous)
        })
    }

    async fn get_bit(&self, key: &str, offset: u64) -> Result<bool, StoreError> {
        self.with_keyspace("get_bit", |keyspace| {
            Ok(bitmap(keyspace, key, "GETBIT")?.is_some_and(|bits| bits.contains(&offset)))
        })
    }

    async fn bit_count(&self, key: &str) -> Result<u64, StoreError> {
        self.with_keyspace("bit_count", |keyspace| {
            Ok(bitmap(keyspace, key, "BITCOUNT")?.map_or(0, |bits| bits.len() as u64))
        })
    }

    async fn bit_or(&self, dest: &str, sources: &[String]) -> Result<u64, StoreError> {
        self.with_keyspace("bit_or", |keyspace| {
            let mut combined = BTreeSet::new();
            let mut found_any = false;
            for source in sources {
                if let Some(bits) = bitmap(keyspace, source, "BITOP")? {
                    found_any = true;
                    combined.extend(bits.iter().copied());
                }
            }
            if !found_any {
                keyspace.remove(dest);
                return Ok(0);
            }
            let len = byte_len(&combined);
            keyspace.insert(dest.to_string(), Entry::persistent(Value::Bitmap(combined)));
            Ok(len)
        })
    }
}
