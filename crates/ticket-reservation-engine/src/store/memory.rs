//! In-process implementation of the [`Store`]
//!
//! A single mutex guards the whole keyspace, which gives every operation
//! (and every [`Store::exec`]) one linearization point, like the
//! single-threaded store it stands in for.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use ticket_reservation_core::channels;

use super::{Batch, Message, Op, Store, StoreError, StoreResult, Subscription, Watch};

/// Versions of deleted keys kept before they are compacted away
const TOMBSTONE_SLACK: usize = 1024;

enum Value {
    Str(String),
    List(VecDeque<String>),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
}

impl Value {
    fn is_empty_collection(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(list) => list.is_empty(),
            Value::Hash(hash) => hash.is_empty(),
            Value::Set(set) => set.is_empty(),
        }
    }
}

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
}

#[derive(Default)]
struct Keyspace {
    entries: BTreeMap<String, Entry>,
    /// Version of the last write to each key; survives deletion until the
    /// next compaction
    versions: HashMap<String, u64>,
    /// Version of every key missing from `versions`
    floor: u64,
    clock: u64,
    /// Keys that lapsed during the current operation, announced after unlocking
    expired: Vec<String>,
}

impl Keyspace {
    fn bump(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_owned(), self.clock);
    }

    fn expire_if_due(&mut self, key: &str, now: Instant) {
        let due = matches!(
            self.entries.get(key),
            Some(Entry { expires_at: Some(at), .. }) if *at <= now
        );
        if due {
            self.entries.remove(key);
            self.bump(key);
            self.expired.push(key.to_owned());
        }
    }

    fn entry(&mut self, key: &str) -> Option<&mut Entry> {
        self.expire_if_due(key, Instant::now());
        self.entries.get_mut(key)
    }

    fn version(&mut self, key: &str) -> u64 {
        self.expire_if_due(key, Instant::now());
        self.versions.get(key).copied().unwrap_or(self.floor)
    }

    /// Forget the versions of deleted keys once too many piled up
    ///
    /// Raising the floor invalidates every outstanding watch on an absent
    /// key, so a compaction can only cause a spurious conflict, never a
    /// missed one.
    fn compact(&mut self) {
        if self.versions.len() <= self.entries.len() + TOMBSTONE_SLACK {
            return;
        }
        let entries = &self.entries;
        self.versions.retain(|key, _| entries.contains_key(key));
        self.floor = self.clock;
    }

    /// Drop a collection that became empty, like the real store does
    fn prune(&mut self, key: &str) {
        if matches!(self.entries.get(key), Some(e) if e.value.is_empty_collection()) {
            self.entries.remove(key);
        }
    }

    fn string(&mut self, key: &str) -> StoreResult<Option<&mut String>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(StoreError::WrongType(key.to_owned())),
        }
    }

    fn list(&mut self, key: &str) -> StoreResult<Option<&mut VecDeque<String>>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(Some(list)),
            Some(_) => Err(StoreError::WrongType(key.to_owned())),
        }
    }

    fn hash(&mut self, key: &str) -> StoreResult<Option<&mut HashMap<String, String>>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(Some(hash)),
            Some(_) => Err(StoreError::WrongType(key.to_owned())),
        }
    }

    fn set_members(&mut self, key: &str) -> StoreResult<Option<&mut BTreeSet<String>>> {
        match self.entry(key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(Some(set)),
            Some(_) => Err(StoreError::WrongType(key.to_owned())),
        }
    }

    fn or_insert(&mut self, key: &str, empty: fn() -> Value) -> &mut Entry {
        self.expire_if_due(key, Instant::now());
        self.entries
            .entry(key.to_owned())
            .or_insert_with(|| Entry::persistent(empty()))
    }

    fn put(&mut self, key: &str, value: String, ttl: Option<Duration>) {
        let entry = Entry {
            value: Value::Str(value),
            // a TTL too large to represent never lapses
            expires_at: ttl.and_then(|ttl| Instant::now().checked_add(ttl)),
        };
        self.entries.insert(key.to_owned(), entry);
        self.bump(key);
    }

    fn remove(&mut self, key: &str) -> bool {
        self.expire_if_due(key, Instant::now());
        let existed = self.entries.remove(key).is_some();
        if existed {
            self.bump(key);
        }
        existed
    }

    fn add_to(&mut self, key: &str, delta: i64) -> StoreResult<i64> {
        let entry = self.or_insert(key, || Value::Str(String::from("0")));
        let Value::Str(raw) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_owned()));
        };
        let current: i64 = raw
            .parse()
            .map_err(|_| StoreError::NotAnInteger(key.to_owned()))?;
        let next = current + delta;
        *raw = next.to_string();
        self.bump(key);
        Ok(next)
    }

    fn push_back(&mut self, key: &str, value: String) -> StoreResult<usize> {
        let entry = self.or_insert(key, || Value::List(VecDeque::new()));
        let Value::List(list) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_owned()));
        };
        list.push_back(value);
        let len = list.len();
        self.bump(key);
        Ok(len)
    }

    fn pop_front(&mut self, key: &str) -> StoreResult<Option<String>> {
        let head = match self.list(key)? {
            Some(list) => list.pop_front(),
            None => return Ok(None),
        };
        self.prune(key);
        self.bump(key);
        Ok(head)
    }

    fn hash_set(&mut self, key: &str, field: String, value: String) -> StoreResult<bool> {
        let entry = self.or_insert(key, || Value::Hash(HashMap::new()));
        let Value::Hash(hash) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_owned()));
        };
        let new = hash.insert(field, value).is_none();
        self.bump(key);
        Ok(new)
    }

    fn set_add(&mut self, key: &str, member: String) -> StoreResult<bool> {
        let entry = self.or_insert(key, || Value::Set(BTreeSet::new()));
        let Value::Set(set) = &mut entry.value else {
            return Err(StoreError::WrongType(key.to_owned()));
        };
        let new = set.insert(member);
        if new {
            self.bump(key);
        }
        Ok(new)
    }

    fn set_remove(&mut self, key: &str, member: &str) -> StoreResult<bool> {
        let removed = match self.set_members(key)? {
            Some(set) => set.remove(member),
            None => false,
        };
        if removed {
            self.prune(key);
            self.bump(key);
        }
        Ok(removed)
    }

    /// Reject ops that would fail half-way through a batch
    fn check(&mut self, op: &Op) -> StoreResult<()> {
        match op {
            Op::Set { .. } | Op::Del { .. } => Ok(()),
            Op::RPush { key, .. } | Op::LPop { key } => self.list(key).map(drop),
            Op::HSet { key, .. } => self.hash(key).map(drop),
            Op::SAdd { key, .. } | Op::SRem { key, .. } => self.set_members(key).map(drop),
        }
    }

    fn apply(&mut self, op: Op) -> StoreResult<()> {
        match op {
            Op::Set { key, value, ttl } => self.put(&key, value, ttl),
            Op::Del { key } => {
                self.remove(&key);
            }
            Op::RPush { key, value } => {
                self.push_back(&key, value)?;
            }
            Op::LPop { key } => {
                self.pop_front(&key)?;
            }
            Op::HSet { key, field, value } => {
                self.hash_set(&key, field, value)?;
            }
            Op::SAdd { key, member } => {
                self.set_add(&key, member)?;
            }
            Op::SRem { key, member } => {
                self.set_remove(&key, &member)?;
            }
        }
        Ok(())
    }
}

/// Redis-like store living in the current process
///
/// TTLs are enforced lazily on access and actively through
/// [`Store::evict_expired`]; both paths announce the lapsed key on
/// [`channels::EXPIRED_KEYS`].
#[derive(Default)]
pub struct MemoryStore {
    keyspace: Mutex<Keyspace>,
    subscribers: DashMap<String, Vec<Sender<Message>>>,
}

impl MemoryStore {
    /// Create an empty [`MemoryStore`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` under the keyspace lock, then announce keys that lapsed meanwhile
    fn run<R>(&self, f: impl FnOnce(&mut Keyspace) -> R) -> R {
        let (result, expired) = {
            let mut keyspace = self.keyspace.lock();
            let result = f(&mut keyspace);
            keyspace.compact();
            (result, std::mem::take(&mut keyspace.expired))
        };
        for key in expired {
            self.broadcast(channels::EXPIRED_KEYS, &key);
        }
        result
    }

    fn broadcast(&self, channel: &str, payload: &str) -> usize {
        let Some(mut subscribers) = self.subscribers.get_mut(channel) else {
            return 0;
        };
        let msg = Message {
            channel: channel.to_owned(),
            payload: payload.to_owned(),
        };
        subscribers.retain(|sender| sender.send(msg.clone()).is_ok());
        subscribers.len()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.run(|ks| Ok(ks.string(key)?.cloned()))
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.run(|ks| {
            ks.put(key, value.to_owned(), ttl);
            Ok(())
        })
    }

    fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool> {
        self.run(|ks| {
            if ks.entry(key).is_some() {
                return Ok(false);
            }
            ks.put(key, value.to_owned(), None);
            Ok(true)
        })
    }

    fn del(&self, key: &str) -> StoreResult<bool> {
        self.run(|ks| Ok(ks.remove(key)))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.run(|ks| Ok(ks.entry(key).is_some()))
    }

    fn pttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        self.run(|ks| {
            let now = Instant::now();
            Ok(ks
                .entry(key)
                .and_then(|e| e.expires_at)
                .map(|at| at.saturating_duration_since(now)))
        })
    }

    fn incr(&self, key: &str) -> StoreResult<i64> {
        self.run(|ks| ks.add_to(key, 1))
    }

    fn decr(&self, key: &str) -> StoreResult<i64> {
        self.run(|ks| ks.add_to(key, -1))
    }

    fn rpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        self.run(|ks| ks.push_back(key, value.to_owned()))
    }

    fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        self.run(|ks| ks.pop_front(key))
    }

    fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.run(|ks| {
            let Some(list) = ks.list(key)? else {
                return Ok(Vec::new());
            };
            let len = list.len() as isize;
            let start = if start < 0 { (len + start).max(0) } else { start };
            let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
            if start > stop || start >= len {
                return Ok(Vec::new());
            }
            Ok(list
                .range(start as usize..=stop as usize)
                .cloned()
                .collect())
        })
    }

    fn lrem(&self, key: &str, count: usize, value: &str) -> StoreResult<usize> {
        self.run(|ks| {
            let Some(list) = ks.list(key)? else {
                return Ok(0);
            };
            let mut removed = 0;
            list.retain(|item| {
                if removed < count && item == value {
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            if removed > 0 {
                ks.prune(key);
                ks.bump(key);
            }
            Ok(removed)
        })
    }

    fn llen(&self, key: &str) -> StoreResult<usize> {
        self.run(|ks| Ok(ks.list(key)?.map_or(0, |list| list.len())))
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool> {
        self.run(|ks| ks.hash_set(key, field.to_owned(), value.to_owned()))
    }

    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.run(|ks| Ok(ks.hash(key)?.and_then(|hash| hash.get(field).cloned())))
    }

    fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.run(|ks| Ok(ks.hash(key)?.map(|hash| hash.clone()).unwrap_or_default()))
    }

    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.run(|ks| ks.set_add(key, member.to_owned()))
    }

    fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.run(|ks| ks.set_remove(key, member))
    }

    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.run(|ks| Ok(ks.set_members(key)?.is_some_and(|set| set.contains(member))))
    }

    fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.run(|ks| {
            Ok(ks
                .set_members(key)?
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default())
        })
    }

    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.run(|ks| {
            let candidates: Vec<String> = ks
                .entries
                .range(prefix.to_owned()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, _)| key.clone())
                .collect();
            let now = Instant::now();
            for key in &candidates {
                ks.expire_if_due(key, now);
            }
            Ok(candidates
                .into_iter()
                .filter(|key| ks.entries.contains_key(key))
                .collect())
        })
    }

    fn watch(&self, keys: &[&str]) -> StoreResult<Watch> {
        self.run(|ks| {
            let versions = keys
                .iter()
                .map(|key| (key.to_string(), ks.version(key)))
                .collect();
            Ok(Watch::new(versions))
        })
    }

    fn exec(&self, watch: &Watch, batch: Batch) -> StoreResult<bool> {
        self.run(|ks| {
            for (key, version) in watch.versions() {
                if ks.version(key) != *version {
                    return Ok(false);
                }
            }
            for op in batch.ops() {
                ks.check(op)?;
            }
            for op in batch.into_ops() {
                ks.apply(op)?;
            }
            Ok(true)
        })
    }

    fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize> {
        Ok(self.broadcast(channel, payload))
    }

    fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        let (sender, receiver) = unbounded();
        self.subscribers
            .entry(channel.to_owned())
            .or_default()
            .push(sender);
        Ok(Subscription::new(channel, receiver))
    }

    fn evict_expired(&self) -> StoreResult<usize> {
        self.run(|ks| {
            let now = Instant::now();
            let due: Vec<String> = ks
                .entries
                .iter()
                .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &due {
                ks.expire_if_due(key, now);
            }
            Ok(due.len())
        })
    }
}
