//! Uniform atomic operations against the shared key-value backend
//!
//! The engine never coordinates through in-process locks: every cross-request
//! decision goes through [`Store::watch`] and [`Store::exec`], an optimistic
//! compare-and-swap over the versions of the watched keys.

use std::collections::HashMap;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use thiserror::Error;
use ticket_reservation_core::TicketError;

mod memory;

pub use memory::MemoryStore;

/// Result of a store operation
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by a [`Store`]
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum StoreError {
    /// The key holds a different kind of value than the operation expects
    #[error("key {0} holds the wrong kind of value")]
    WrongType(String),
    /// The key does not hold an integer
    #[error("value at {0} is not an integer")]
    NotAnInteger(String),
    /// The backend could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A subscription's publisher went away
    #[error("subscription closed")]
    Closed,
}

impl From<StoreError> for TicketError {
    fn from(err: StoreError) -> Self {
        TicketError::Internal(err.to_string())
    }
}

/// One write queued in a [`Batch`]
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Op {
    /// Overwrite a string value, optionally with a TTL
    Set {
        /// Target key
        key: String,
        /// New value
        value: String,
        /// Time to live
        ttl: Option<Duration>,
    },
    /// Remove a key
    Del {
        /// Target key
        key: String,
    },
    /// Append to a list
    RPush {
        /// Target key
        key: String,
        /// Appended element
        value: String,
    },
    /// Drop the head of a list
    LPop {
        /// Target key
        key: String,
    },
    /// Set a hash field
    HSet {
        /// Target key
        key: String,
        /// Field name
        field: String,
        /// Field value
        value: String,
    },
    /// Add a set member
    SAdd {
        /// Target key
        key: String,
        /// Member
        member: String,
    },
    /// Remove a set member
    SRem {
        /// Target key
        key: String,
        /// Member
        member: String,
    },
}

/// Writes applied together by [`Store::exec`]
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Batch {
    ops: Vec<Op>,
}

impl Batch {
    /// An empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue [`Op::Set`]
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>, ttl: Option<Duration>) -> &mut Self {
        self.ops.push(Op::Set {
            key: key.into(),
            value: value.into(),
            ttl,
        });
        self
    }

    /// Queue [`Op::Del`]
    pub fn del(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(Op::Del { key: key.into() });
        self
    }

    /// Queue [`Op::RPush`]
    pub fn rpush(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(Op::RPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Queue [`Op::LPop`]
    pub fn lpop(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(Op::LPop { key: key.into() });
        self
    }

    /// Queue [`Op::HSet`]
    pub fn hset(&mut self, key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(Op::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Queue [`Op::SAdd`]
    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(Op::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    /// Queue [`Op::SRem`]
    pub fn srem(&mut self, key: impl Into<String>, member: impl Into<String>) -> &mut Self {
        self.ops.push(Op::SRem {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The queued writes, in order
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Consume the batch
    pub fn into_ops(self) -> Vec<Op> {
        self.ops
    }
}

/// Versions of the watched keys, captured by [`Store::watch`]
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Watch {
    versions: Vec<(String, u64)>,
}

impl Watch {
    /// Wrap versions captured by a backend
    pub fn new(versions: Vec<(String, u64)>) -> Self {
        Self { versions }
    }

    /// The watched keys and their versions
    pub fn versions(&self) -> &[(String, u64)] {
        &self.versions
    }
}

/// A message received on a pub/sub channel
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
    /// Channel the message was published on
    pub channel: String,
    /// Raw payload
    pub payload: String,
}

/// Live subscription to one channel
///
/// Messages published before [`Store::subscribe`] returned are not seen.
pub struct Subscription {
    channel: String,
    receiver: Receiver<Message>,
}

impl Subscription {
    /// Wrap the receiving end handed out by a backend
    pub fn new(channel: impl Into<String>, receiver: Receiver<Message>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    /// The subscribed channel
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// The underlying receiver, e.g. for `select!`
    pub fn receiver(&self) -> &Receiver<Message> {
        &self.receiver
    }

    /// Take a message if one is queued
    pub fn try_recv(&self) -> Option<Message> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for a message
    pub fn recv_timeout(&self, timeout: Duration) -> StoreResult<Option<Message>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(msg) => Ok(Some(msg)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(StoreError::Closed),
        }
    }
}

/// Key-value backend shared by every engine instance
///
/// Each call is atomic on its own. Multi-key atomicity is only available
/// through [`Store::watch`] + [`Store::exec`]. Keys that lapse by TTL are
/// announced on [`ticket_reservation_core::channels::EXPIRED_KEYS`].
pub trait Store: Send + Sync {
    /// Read a string value
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    /// Write a string value, replacing any TTL
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;
    /// Write a string value only if the key is absent; returns whether it was written
    fn set_nx(&self, key: &str, value: &str) -> StoreResult<bool>;
    /// Remove a key; returns whether it existed
    fn del(&self, key: &str) -> StoreResult<bool>;
    /// Whether the key exists
    fn exists(&self, key: &str) -> StoreResult<bool>;
    /// Remaining time to live, [`None`] if the key is absent or persistent
    fn pttl(&self, key: &str) -> StoreResult<Option<Duration>>;
    /// Increment an integer value (absent counts as 0)
    fn incr(&self, key: &str) -> StoreResult<i64>;
    /// Decrement an integer value (absent counts as 0)
    fn decr(&self, key: &str) -> StoreResult<i64>;

    /// Append to a list; returns the new length
    fn rpush(&self, key: &str, value: &str) -> StoreResult<usize>;
    /// Remove and return the head of a list
    fn lpop(&self, key: &str) -> StoreResult<Option<String>>;
    /// Elements between `start` and `stop` inclusive; negative indices count from the tail
    fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;
    /// Remove the first `count` elements equal to `value`; returns how many were removed
    fn lrem(&self, key: &str, count: usize, value: &str) -> StoreResult<usize>;
    /// Length of a list
    fn llen(&self, key: &str) -> StoreResult<usize>;

    /// Set a hash field; returns whether the field is new
    fn hset(&self, key: &str, field: &str, value: &str) -> StoreResult<bool>;
    /// Read a hash field
    fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;
    /// Read a whole hash
    fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Add a set member; returns whether it is new
    fn sadd(&self, key: &str, member: &str) -> StoreResult<bool>;
    /// Remove a set member; returns whether it was present
    fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;
    /// Whether `member` is in the set
    fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;
    /// Every member of the set, sorted
    fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// Live keys starting with `prefix`, in store order
    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Remember the current versions of `keys`
    fn watch(&self, keys: &[&str]) -> StoreResult<Watch>;
    /// Apply `batch` atomically iff no watched key changed since `watch`
    ///
    /// Returns `false` (and applies nothing) if the watch was invalidated.
    fn exec(&self, watch: &Watch, batch: Batch) -> StoreResult<bool>;

    /// Send `payload` to every current subscriber; returns how many received it
    fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize>;
    /// Start receiving messages published on `channel`
    fn subscribe(&self, channel: &str) -> StoreResult<Subscription>;

    /// Remove keys whose TTL has passed and announce them
    ///
    /// Backends that expire keys on their own return 0.
    fn evict_expired(&self) -> StoreResult<usize> {
        Ok(0)
    }
}
