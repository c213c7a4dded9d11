//! In-process [`SharedStore`] with lazy per-key expiry.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::{SharedStore, StoreError, StoreResult, Subscription};

/// Buffered messages per pub/sub channel before slow subscribers lag.
const CHANNEL_CAPACITY: usize = 1024;

enum Value {
    Str(String),
    Set(BTreeSet<String>),
    List(VecDeque<String>),
}

struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| Instant::now() + t),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Thread-safe in-memory store.
///
/// Expired keys are dropped when touched and by
/// [`SharedStore::purge_expired`], which the coordinator runs periodically.
/// Uses `tokio::time::Instant`, so TTLs follow a paused test clock.
pub struct MemoryStore {
    slots: Mutex<HashMap<String, Slot>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    closed: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.lock().values().filter(|s| !s.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every pub/sub channel (subscribers see end-of-stream) and
    /// reject further calls.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.channels.lock().clear();
        tracing::debug!("memory store closed");
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    /// Run `f` with the map locked and `key` guaranteed not to be expired.
    fn with_slots<T>(&self, key: &str, f: impl FnOnce(&mut HashMap<String, Slot>) -> T) -> T {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        if slots.get(key).is_some_and(|s| s.is_expired(now)) {
            slots.remove(key);
        }
        f(&mut slots)
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.ensure_open()
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.ensure_open()?;
        self.with_slots(key, |slots| match slots.get(key).map(|s| &s.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_owned())),
        })
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        self.ensure_open()?;
        self.slots
            .lock()
            .insert(key.to_owned(), Slot::new(Value::Str(value), ttl));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<bool> {
        self.ensure_open()?;
        self.with_slots(key, |slots| {
            if slots.contains_key(key) {
                return Ok(false);
            }
            slots.insert(key.to_owned(), Slot::new(Value::Str(value), ttl));
            Ok(true)
        })
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.with_slots(key, |slots| slots.contains_key(key)))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.with_slots(key, |slots| slots.remove(key).is_some()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.with_slots(key, |slots| match slots.get_mut(key) {
            Some(slot) => {
                slot.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }))
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        self.with_slots(key, |slots| {
            let slot = slots
                .entry(key.to_owned())
                .or_insert_with(|| Slot::new(Value::Set(BTreeSet::new()), None));
            match &mut slot.value {
                Value::Set(set) => Ok(set.insert(member.to_owned())),
                _ => Err(StoreError::WrongType(key.to_owned())),
            }
        })
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.ensure_open()?;
        self.with_slots(key, |slots| match slots.get_mut(key).map(|s| &mut s.value) {
            Some(Value::Set(set)) => Ok(set.remove(member)),
            Some(_) => Err(StoreError::WrongType(key.to_owned())),
            None => Ok(false),
        })
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        self.with_slots(key, |slots| match slots.get(key).map(|s| &s.value) {
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_owned())),
            None => Ok(Vec::new()),
        })
    }

    async fn lpush(&self, key: &str, value: String) -> StoreResult<usize> {
        self.ensure_open()?;
        self.with_slots(key, |slots| {
            let slot = slots
                .entry(key.to_owned())
                .or_insert_with(|| Slot::new(Value::List(VecDeque::new()), None));
            match &mut slot.value {
                Value::List(list) => {
                    list.push_front(value);
                    Ok(list.len())
                }
                _ => Err(StoreError::WrongType(key.to_owned())),
            }
        })
    }

    async fn ltrim(&self, key: &str, keep: usize) -> StoreResult<()> {
        self.ensure_open()?;
        self.with_slots(key, |slots| match slots.get_mut(key).map(|s| &mut s.value) {
            Some(Value::List(list)) => {
                list.truncate(keep);
                Ok(())
            }
            Some(_) => Err(StoreError::WrongType(key.to_owned())),
            None => Ok(()),
        })
    }

    async fn lrange(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        self.ensure_open()?;
        self.with_slots(key, |slots| match slots.get(key).map(|s| &s.value) {
            Some(Value::List(list)) => Ok(list.iter().take(limit).cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_owned())),
            None => Ok(Vec::new()),
        })
    }

    async fn publish(&self, channel: &str, payload: String) -> StoreResult<usize> {
        self.ensure_open()?;
        let sender = self.channels.lock().get(channel).cloned();
        // `send` only fails when nobody is listening.
        Ok(sender.and_then(|tx| tx.send(payload).ok()).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<Subscription> {
        self.ensure_open()?;
        let rx = self
            .channels
            .lock()
            .entry(channel.to_owned())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Ok(Subscription::new(channel, rx))
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        self.ensure_open()?;
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, s| !s.is_expired(now));
        Ok(before - slots.len())
    }
}
