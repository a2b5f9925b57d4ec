//! The in-memory keyspace.
//!
//! A [`Store`] owns the logical databases plus the two pieces of cross-cutting
//! bookkeeping that must stay consistent with keyspace mutations: the blocked
//! waiter registry and the SCAN cursor book. Each [`Database`] maps binary
//! keys to typed [`Value`]s, keeps a secondary expiry index, and journals
//! every mutation so the executor can bump WATCH versions, wake blocked
//! clients, and emit keyspace notifications after the command finishes.

pub mod hash;
pub mod list;
pub mod set;
pub mod sorted_set;
pub mod stream;
pub mod string;

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use rand::seq::IteratorRandom;
use thiserror::Error;
use tokio::sync::oneshot;

pub use sorted_set::SortedSet;
pub use stream::Stream;
pub use string::StringValue;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    jiff::Timestamp::now().as_millisecond() as u64
}

/// Errors produced by value operators, independent of any command.
#[derive(Error, Debug, PartialEq)]
pub enum ValueError {
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    #[error("value is not a valid float")]
    NotAFloat,
    #[error("increment or decrement would overflow")]
    Overflow,
    #[error("increment would produce NaN or Infinity")]
    NanOrInfinity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(StringValue),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
    Set(HashSet<Bytes>),
    Zset(SortedSet),
    Stream(Stream),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::Zset(_) => "zset",
            Value::Stream(_) => "stream",
        }
    }

    /// Containers vanish when their last element is removed. Strings are
    /// never "empty containers" and streams persist after XDEL removes the
    /// last entry.
    fn is_empty_container(&self) -> bool {
        match self {
            Value::Str(_) | Value::Stream(_) => false,
            Value::List(list) => list.is_empty(),
            Value::Hash(hash) => hash.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::Zset(zset) => zset.is_empty(),
        }
    }
}

/// One keyspace mutation, journaled for post-command effect processing.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    pub database_index: usize,
    pub key: Bytes,
    pub event: &'static str,
}

#[derive(Debug, Default)]
pub struct Database {
    entries: HashMap<Bytes, Value>,
    expiries: HashMap<Bytes, u64>,
    versions: HashMap<Bytes, u64>,
    journal: Vec<(Bytes, &'static str)>,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    fn is_due(&self, key: &[u8], now: u64) -> bool {
        self.expiries.get(key).is_some_and(|&at| at <= now)
    }

    /// Deletes the key if its TTL is due. Every access path goes through
    /// this, which is what makes expiry lazy.
    pub fn expire_if_due(&mut self, key: &[u8], now: u64) -> bool {
        if !self.is_due(key, now) {
            return false;
        }

        let owned = Bytes::copy_from_slice(key);
        self.entries.remove(key);
        self.expiries.remove(key);
        self.mark_mutated(owned, "expired");
        true
    }

    pub fn read(&mut self, key: &[u8], now: u64) -> Option<&Value> {
        self.expire_if_due(key, now);
        self.entries.get(key)
    }

    /// Mutable access for in-place container edits. The caller must call
    /// [`Database::mark_mutated`] when it actually changed something, and
    /// [`Database::collapse_if_empty`] after removals.
    pub fn write(&mut self, key: &[u8], now: u64) -> Option<&mut Value> {
        self.expire_if_due(key, now);
        self.entries.get_mut(key)
    }

    pub fn contains(&mut self, key: &[u8], now: u64) -> bool {
        self.read(key, now).is_some()
    }

    /// Replaces whatever is at `key` and clears its TTL (plain SET
    /// semantics).
    pub fn set_value(&mut self, key: Bytes, value: Value, event: &'static str) {
        self.expiries.remove(&key);
        self.entries.insert(key.clone(), value);
        self.mark_mutated(key, event);
    }

    /// Replaces the value at `key` but keeps any TTL it had (SET KEEPTTL,
    /// SETRANGE-style updates on fresh values).
    pub fn set_value_keep_ttl(&mut self, key: Bytes, value: Value, event: &'static str) {
        self.entries.insert(key.clone(), value);
        self.mark_mutated(key, event);
    }

    /// Fetches the container at `key`, creating it with `default` when the
    /// key does not exist. Expired keys count as missing.
    pub fn entry_or_insert_with(
        &mut self,
        key: Bytes,
        now: u64,
        default: impl FnOnce() -> Value,
    ) -> &mut Value {
        self.expire_if_due(&key, now);
        self.entries.entry(key).or_insert_with(default)
    }

    pub fn remove(&mut self, key: &[u8], now: u64) -> Option<Value> {
        if self.expire_if_due(key, now) {
            return None;
        }

        let removed = self.entries.remove(key)?;
        self.expiries.remove(key);
        self.mark_mutated(Bytes::copy_from_slice(key), "del");
        Some(removed)
    }

    /// Drops the key when its container emptied out, preserving the
    /// invariant that containers are never present but empty.
    pub fn collapse_if_empty(&mut self, key: &[u8]) {
        if self
            .entries
            .get(key)
            .is_some_and(Value::is_empty_container)
        {
            self.entries.remove(key);
            self.expiries.remove(key);
            self.mark_mutated(Bytes::copy_from_slice(key), "del");
        }
    }

    /// Sets an absolute expiry. Returns false when the key does not exist.
    pub fn set_expiry(&mut self, key: &[u8], at_ms: u64, now: u64) -> bool {
        self.expire_if_due(key, now);
        if !self.entries.contains_key(key) {
            return false;
        }

        let owned = Bytes::copy_from_slice(key);
        if at_ms <= now {
            // Expiring in the past deletes immediately.
            self.entries.remove(key);
            self.expiries.remove(key);
            self.mark_mutated(owned, "del");
        } else {
            self.expiries.insert(owned.clone(), at_ms);
            self.mark_mutated(owned, "expire");
        }
        true
    }

    /// Removes the TTL. Returns true only if the key existed and had one.
    pub fn persist(&mut self, key: &[u8], now: u64) -> bool {
        self.expire_if_due(key, now);
        if !self.entries.contains_key(key) {
            return false;
        }
        let had_ttl = self.expiries.remove(key).is_some();
        if had_ttl {
            self.mark_mutated(Bytes::copy_from_slice(key), "persist");
        }
        had_ttl
    }

    /// TTL probe: `None` = no such key, `Some(None)` = key without TTL,
    /// `Some(Some(ms))` = remaining milliseconds.
    pub fn ttl(&mut self, key: &[u8], now: u64) -> Option<Option<u64>> {
        self.expire_if_due(key, now);
        if !self.entries.contains_key(key) {
            return None;
        }
        Some(self.expiries.get(key).map(|&at| at.saturating_sub(now)))
    }

    pub fn expiry_at(&mut self, key: &[u8], now: u64) -> Option<Option<u64>> {
        self.expire_if_due(key, now);
        if !self.entries.contains_key(key) {
            return None;
        }
        Some(self.expiries.get(key).copied())
    }

    pub fn rename(&mut self, source: &[u8], destination: Bytes, now: u64) -> bool {
        self.expire_if_due(source, now);
        let Some(value) = self.entries.remove(source) else {
            return false;
        };
        let expiry = self.expiries.remove(source);

        self.entries.insert(destination.clone(), value);
        match expiry {
            Some(at) => {
                self.expiries.insert(destination.clone(), at);
            }
            None => {
                self.expiries.remove(&destination);
            }
        }
        self.mark_mutated(Bytes::copy_from_slice(source), "rename_from");
        self.mark_mutated(destination, "rename_to");
        true
    }

    /// Keys that are not past their TTL. Does not trigger lazy deletion.
    pub fn live_keys(&self, now: u64) -> impl Iterator<Item = &Bytes> {
        self.entries
            .keys()
            .filter(move |key| !self.is_due(key, now))
    }

    pub fn len(&self, now: u64) -> usize {
        self.live_keys(now).count()
    }

    pub fn random_key(&self, now: u64) -> Option<Bytes> {
        self.live_keys(now).choose(&mut rand::rng()).cloned()
    }

    pub fn flush(&mut self) {
        self.entries.clear();
        self.expiries.clear();
        // Versions survive so WATCHes across FLUSHDB still abort; bump all.
        for version in self.versions.values_mut() {
            *version += 1;
        }
    }

    /// Current WATCH version of a key. Missing keys report 0 until their
    /// first mutation.
    pub fn version(&self, key: &[u8]) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    pub fn mark_mutated(&mut self, key: Bytes, event: &'static str) {
        *self.versions.entry(key.clone()).or_insert(0) += 1;
        self.journal.push((key, event));
    }

    /// Keys with a TTL, for the active-expiry sampler.
    pub fn keys_with_expiry(&self) -> impl Iterator<Item = &Bytes> {
        self.expiries.keys()
    }

    fn drain_journal(&mut self) -> Vec<(Bytes, &'static str)> {
        std::mem::take(&mut self.journal)
    }
}

/// Why a blocked client woke up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wake {
    /// A key the client waits on may now be servable; retry the operation.
    Ready,
    /// CLIENT UNBLOCK without ERROR: behave exactly like a timeout.
    Timeout,
    /// CLIENT UNBLOCK ERROR, CLIENT KILL, or shutdown.
    Unblocked,
}

#[derive(Debug)]
struct WaiterEntry {
    client_id: u64,
    sender: oneshot::Sender<Wake>,
}

/// The full keyspace: all databases plus waiter and cursor bookkeeping.
///
/// Blocked waits are registered once in `waiter_table` (token → live wake
/// channel) and their token is queued on every key they wait on; waking pops
/// tokens in registration order and delivers through the table, so a
/// multi-key BLPOP is satisfied by whichever key produces data first and the
/// earliest-registered client always wins a race.
#[derive(Debug)]
pub struct Store {
    pub databases: Vec<Database>,
    waiter_queues: HashMap<(usize, Bytes), VecDeque<u64>>,
    waiter_table: HashMap<u64, WaiterEntry>,
    next_waiter_token: u64,
    scan_cursors: ScanBook,
}

impl Store {
    pub fn new(database_count: usize) -> Self {
        Store {
            databases: (0..database_count).map(|_| Database::new()).collect(),
            waiter_queues: HashMap::new(),
            waiter_table: HashMap::new(),
            next_waiter_token: 1,
            scan_cursors: ScanBook::default(),
        }
    }

    pub fn database(&mut self, index: usize) -> &mut Database {
        &mut self.databases[index]
    }

    pub fn database_count(&self) -> usize {
        self.databases.len()
    }

    /// Collects every mutation journaled since the last drain, tagged with
    /// its database index.
    pub fn drain_events(&mut self) -> Vec<MutationEvent> {
        let mut events = Vec::new();
        for (database_index, database) in self.databases.iter_mut().enumerate() {
            for (key, event) in database.drain_journal() {
                events.push(MutationEvent {
                    database_index,
                    key,
                    event,
                });
            }
        }
        events
    }

    /// Registers a blocked wait on each of `keys`. The returned token
    /// identifies the wait for later removal; the receiver fires once with
    /// the wake reason.
    pub fn register_waiter(
        &mut self,
        database_index: usize,
        keys: &[Bytes],
        client_id: u64,
    ) -> (u64, oneshot::Receiver<Wake>) {
        let token = self.next_waiter_token;
        self.next_waiter_token += 1;

        let (sender, receiver) = oneshot::channel();
        self.waiter_table.insert(token, WaiterEntry { client_id, sender });

        for key in keys {
            self.waiter_queues
                .entry((database_index, key.clone()))
                .or_default()
                .push_back(token);
        }

        (token, receiver)
    }

    /// Drops a wait registration (timeout, delivery, disconnect). Queue
    /// entries on the other keys become stale and are swept at wake time.
    pub fn unregister_waiter(&mut self, database_index: usize, keys: &[Bytes], token: u64) {
        self.waiter_table.remove(&token);
        for key in keys {
            if let Some(queue) = self.waiter_queues.get_mut(&(database_index, key.clone())) {
                queue.retain(|&queued| queued != token);
                if queue.is_empty() {
                    self.waiter_queues.remove(&(database_index, key.clone()));
                }
            }
        }
    }

    /// Wakes up to `count` of the earliest live waiters on a key.
    pub fn wake_waiters(&mut self, database_index: usize, key: &Bytes, count: usize) {
        let Some(queue) = self.waiter_queues.get_mut(&(database_index, key.clone())) else {
            return;
        };

        let mut woken = 0;
        while woken < count {
            let Some(token) = queue.pop_front() else {
                break;
            };
            // Tokens already satisfied through another key are gone from the
            // table and skipped here.
            if let Some(entry) = self.waiter_table.remove(&token) {
                if entry.sender.send(Wake::Ready).is_ok() {
                    woken += 1;
                }
            }
        }

        if queue.is_empty() {
            self.waiter_queues.remove(&(database_index, key.clone()));
        }
    }

    /// Forcibly unblocks one client. Returns true when the client had a
    /// blocked wait.
    pub fn unblock_client(&mut self, client_id: u64, wake: Wake) -> bool {
        let tokens: Vec<u64> = self
            .waiter_table
            .iter()
            .filter(|(_, entry)| entry.client_id == client_id)
            .map(|(&token, _)| token)
            .collect();

        let mut found = false;
        for token in tokens {
            if let Some(entry) = self.waiter_table.remove(&token) {
                if entry.sender.send(wake).is_ok() {
                    found = true;
                }
            }
        }
        found
    }

    /// Removes every waiter a disconnecting client left behind.
    pub fn remove_client_waiters(&mut self, client_id: u64) {
        self.waiter_table
            .retain(|_, entry| entry.client_id != client_id);
    }

    pub fn blocked_client_count(&self) -> usize {
        let clients: HashSet<u64> = self
            .waiter_table
            .values()
            .map(|entry| entry.client_id)
            .collect();
        clients.len()
    }

    pub fn open_scan_cursor(&mut self, database_index: usize, now: u64) -> u64 {
        let snapshot = self.databases[database_index]
            .live_keys(now)
            .cloned()
            .collect();
        self.scan_cursors.open(database_index, snapshot)
    }

    pub fn scan_cursor(&mut self, cursor: u64) -> Option<&mut ScanCursor> {
        self.scan_cursors.get(cursor)
    }

    pub fn close_scan_cursor(&mut self, cursor: u64) {
        self.scan_cursors.close(cursor);
    }
}

const MAX_OPEN_CURSORS: usize = 128;

/// Open SCAN iterations. Each cursor snapshots the key list when it is
/// created, which guarantees that keys present for the whole scan are
/// eventually returned; keys churning during the scan may or may not be.
#[derive(Debug, Default)]
pub struct ScanBook {
    next_id: u64,
    cursors: HashMap<u64, ScanCursor>,
}

#[derive(Debug)]
pub struct ScanCursor {
    pub database_index: usize,
    pub keys: Vec<Bytes>,
    pub position: usize,
}

impl ScanBook {
    fn open(&mut self, database_index: usize, keys: Vec<Bytes>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;

        if self.cursors.len() >= MAX_OPEN_CURSORS {
            // Abandoned cursors pile up when clients never finish a scan.
            if let Some(&oldest) = self.cursors.keys().min() {
                self.cursors.remove(&oldest);
            }
        }

        self.cursors.insert(
            id,
            ScanCursor {
                database_index,
                keys,
                position: 0,
            },
        );
        id
    }

    fn get(&mut self, id: u64) -> Option<&mut ScanCursor> {
        self.cursors.get_mut(&id)
    }

    fn close(&mut self, id: u64) {
        self.cursors.remove(&id);
    }
}
