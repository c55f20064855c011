//! In-memory store with Redis-like primitives.
//!
//! All state sits behind one lock that is held for the whole evaluation of a
//! script, so a script is atomic with respect to every other script, whatever
//! keys it touches. A script that fails has all of its writes undone before
//! the lock is released.

use std::collections::{BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::error::{RateLimitError, Result, StorageError};
use crate::script::{Script, ScriptArg, ScriptInput};
use crate::storage::{ScoreRange, Storage, StoreOps};

/// Garbage collection interval configuration.
///
/// Expired keys are always invisible to scripts; collection only reclaims
/// their memory.
#[derive(Debug, Clone)]
pub enum GcInterval {
    /// Purge expired keys every N script evaluations.
    Requests(u64),
    /// Only purge when [`MemoryStorage::purge_expired`] is called.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Requests(10000)
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Default)]
pub struct GcConfig {
    /// When to trigger GC.
    pub interval: GcInterval,
}

impl GcConfig {
    /// Create config with request-based GC.
    pub fn on_requests(count: u64) -> Self {
        Self {
            interval: GcInterval::Requests(count),
        }
    }

    /// Create config with manual GC only.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
        }
    }
}

/// In-memory store.
///
/// # Example
///
/// ```ignore
/// use skp_distlimit::clock::ManualClock;
/// use skp_distlimit::storage::{GcConfig, MemoryStorage};
///
/// // Wall clock, GC every 10000 evaluations
/// let storage = MemoryStorage::new();
///
/// // Simulated time shared with the limiter
/// let clock = ManualClock::new(0);
/// let storage = MemoryStorage::with_clock(clock.clone());
///
/// // Manual GC only
/// let storage = MemoryStorage::with_gc(GcConfig::manual());
/// storage.purge_expired();
/// ```
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
    gc_config: GcConfig,
    request_count: AtomicU64,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("entries", &self.data.lock().len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Create a new store on the system clock with default GC configuration.
    pub fn new() -> Self {
        Self::from_parts(SystemClock, GcConfig::default())
    }

    /// Create a new store with custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        Self::from_parts(SystemClock, gc_config)
    }

    /// Create a new store whose expiries follow `clock`.
    pub fn with_clock(clock: impl Clock) -> Self {
        Self::from_parts(clock, GcConfig::default())
    }

    /// Create a new store from a clock and GC configuration.
    pub fn from_parts(clock: impl Clock, gc_config: GcConfig) -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            clock: Arc::new(clock),
            gc_config,
            request_count: AtomicU64::new(0),
        }
    }

    /// Remove expired keys. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_nanos();
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|_, entry| entry.is_live(now));
        before - data.len()
    }

    /// Get the number of keys currently held, including expired ones not
    /// yet collected.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// Check if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    /// Clear all keys.
    pub fn clear(&self) {
        self.data.lock().clear();
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now_nanos();
        let data = self.data.lock();
        let mut keys: Vec<String> = data
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remaining time to live of a key, if it is live and has an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_nanos();
        let data = self.data.lock();
        let entry = data.get(key).filter(|entry| entry.is_live(now))?;
        let expires_at = entry.expires_at?;
        Some(Duration::from_nanos((expires_at - now) as u64))
    }

    /// Members of a live set, or of a live sorted set in score order.
    pub fn members(&self, key: &str) -> Vec<String> {
        let now = self.clock.now_nanos();
        let data = self.data.lock();
        match data.get(key).filter(|entry| entry.is_live(now)).map(|e| &e.value) {
            Some(Value::Set(set)) => set.iter().cloned().collect(),
            Some(Value::SortedSet(zset)) => zset.ordered.iter().map(|(_, m)| m.clone()).collect(),
            _ => Vec::new(),
        }
    }

    /// A field of a live hash.
    pub fn hash_field(&self, key: &str, field: &str) -> Option<String> {
        let now = self.clock.now_nanos();
        let data = self.data.lock();
        match data.get(key).filter(|entry| entry.is_live(now)).map(|e| &e.value) {
            Some(Value::Hash(hash)) => hash.get(field).cloned(),
            _ => None,
        }
    }

    /// Check if GC should run and run it if needed.
    fn maybe_run_gc(&self) {
        if let GcInterval::Requests(threshold) = self.gc_config.interval {
            let count = self.request_count.fetch_add(1, Ordering::Relaxed);
            if threshold > 0 && count > 0 && count % threshold == 0 {
                self.purge_expired();
            }
        }
    }

    fn eval_locked(&self, script: &Script, keys: &[String], args: &[ScriptArg]) -> Result<Vec<i64>> {
        let now = self.clock.now_nanos();
        let mut data = self.data.lock();
        let mut ops = MemoryOps {
            data: &mut data,
            now,
            journal: HashMap::new(),
        };

        let input = ScriptInput::new(script.name(), keys, args);
        let result = script.run_native(&mut ops, &input);
        if result.is_err() {
            ops.rollback();
        }
        result
    }
}

impl Storage for MemoryStorage {
    async fn eval(&self, script: &'static Script, keys: &[String], args: &[ScriptArg]) -> Result<Vec<i64>> {
        self.maybe_run_gc();
        self.eval_locked(script, keys, args)
    }
}

/// Internal entry with expiration tracking.
#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<i64>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_live(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    SortedSet(SortedSet),
    Set(BTreeSet<String>),
}

/// Total order over scores so they can key a `BTreeSet`.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn insert(&mut self, score: f64, member: &str) -> bool {
        let previous = self.scores.insert(member.to_string(), score);
        if let Some(old) = previous {
            self.ordered.remove(&(Score(old), member.to_string()));
        }
        self.ordered.insert((Score(score), member.to_string()));
        previous.is_none()
    }

    /// Entries whose scores fall in `range`, in score order.
    fn within<'a>(&'a self, range: &'a ScoreRange) -> impl Iterator<Item = &'a (Score, String)> {
        let start = match range.min {
            Bound::Included(min) | Bound::Excluded(min) => Bound::Included((Score(min), String::new())),
            Bound::Unbounded => Bound::Unbounded,
        };
        self.ordered
            .range((start, Bound::Unbounded))
            .skip_while(move |(score, _)| matches!(range.min, Bound::Excluded(min) if score.0 == min))
            .take_while(move |(score, _)| range.contains(score.0))
    }

    fn remove_range(&mut self, range: &ScoreRange) -> u64 {
        let doomed: Vec<(Score, String)> = self.within(range).cloned().collect();
        for item in &doomed {
            self.ordered.remove(item);
            self.scores.remove(&item.1);
        }
        doomed.len() as u64
    }

    fn count(&self, range: &ScoreRange) -> u64 {
        self.within(range).count() as u64
    }

    fn first_score(&self) -> Option<f64> {
        self.ordered.first().map(|(score, _)| score.0)
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }
}

fn wrong_type(key: &str) -> RateLimitError {
    StorageError::WrongType { key: key.to_string() }.into()
}

fn secs_to_nanos(seconds: u64) -> i64 {
    i64::try_from(seconds)
        .unwrap_or(i64::MAX)
        .saturating_mul(1_000_000_000)
}

/// Primitive operations of one script evaluation, with an undo journal.
struct MemoryOps<'a> {
    data: &'a mut HashMap<String, Entry>,
    now: i64,
    journal: HashMap<String, Option<Entry>>,
}

impl MemoryOps<'_> {
    fn lookup(&self, key: &str) -> Option<&Value> {
        self.data
            .get(key)
            .filter(|entry| entry.is_live(self.now))
            .map(|entry| &entry.value)
    }

    /// Record a key's state before its first mutation.
    fn remember(&mut self, key: &str) {
        if !self.journal.contains_key(key) {
            let original = self.data.get(key).cloned();
            self.journal.insert(key.to_string(), original);
        }
    }

    /// Live value for writing, created with `fresh` if missing or expired.
    fn slot(&mut self, key: &str, fresh: fn() -> Value) -> &mut Value {
        self.remember(key);
        let now = self.now;
        let entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(fresh()));
        if !entry.is_live(now) {
            *entry = Entry::new(fresh());
        }
        &mut entry.value
    }

    fn live_entry_mut(&mut self, key: &str) -> Option<&mut Entry> {
        self.remember(key);
        let now = self.now;
        self.data.get_mut(key).filter(|entry| entry.is_live(now))
    }

    fn rollback(self) {
        for (key, original) in self.journal {
            match original {
                Some(entry) => {
                    self.data.insert(key, entry);
                }
                None => {
                    self.data.remove(&key);
                }
            }
        }
    }
}

impl StoreOps for MemoryOps<'_> {
    fn hmget(&mut self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        match self.lookup(key) {
            None => Ok(vec![None; fields.len()]),
            Some(Value::Hash(hash)) => Ok(fields.iter().map(|f| hash.get(*f).cloned()).collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn hset(&mut self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        match self.slot(key, || Value::Hash(HashMap::new())) {
            Value::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert(field.to_string(), value.clone());
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    fn get(&mut self, key: &str) -> Result<Option<String>> {
        match self.lookup(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn incr(&mut self, key: &str) -> Result<i64> {
        let not_an_integer = || RateLimitError::from(StorageError::NotAnInteger { key: key.to_string() });
        match self.slot(key, || Value::Str("0".to_string())) {
            Value::Str(s) => {
                let current: i64 = s.parse().map_err(|_| not_an_integer())?;
                let next = current.checked_add(1).ok_or_else(not_an_integer)?;
                *s = next.to_string();
                Ok(next)
            }
            _ => Err(wrong_type(key)),
        }
    }

    fn zadd(&mut self, key: &str, score: f64, member: &str) -> Result<bool> {
        match self.slot(key, || Value::SortedSet(SortedSet::default())) {
            Value::SortedSet(zset) => Ok(zset.insert(score, member)),
            _ => Err(wrong_type(key)),
        }
    }

    fn zremrangebyscore(&mut self, key: &str, range: ScoreRange) -> Result<u64> {
        let (removed, emptied) = match self.live_entry_mut(key).map(|entry| &mut entry.value) {
            None => return Ok(0),
            Some(Value::SortedSet(zset)) => {
                let removed = zset.remove_range(&range);
                (removed, zset.len() == 0)
            }
            Some(_) => return Err(wrong_type(key)),
        };
        if emptied {
            self.data.remove(key);
        }
        Ok(removed)
    }

    fn zcard(&mut self, key: &str) -> Result<u64> {
        match self.lookup(key) {
            None => Ok(0),
            Some(Value::SortedSet(zset)) => Ok(zset.len() as u64),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn zcount(&mut self, key: &str, range: ScoreRange) -> Result<u64> {
        match self.lookup(key) {
            None => Ok(0),
            Some(Value::SortedSet(zset)) => Ok(zset.count(&range)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn zfirst_score(&mut self, key: &str) -> Result<Option<f64>> {
        match self.lookup(key) {
            None => Ok(None),
            Some(Value::SortedSet(zset)) => Ok(zset.first_score()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn sadd(&mut self, key: &str, member: &str) -> Result<bool> {
        match self.slot(key, || Value::Set(BTreeSet::new())) {
            Value::Set(set) => Ok(set.insert(member.to_string())),
            _ => Err(wrong_type(key)),
        }
    }

    fn srem(&mut self, key: &str, member: &str) -> Result<bool> {
        let (removed, emptied) = match self.live_entry_mut(key).map(|entry| &mut entry.value) {
            None => return Ok(false),
            Some(Value::Set(set)) => {
                let removed = set.remove(member);
                (removed, set.is_empty())
            }
            Some(_) => return Err(wrong_type(key)),
        };
        if emptied {
            self.data.remove(key);
        }
        Ok(removed)
    }

    fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        match self.lookup(key) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.lookup(key).is_some())
    }

    fn expire(&mut self, key: &str, seconds: u64) -> Result<bool> {
        let expires_at = self.now.saturating_add(secs_to_nanos(seconds));
        let Some(entry) = self.live_entry_mut(key) else {
            return Ok(false);
        };
        if seconds == 0 {
            self.data.remove(key);
        } else {
            entry.expires_at = Some(expires_at);
        }
        Ok(true)
    }
}
