//! InMemoryStore - single-process SharedStore for development and tests
//!
//! Mirrors the Redis data model closely enough that the queue cannot tell the
//! difference: typed values per key, empty collections disappear, strings can
//! carry an expiry, and `transact` runs under one lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rand::seq::IteratorRandom;

use crate::ports::{Clock, Guard, Op, SharedStore, StoreError, SystemClock, Transaction, TxnOutcome};

#[derive(Debug, Clone)]
enum Entry {
    Str { value: String, expire_at: Option<i64> },
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    ZSet(HashMap<String, i64>),
    List(VecDeque<String>),
}

impl Entry {
    fn is_empty(&self) -> bool {
        match self {
            Entry::Str { .. } => false,
            Entry::Hash(h) => h.is_empty(),
            Entry::Set(s) => s.is_empty(),
            Entry::ZSet(z) => z.is_empty(),
            Entry::List(l) => l.is_empty(),
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        matches!(self, Entry::Str { expire_at: Some(at), .. } if *at <= now)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
}

impl State {
    fn entry(&self, key: &str, now: i64) -> Option<&Entry> {
        self.entries.get(key).filter(|e| !e.is_expired(now))
    }

    fn hash(&self, key: &str, now: i64) -> Result<Option<&HashMap<String, String>>, StoreError> {
        match self.entry(key, now) {
            None => Ok(None),
            Some(Entry::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn set(&self, key: &str, now: i64) -> Result<Option<&HashSet<String>>, StoreError> {
        match self.entry(key, now) {
            None => Ok(None),
            Some(Entry::Set(s)) => Ok(Some(s)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn zset(&self, key: &str, now: i64) -> Result<Option<&HashMap<String, i64>>, StoreError> {
        match self.entry(key, now) {
            None => Ok(None),
            Some(Entry::ZSet(z)) => Ok(Some(z)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    fn list(&self, key: &str, now: i64) -> Result<Option<&VecDeque<String>>, StoreError> {
        match self.entry(key, now) {
            None => Ok(None),
            Some(Entry::List(l)) => Ok(Some(l)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    /// Get or create the entry at `key`, dropping it first if it has expired.
    fn slot(&mut self, key: &str, now: i64, init: fn() -> Entry) -> &mut Entry {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
        self.entries.entry(key.to_string()).or_insert_with(init)
    }

    fn check(&self, guard: &Guard, now: i64) -> Result<bool, StoreError> {
        Ok(match guard {
            Guard::KeyAbsent(key) => self.entry(key, now).is_none(),
            Guard::HashFieldEquals { key, field, value } => self
                .hash(key, now)?
                .and_then(|h| h.get(field))
                .is_some_and(|v| v == value),
            Guard::SetContains { key, member } => {
                self.set(key, now)?.is_some_and(|s| s.contains(member))
            }
            Guard::ScoreEquals { key, member, score } => {
                self.zset(key, now)?.and_then(|z| z.get(member)).copied() == *score
            }
            Guard::ListNotEmpty(key) => self.list(key, now)?.is_some_and(|l| !l.is_empty()),
            Guard::Empty(key) => self.entry(key, now).is_none_or(Entry::is_empty),
        })
    }

    /// Type-check an op against the current value so a transaction never
    /// fails halfway through.
    fn precheck(&self, op: &Op, now: i64) -> Result<(), StoreError> {
        match op {
            Op::HashSet { key, .. } | Op::HashDelete { key, .. } => self.hash(key, now).map(drop),
            Op::SetAdd { key, .. } | Op::SetRemove { key, .. } => self.set(key, now).map(drop),
            Op::ZAdd { key, .. } | Op::ZRemove { key, .. } => self.zset(key, now).map(drop),
            Op::ListPush { key, .. } => self.list(key, now).map(drop),
            Op::ListPopToZSet { list, zset, .. } => {
                self.list(list, now)?;
                self.zset(zset, now).map(drop)
            }
            Op::StringSet { .. } | Op::Delete(_) => Ok(()),
        }
    }

    /// Infallible once every op passed `precheck`.
    fn apply(&mut self, op: Op, now: i64, popped: &mut Vec<String>) {
        let touched: Vec<String> = match op {
            Op::HashSet { key, fields } => {
                if let Entry::Hash(h) = self.slot(&key, now, || Entry::Hash(HashMap::new())) {
                    h.extend(fields);
                }
                vec![key]
            }
            Op::HashDelete { key, fields } => {
                if let Some(Entry::Hash(h)) = self.entries.get_mut(&key) {
                    for field in &fields {
                        h.remove(field);
                    }
                }
                vec![key]
            }
            Op::SetAdd { key, member } => {
                if let Entry::Set(s) = self.slot(&key, now, || Entry::Set(HashSet::new())) {
                    s.insert(member);
                }
                vec![key]
            }
            Op::SetRemove { key, member } => {
                if let Some(Entry::Set(s)) = self.entries.get_mut(&key) {
                    s.remove(&member);
                }
                vec![key]
            }
            Op::ZAdd { key, member, score } => {
                if let Entry::ZSet(z) = self.slot(&key, now, || Entry::ZSet(HashMap::new())) {
                    z.insert(member, score);
                }
                vec![key]
            }
            Op::ZRemove { key, member } => {
                if let Some(Entry::ZSet(z)) = self.entries.get_mut(&key) {
                    z.remove(&member);
                }
                vec![key]
            }
            Op::ListPush { key, member } => {
                if let Entry::List(l) = self.slot(&key, now, || Entry::List(VecDeque::new())) {
                    l.push_back(member);
                }
                vec![key]
            }
            Op::ListPopToZSet { list, zset, score } => {
                let head = match self.entries.get_mut(&list) {
                    Some(Entry::List(l)) => l.pop_front(),
                    _ => None,
                };
                if let Some(member) = head {
                    if let Entry::ZSet(z) = self.slot(&zset, now, || Entry::ZSet(HashMap::new())) {
                        z.insert(member.clone(), score);
                    }
                    popped.push(member);
                }
                vec![list, zset]
            }
            Op::StringSet {
                key,
                value,
                expire_at,
            } => {
                self.entries
                    .insert(key.clone(), Entry::Str { value, expire_at });
                vec![key]
            }
            Op::Delete(key) => {
                self.entries.remove(&key);
                Vec::new()
            }
        };

        for key in touched {
            if self.entries.get(&key).is_some_and(Entry::is_empty) {
                self.entries.remove(&key);
            }
        }
    }
}

/// InMemoryStore is a `SharedStore` living inside one process.
///
/// Several `Queue`s sharing one `Arc<InMemoryStore>` behave like several
/// processes sharing one Redis, which is how the cluster tests run.
///
/// # Usage
/// ```ignore
/// let store = Arc::new(InMemoryStore::with_clock(TokioClock::new()));
/// let a = Queue::builder(store.clone()).build();
/// let b = Queue::builder(store.clone()).build();
/// ```
pub struct InMemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    offline: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock: Arc::new(clock),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Live keys, sorted. Meant for assertions.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> Result<(MutexGuard<'_, State>, i64), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        let state = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("lock poisoned".to_string()))?;
        Ok((state, self.clock.now_ms()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn now(&self) -> Result<i64, StoreError> {
        let (_state, now) = self.lock()?;
        Ok(now)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state.entry(key, now).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let (state, now) = self.lock()?;
        match state.entry(key, now) {
            None => Ok(None),
            Some(Entry::Str { value, .. }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state.hash(key, now)?.and_then(|h| h.get(field).cloned()))
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let (state, now) = self.lock()?;
        let hash = state.hash(key, now)?;
        Ok(fields
            .iter()
            .map(|f| hash.and_then(|h| h.get(*f).cloned()))
            .collect())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state.hash(key, now)?.cloned().unwrap_or_default())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state
            .set(key, now)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state.set(key, now)?.is_some_and(|s| s.contains(member)))
    }

    async fn srandmember(&self, key: &str) -> Result<Option<String>, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state
            .set(key, now)?
            .and_then(|s| s.iter().choose(&mut rand::thread_rng()).cloned()))
    }

    async fn scard(&self, key: &str) -> Result<usize, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state.set(key, now)?.map_or(0, HashSet::len))
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state.zset(key, now)?.and_then(|z| z.get(member).copied()))
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
        limit: Option<usize>,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let (state, now) = self.lock()?;
        let Some(zset) = state.zset(key, now)? else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<(String, i64)> = zset
            .iter()
            .filter(|(_, s)| (min..=max).contains(*s))
            .map(|(m, s)| (m.clone(), *s))
            .collect();
        hits.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        if let Some(limit) = limit {
            hits.truncate(limit);
        }
        Ok(hits)
    }

    async fn zcard(&self, key: &str) -> Result<usize, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state.zset(key, now)?.map_or(0, HashMap::len))
    }

    async fn lrange(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state
            .list(key, now)?
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn llen(&self, key: &str) -> Result<usize, StoreError> {
        let (state, now) = self.lock()?;
        Ok(state.list(key, now)?.map_or(0, VecDeque::len))
    }

    async fn transact(&self, txn: Transaction) -> Result<TxnOutcome, StoreError> {
        let (mut state, now) = self.lock()?;
        for guard in &txn.guards {
            if !state.check(guard, now)? {
                return Ok(TxnOutcome::Aborted);
            }
        }
        for op in &txn.ops {
            state.precheck(op, now)?;
        }
        let mut popped = Vec::new();
        for op in txn.ops {
            state.apply(op, now, &mut popped);
        }
        Ok(TxnOutcome::Committed { popped })
    }
}
