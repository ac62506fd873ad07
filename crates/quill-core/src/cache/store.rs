//! Single-level cache.
//!
//! Entries live in a `HashMap`; recency is a `BTreeMap` from a monotonically
//! increasing access tick to key, so the least recently used key is always
//! the first entry. Map, order, size total, and counters share one lock.
//! Dispose callbacks and events run after the lock is released.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::events::{CacheEvent, DisposeReason};
use super::gate::KeyGate;
use super::size::Weigh;
use super::stats::CacheStats;
use crate::config::CacheConfig;
use crate::domain::task::deadline_after;

/// Called once for every entry that leaves the cache.
pub type DisposeFn<K, V> = Arc<dyn Fn(&K, V, DisposeReason) + Send + Sync>;

/// Per-entry overrides for `set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    /// Lifetime of this entry; falls back to the cache's `max_age`.
    pub max_age: Option<Duration>,
    /// Size to account instead of the `Weigh` estimate.
    pub size: Option<usize>,
}

impl SetOptions {
    pub fn max_age(max_age: Duration) -> Self {
        Self {
            max_age: Some(max_age),
            size: None,
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
    max_age: Option<Duration>,
    last_accessed_at: Instant,
    size: usize,
    tick: u64,
}

impl<V> Entry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

type Removed<K, V> = Vec<(K, V, DisposeReason)>;

struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Access tick -> key; first is least recently used.
    order: BTreeMap<u64, K>,
    next_tick: u64,
    current_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K: Eq + Hash + Clone, V: Clone> State<K, V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            next_tick: 0,
            current_size: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn insert(&mut self, key: K, value: V, size: usize, max_age: Option<Duration>, now: Instant) {
        let tick = self.tick();
        self.order.insert(tick, key.clone());
        self.current_size += size;
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: max_age.map(|age| deadline_after(now, age)),
                max_age,
                last_accessed_at: now,
                size,
                tick,
            },
        );
    }

    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        self.current_size -= entry.size;
        Some(entry)
    }

    fn pop_lru(&mut self) -> Option<(K, Entry<V>)> {
        let (_, key) = self.order.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.current_size -= entry.size;
        Some((key, entry))
    }

    /// Mark `key` most recently used and return its value.
    fn touch(&mut self, key: &K, now: Instant, refresh_age: bool) -> Option<V> {
        let tick = self.tick();
        let entry = self.entries.get_mut(key)?;
        self.order.remove(&entry.tick);
        self.order.insert(tick, key.clone());
        entry.tick = tick;
        entry.last_accessed_at = now;
        if refresh_age && let Some(age) = entry.max_age {
            entry.expires_at = Some(deadline_after(now, age));
        }
        Some(entry.value.clone())
    }
}

pub struct Cache<K, V> {
    inner: Arc<CacheInner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CacheInner<K, V> {
    config: CacheConfig,
    state: Mutex<State<K, V>>,
    dispose: Option<DisposeFn<K, V>>,
    events: broadcast::Sender<CacheEvent<K>>,
    gate: KeyGate<K>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> Drop for CacheInner<K, V> {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.get_mut().take() {
            sweeper.abort();
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Weigh + Clone + Send + Sync + 'static,
{
    /// Build a cache. When `max_age_ms` is set and a Tokio runtime is
    /// current, the expiry sweeper starts right away; otherwise call
    /// `start_sweeper` once inside a runtime.
    pub fn new(config: CacheConfig) -> Self {
        Self::build(config, None)
    }

    /// Like `new`, with a callback for every removed entry.
    pub fn with_dispose(
        config: CacheConfig,
        dispose: impl Fn(&K, V, DisposeReason) + Send + Sync + 'static,
    ) -> Self {
        Self::build(config, Some(Arc::new(dispose)))
    }

    fn build(config: CacheConfig, dispose: Option<DisposeFn<K, V>>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let cache = Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(State::new()),
                gate: KeyGate::new(),
                sweeper: Mutex::new(None),
                config,
                dispose,
                events,
            }),
        };
        if cache.inner.config.max_age_ms.is_some()
            && tokio::runtime::Handle::try_current().is_ok()
        {
            cache.start_sweeper();
        }
        cache
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<K>> {
        self.inner.events.subscribe()
    }

    /// Store `value` under `key`. Returns `false`, storing nothing, when the
    /// value alone exceeds `max_size`.
    pub fn set(&self, key: K, value: V, options: SetOptions) -> bool {
        let size = options.size.unwrap_or_else(|| value.weigh());
        let max_size = self.inner.config.max_size;
        if size > max_size {
            debug!(size, max_size, "cache rejected value larger than capacity");
            self.emit(CacheEvent::Reject { key, size });
            return false;
        }

        let now = Instant::now();
        let max_age = options.max_age.or_else(|| self.inner.config.max_age());
        let mut removed = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if let Some(old) = state.remove(&key) {
                removed.push((key.clone(), old.value, DisposeReason::Replaced));
            }
            while state.current_size + size > max_size {
                let Some((lru_key, entry)) = state.pop_lru() else {
                    break;
                };
                state.evictions += 1;
                removed.push((lru_key, entry.value, DisposeReason::Evicted));
            }
            state.insert(key.clone(), value, size, max_age, now);
        }

        if removed.len() > 1 {
            debug!(evicted = removed.len(), "cache evicted entries to make room");
        }
        self.release(removed);
        self.emit(CacheEvent::Set { key, size });
        true
    }

    /// Look up `key`, marking it most recently used.
    ///
    /// An expired entry is a miss and is removed, unless `stale` is set; then
    /// its value is still returned and the entry stays until the next sweep.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let config = &self.inner.config;
        let mut removed = Vec::new();
        let value = {
            let mut state = self.inner.state.lock();
            match state.entries.get(key).map(|entry| entry.is_expired(now)) {
                None => {
                    state.misses += 1;
                    None
                }
                Some(true) if !config.stale => {
                    if let Some(entry) = state.remove(key) {
                        removed.push((key.clone(), entry.value, DisposeReason::Expired));
                    }
                    state.evictions += 1;
                    state.misses += 1;
                    None
                }
                Some(expired) => {
                    state.hits += 1;
                    state.touch(key, now, config.update_age_on_get && !expired)
                }
            }
        };

        self.release(removed);
        let key = key.clone();
        self.emit(match value {
            Some(_) => CacheEvent::Hit { key },
            None => CacheEvent::Miss { key },
        });
        value
    }

    /// Read without touching recency or statistics.
    pub fn peek(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let state = self.inner.state.lock();
        let entry = state.entries.get(key)?;
        if entry.is_expired(now) && !self.inner.config.stale {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Whether `get` would return a value, without its side effects.
    /// Expired entries count as absent unless `stale` is set; either way they
    /// are left for `get` or the sweeper to remove.
    pub fn has(&self, key: &K) -> bool {
        let now = Instant::now();
        let stale = self.inner.config.stale;
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| stale || !entry.is_expired(now))
    }

    pub fn delete(&self, key: &K) -> bool {
        let entry = self.inner.state.lock().remove(key);
        let Some(entry) = entry else {
            return false;
        };
        self.release(vec![(key.clone(), entry.value, DisposeReason::Deleted)]);
        self.emit(CacheEvent::Delete { key: key.clone() });
        true
    }

    pub fn clear(&self) {
        let removed: Removed<K, V> = {
            let mut state = self.inner.state.lock();
            state.order.clear();
            state.current_size = 0;
            state
                .entries
                .drain()
                .map(|(key, entry)| (key, entry.value, DisposeReason::Cleared))
                .collect()
        };
        let count = removed.len();
        self.release(removed);
        self.emit(CacheEvent::Clear { removed: count });
    }

    /// `get` for each key; missing keys are absent from the result.
    pub fn mget<'a>(&self, keys: impl IntoIterator<Item = &'a K>) -> HashMap<K, V>
    where
        K: 'a,
    {
        keys.into_iter()
            .filter_map(|key| self.get(key).map(|value| (key.clone(), value)))
            .collect()
    }

    /// `set` for each item with its own options; returns how many were stored.
    pub fn mset(&self, items: impl IntoIterator<Item = (K, V, SetOptions)>) -> usize {
        items
            .into_iter()
            .map(|(key, value, options)| self.set(key, value, options))
            .filter(|stored| *stored)
            .count()
    }

    /// Read-through: return the cached value or compute, store, and return it.
    ///
    /// Concurrent callers missing on the same key wait for one factory run
    /// instead of each running their own.
    pub async fn get_or_set<F, Fut>(&self, key: K, factory: F, options: SetOptions) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let _pass = self.inner.gate.enter(key.clone()).await;
        if let Some(value) = self.peek(&key) {
            return value;
        }
        let value = factory().await;
        self.set(key, value.clone(), options);
        value
    }

    /// `get_or_set` with a fallible factory. Errors are returned and nothing
    /// is cached.
    pub async fn try_get_or_set<F, Fut, E>(
        &self,
        key: K,
        factory: F,
        options: SetOptions,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let _pass = self.inner.gate.enter(key.clone()).await;
        if let Some(value) = self.peek(&key) {
            return Ok(value);
        }
        let value = factory().await?;
        self.set(key, value.clone(), options);
        Ok(value)
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let removed: Removed<K, V> = {
            let mut state = self.inner.state.lock();
            let expired: Vec<K> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            let removed: Removed<K, V> = expired
                .into_iter()
                .filter_map(|key| {
                    let entry = state.remove(&key)?;
                    Some((key, entry.value, DisposeReason::Expired))
                })
                .collect();
            state.evictions += removed.len() as u64;
            removed
        };

        let count = removed.len();
        if count > 0 {
            debug!(count, "cache purged expired entries");
        }
        self.release(removed);
        count
    }

    /// Start the background expiry sweep, every `min(max_age, 60s)`.
    /// Calling it again while a sweeper runs does nothing.
    pub fn start_sweeper(&self) {
        let mut sweeper = self.inner.sweeper.lock();
        if sweeper.is_some() {
            return;
        }
        let period = self.inner.config.sweep_interval();
        info!(interval_ms = period.as_millis() as u64, "starting cache sweeper");
        *sweeper = Some(spawn_sweeper(Arc::downgrade(&self.inner), period));
    }

    /// Stop the sweeper and drop every entry.
    pub fn stop(&self) {
        let sweeper = self.inner.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        self.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        let (hit_rate, miss_rate) = CacheStats::rates(state.hits, state.misses);
        CacheStats {
            size: state.entries.len(),
            memory_usage: state.current_size,
            max_size: self.inner.config.max_size,
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            hit_rate,
            miss_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Time since `key` was last read or written, if present.
    pub fn idle_time(&self, key: &K) -> Option<Duration> {
        let state = self.inner.state.lock();
        state
            .entries
            .get(key)
            .map(|entry| entry.last_accessed_at.elapsed())
    }

    /// Dispose removed entries and announce the ones the cache dropped itself.
    fn release(&self, removed: Removed<K, V>) {
        for (key, value, reason) in removed {
            if matches!(
                reason,
                DisposeReason::Evicted | DisposeReason::Expired | DisposeReason::Replaced
            ) {
                self.emit(CacheEvent::Evict {
                    key: key.clone(),
                    reason,
                });
            }
            if let Some(dispose) = &self.inner.dispose {
                dispose(&key, value, reason);
            }
        }
    }

    fn emit(&self, event: CacheEvent<K>) {
        if self.inner.events.receiver_count() > 0 {
            let _ = self.inner.events.send(event);
        }
    }
}

fn spawn_sweeper<K, V>(cache: Weak<CacheInner<K, V>>, period: Duration) -> JoinHandle<()>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Weigh + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(inner) = cache.upgrade() else {
                break;
            };
            Cache { inner }.purge_expired();
        }
    })
}
