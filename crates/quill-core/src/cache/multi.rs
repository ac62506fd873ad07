//! Chain of caches, fastest first.
//!
//! Reads check levels in order and copy a hit into every faster level.
//! Writes go to all levels; each level applies its own size limit and
//! expiry, so a value too large for level 0 can still live in level 1.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tracing::debug;

use super::gate::KeyGate;
use super::size::Weigh;
use super::stats::CacheStats;
use super::store::{Cache, SetOptions};
use crate::config::CacheConfig;
use crate::error::CacheError;

pub struct MultiLevelCache<K, V> {
    levels: Vec<Cache<K, V>>,
    gate: Arc<KeyGate<K>>,
}

impl<K, V> Clone for MultiLevelCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            levels: self.levels.clone(),
            gate: Arc::clone(&self.gate),
        }
    }
}

impl<K, V> MultiLevelCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Weigh + Clone + Send + Sync + 'static,
{
    pub fn new(levels: Vec<Cache<K, V>>) -> Result<Self, CacheError> {
        if levels.is_empty() {
            return Err(CacheError::NoLevels);
        }
        Ok(Self {
            levels,
            gate: Arc::new(KeyGate::new()),
        })
    }

    pub fn from_configs(configs: &[CacheConfig]) -> Result<Self, CacheError> {
        Self::new(configs.iter().cloned().map(Cache::new).collect())
    }

    pub fn levels(&self) -> &[Cache<K, V>] {
        &self.levels
    }

    /// Check each level in order. A hit at level `i` is written into levels
    /// `0..i` with their default options.
    pub fn get(&self, key: &K) -> Option<V> {
        for (depth, level) in self.levels.iter().enumerate() {
            if let Some(value) = level.get(key) {
                if depth > 0 {
                    debug!(level = depth, "promoting cache hit to faster levels");
                    for faster in &self.levels[..depth] {
                        faster.set(key.clone(), value.clone(), SetOptions::default());
                    }
                }
                return Some(value);
            }
        }
        None
    }

    /// Write to every level. Returns `true` if at least one level kept it.
    pub fn set(&self, key: K, value: V, options: SetOptions) -> bool {
        let mut stored = false;
        for level in &self.levels {
            stored |= level.set(key.clone(), value.clone(), options);
        }
        stored
    }

    pub fn has(&self, key: &K) -> bool {
        self.levels.iter().any(|level| level.has(key))
    }

    /// Remove from every level. Returns `true` if any level held the key.
    pub fn delete(&self, key: &K) -> bool {
        let mut deleted = false;
        for level in &self.levels {
            deleted |= level.delete(key);
        }
        deleted
    }

    pub fn clear(&self) {
        for level in &self.levels {
            level.clear();
        }
    }

    pub fn mget<'a>(&self, keys: impl IntoIterator<Item = &'a K>) -> HashMap<K, V>
    where
        K: 'a,
    {
        keys.into_iter()
            .filter_map(|key| self.get(key).map(|value| (key.clone(), value)))
            .collect()
    }

    /// Per-item options. Returns how many items at least one level kept.
    pub fn mset(&self, items: impl IntoIterator<Item = (K, V, SetOptions)>) -> usize {
        items
            .into_iter()
            .map(|(key, value, options)| self.set(key, value, options))
            .filter(|stored| *stored)
            .count()
    }

    /// Read through the chain; on a full miss run `factory` once per key and
    /// write its value to every level.
    pub async fn get_or_set<F, Fut>(&self, key: K, factory: F, options: SetOptions) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let _pass = self.gate.enter(key.clone()).await;
        if let Some(value) = self.levels.iter().find_map(|level| level.peek(&key)) {
            return value;
        }
        let value = factory().await;
        self.set(key, value.clone(), options);
        value
    }

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
        let _pass = self.gate.enter(key.clone()).await;
        if let Some(value) = self.levels.iter().find_map(|level| level.peek(&key)) {
            return Ok(value);
        }
        let value = factory().await?;
        self.set(key, value.clone(), options);
        Ok(value)
    }

    pub fn purge_expired(&self) -> usize {
        self.levels.iter().map(Cache::purge_expired).sum()
    }

    pub fn start_sweepers(&self) {
        for level in &self.levels {
            level.start_sweeper();
        }
    }

    pub fn stop(&self) {
        for level in &self.levels {
            level.stop();
        }
    }

    /// Stats per level, fastest first.
    pub fn stats(&self) -> Vec<CacheStats> {
        self.levels.iter().map(Cache::stats).collect()
    }
}
