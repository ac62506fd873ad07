//! Per-key population gate for read-through loads.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes work per key. A slot counts everyone holding or waiting on
/// it and is dropped when that count reaches zero, so the map only contains
/// keys with a load in progress.
pub(crate) struct KeyGate<K> {
    slots: Mutex<HashMap<K, Slot>>,
}

struct Slot {
    lock: Arc<AsyncMutex<()>>,
    users: usize,
}

impl<K: Eq + Hash + Clone> KeyGate<K> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) async fn enter(&self, key: K) -> GatePass<'_, K> {
        let lock = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                lock: Arc::default(),
                users: 0,
            });
            slot.users += 1;
            Arc::clone(&slot.lock)
        };
        // checked in before waiting: a waiter dropped mid-wait still checks out
        let mut pass = GatePass {
            gate: self,
            key,
            guard: None,
        };
        pass.guard = Some(lock.lock_owned().await);
        pass
    }

    #[cfg(test)]
    pub(crate) fn open_slots(&self) -> usize {
        self.slots.lock().len()
    }
}

pub(crate) struct GatePass<'a, K: Eq + Hash> {
    gate: &'a KeyGate<K>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash> Drop for GatePass<'_, K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut slots = self.gate.slots.lock();
        let Some(slot) = slots.get_mut(&self.key) else {
            return;
        };
        slot.users -= 1;
        if slot.users == 0 {
            slots.remove(&self.key);
        }
    }
}
