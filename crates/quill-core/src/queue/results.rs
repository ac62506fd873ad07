//! Result store and per-task completion waiters.
//!
//! Both live behind one lock so that "check for a stored result, else
//! register a waiter" cannot race with a task finishing in between.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::domain::task::deadline_after;
use crate::domain::{TaskId, TaskResult};

struct StoredResult {
    result: TaskResult,
    expires_at: Option<Instant>,
}

pub(crate) struct ResultStore {
    enabled: bool,
    ttl: Option<Duration>,
    results: HashMap<TaskId, StoredResult>,
    waiters: HashMap<TaskId, Vec<oneshot::Sender<TaskResult>>>,
}

impl ResultStore {
    pub(crate) fn new(enabled: bool, ttl: Option<Duration>) -> Self {
        Self {
            enabled,
            ttl,
            results: HashMap::new(),
            waiters: HashMap::new(),
        }
    }

    /// Hand a finished result to its waiters and keep it if storage is on.
    pub(crate) fn publish(&mut self, result: TaskResult, now: Instant) {
        if let Some(waiters) = self.waiters.remove(&result.task_id) {
            for waiter in waiters {
                // receiver gone means the caller timed out already
                let _ = waiter.send(result.clone());
            }
        }
        if self.enabled {
            let expires_at = self.ttl.map(|ttl| deadline_after(now, ttl));
            self.results
                .insert(result.task_id, StoredResult { result, expires_at });
        }
    }

    pub(crate) fn get(&mut self, id: &TaskId, now: Instant) -> Option<TaskResult> {
        let expired = self
            .results
            .get(id)?
            .expires_at
            .is_some_and(|at| at <= now);
        if expired {
            self.results.remove(id);
            return None;
        }
        self.results.get(id).map(|stored| stored.result.clone())
    }

    pub(crate) fn subscribe(&mut self, id: TaskId) -> oneshot::Receiver<TaskResult> {
        let (tx, rx) = oneshot::channel();
        self.waiters.entry(id).or_default().push(tx);
        rx
    }

    /// Drop waiters whose receiver is gone.
    pub(crate) fn forget_closed(&mut self, id: &TaskId) {
        if let Some(waiters) = self.waiters.get_mut(id) {
            waiters.retain(|w| !w.is_closed());
            if waiters.is_empty() {
                self.waiters.remove(id);
            }
        }
    }

    pub(crate) fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.results.len();
        self.results
            .retain(|_, stored| stored.expires_at.is_none_or(|at| at > now));
        before - self.results.len()
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self, id: &TaskId) -> usize {
        self.waiters.get(id).map_or(0, Vec::len)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.results.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use chrono::{DateTime, Utc};
    use ulid::Ulid;

    fn result(id: TaskId) -> TaskResult {
        TaskResult::completed(
            id,
            TaskType::new("t"),
            serde_json::json!(1),
            DateTime::<Utc>::UNIX_EPOCH,
            0,
        )
    }

    #[test]
    fn stored_results_expire() {
        let mut store = ResultStore::new(true, Some(Duration::from_secs(10)));
        let id = TaskId::from_ulid(Ulid::new());
        let now = Instant::now();

        store.publish(result(id), now);
        assert!(store.get(&id, now + Duration::from_secs(9)).is_some());
        assert!(store.get(&id, now + Duration::from_secs(10)).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn disabled_store_still_wakes_waiters() {
        let mut store = ResultStore::new(false, None);
        let id = TaskId::from_ulid(Ulid::new());
        let mut rx = store.subscribe(id);

        store.publish(result(id), Instant::now());
        assert_eq!(rx.try_recv().unwrap().task_id, id);
        assert!(store.get(&id, Instant::now()).is_none());
        assert_eq!(store.waiter_count(&id), 0);
    }

    #[test]
    fn closed_waiters_are_forgotten() {
        let mut store = ResultStore::new(true, None);
        let id = TaskId::from_ulid(Ulid::new());
        let rx = store.subscribe(id);
        let _live = store.subscribe(id);
        drop(rx);

        store.forget_closed(&id);
        assert_eq!(store.waiter_count(&id), 1);
    }

    #[test]
    fn purge_removes_only_expired() {
        let mut store = ResultStore::new(true, Some(Duration::from_secs(1)));
        let now = Instant::now();
        let old = TaskId::from_ulid(Ulid::new());
        let fresh = TaskId::from_ulid(Ulid::new());
        store.publish(result(old), now);
        store.publish(result(fresh), now + Duration::from_secs(1));

        assert_eq!(store.purge_expired(now + Duration::from_secs(1)), 1);
        assert_eq!(store.len(), 1);
    }
}
