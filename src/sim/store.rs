use crate::persist::JobStorage;
use crate::sim::jobs::{to_persisted, ActiveJob, JobTable};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::warn;

type Callback = Arc<dyn Fn(&JobTable) + Send + Sync>;
type Subscribers = Mutex<Vec<(u64, Callback)>>;

/// The process-wide table of active jobs, keyed by action id.
///
/// Readers always get an immutable snapshot. Every write clones the table,
/// mutates the clone, persists it, swaps it in and then notifies
/// subscribers, so nobody ever observes a half-applied change.
pub struct JobStore {
    table: watch::Sender<Arc<JobTable>>,
    write_lock: Mutex<()>,
    storage: Arc<dyn JobStorage>,
    subscribers: Arc<Subscribers>,
    next_subscriber: AtomicU64,
}

impl JobStore {
    pub fn new(storage: Arc<dyn JobStorage>) -> Self {
        Self::with_table(storage, JobTable::new())
    }

    pub fn with_table(storage: Arc<dyn JobStorage>, table: JobTable) -> Self {
        let (sender, _) = watch::channel(Arc::new(table));
        Self {
            table: sender,
            write_lock: Mutex::new(()),
            storage,
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber: AtomicU64::new(0),
        }
    }

    pub fn get_job(&self, action_id: &str) -> Option<ActiveJob> {
        self.table.borrow().get(action_id).cloned()
    }

    pub fn snapshot(&self) -> Arc<JobTable> {
        self.table.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.borrow().is_empty()
    }

    /// Applies `mutate` to a copy of the table and publishes the copy.
    /// Writes are serialized; a second update always sees the first one.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut JobTable) -> R) -> R {
        let (result, next) = {
            let _guard = lock(&self.write_lock);
            let current = self.snapshot();
            let mut next = JobTable::clone(&current);
            let result = mutate(&mut next);
            let next = Arc::new(next);
            self.save(&next);
            self.table.send_replace(next.clone());
            (result, next)
        };
        // outside the write lock so callbacks may update the store themselves
        self.notify(&next);
        result
    }

    pub fn insert(&self, job: ActiveJob) -> Option<ActiveJob> {
        self.update(|table| table.insert(job.action_id.clone(), job))
    }

    pub fn remove(&self, action_id: &str) -> Option<ActiveJob> {
        self.update(|table| table.remove(action_id))
    }

    /// Writes the current table to storage without changing it.
    pub fn persist(&self) {
        let _guard = lock(&self.write_lock);
        self.save(&self.snapshot());
    }

    /// Calls `callback` with the new table after every update until the
    /// returned subscription is dropped.
    pub fn subscribe(&self, callback: impl Fn(&JobTable) + Send + Sync + 'static) -> Subscription {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push((id, Arc::new(callback)));
        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Async consumers can await changes instead of registering a callback.
    pub fn watch(&self) -> watch::Receiver<Arc<JobTable>> {
        self.table.subscribe()
    }

    fn save(&self, table: &JobTable) {
        if let Err(err) = self.storage.save(&to_persisted(table)) {
            warn!(error = %err, "failed to persist active jobs");
        }
    }

    fn notify(&self, table: &JobTable) {
        let callbacks: Vec<Callback> = lock(&self.subscribers)
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback(table);
        }
    }
}

pub struct Subscription {
    id: u64,
    subscribers: Weak<Subscribers>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            lock(&subscribers).retain(|(id, _)| *id != self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::MemoryStorage;
    use std::sync::atomic::AtomicUsize;

    fn store() -> (JobStore, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::default());
        (JobStore::new(storage.clone()), storage)
    }

    #[test]
    fn update_persists_eagerly() {
        let (store, storage) = store();
        store.insert(ActiveJob::new("bld.sawmill.l1", "j1", 0, 10.0));
        let saved = storage.snapshot().expect("table persisted");
        assert_eq!(saved["bld.sawmill.l1"].job_id, "j1");

        store.remove("bld.sawmill.l1");
        assert!(storage.snapshot().expect("table persisted").is_empty());
    }

    #[test]
    fn snapshots_are_not_affected_by_later_updates() {
        let (store, _) = store();
        store.insert(ActiveJob::new("a", "j1", 0, 10.0));
        let before = store.snapshot();
        store.update(|table| {
            table.clear();
            table.insert("b".to_string(), ActiveJob::new("b", "j2", 0, 5.0));
        });
        assert!(before.contains_key("a"));
        assert!(store.get_job("a").is_none());
        assert_eq!(store.get_job("b").map(|j| j.job_id), Some("j2".to_string()));
    }

    #[test]
    fn subscribers_hear_updates_until_dropped() {
        let (store, _) = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let subscription = store.subscribe(move |table| {
            assert!(table.contains_key("a"));
            seen.fetch_add(1, Ordering::SeqCst);
        });
        store.insert(ActiveJob::new("a", "j1", 0, 10.0));
        store.update(|_| ());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        store.remove("a");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn watchers_see_latest_table() {
        let (store, _) = store();
        let mut watcher = store.watch();
        store.insert(ActiveJob::new("a", "j1", 0, 10.0));
        watcher.changed().await.expect("store alive");
        assert!(watcher.borrow().contains_key("a"));
    }

    #[test]
    fn update_returns_closure_result() {
        let (store, _) = store();
        store.insert(ActiveJob::new("a", "j1", 0, 10.0));
        let removed = store.update(|table| table.remove("a"));
        assert_eq!(removed.map(|job| job.job_id), Some("j1".to_string()));
    }
}
