//! Run-or-attach memoization for expensive calls.
//!
//! The first caller for a key runs the task; callers arriving while it is in
//! flight wait for the same result instead of starting their own. Finished
//! results are served until they are older than the configured time to live.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::OnceCell;

struct Slot<V> {
    cell: Arc<OnceCell<(Instant, V)>>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cell
            .get()
            .is_some_and(|(finished_at, _)| finished_at.elapsed() >= ttl)
    }
}

pub struct TaskRecycler<K, V> {
    ttl: Duration,
    slots: DashMap<K, Slot<V>>,
}

impl<K, V> TaskRecycler<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn attach(&self, key: K) -> Arc<OnceCell<(Instant, V)>> {
        let mut slot = self.slots.entry(key).or_insert_with(Slot::new);
        if slot.is_expired(self.ttl) {
            *slot = Slot::new();
        }
        Arc::clone(&slot.cell)
    }

    pub async fn run_or_attach<F, Fut>(&self, key: K, task: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        // The map guard must be released before awaiting.
        let cell = self.attach(key);
        let (_, value) = cell
            .get_or_init(|| async move {
                let value = task().await;
                (Instant::now(), value)
            })
            .await;
        value.clone()
    }

    pub fn invalidate(&self, key: &K) {
        self.slots.remove(key);
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}

impl<K, T, E> TaskRecycler<K, Result<T, E>>
where
    K: Eq + Hash + Clone,
    T: Clone,
    E: Clone,
{
    /// Like [`TaskRecycler::run_or_attach`], but a failed result is handed to
    /// every attached caller and then forgotten so the next call retries.
    pub async fn run_or_attach_ok<F, Fut>(&self, key: K, task: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = self.attach(key.clone());
        let (_, value) = cell
            .get_or_init(|| async move {
                let value = task().await;
                (Instant::now(), value)
            })
            .await;
        let value = value.clone();

        if value.is_err() {
            self.slots
                .remove_if(&key, |_, slot| Arc::ptr_eq(&slot.cell, &cell));
        }
        value
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::TaskRecycler;

    async fn counted(calls: Arc<AtomicUsize>) -> usize {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        call
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_run() {
        let recycler = TaskRecycler::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));

        let (first, second) = tokio::join!(
            recycler.run_or_attach("installed", || counted(Arc::clone(&calls))),
            recycler.run_or_attach("installed", || counted(Arc::clone(&calls))),
        );

        assert_eq!(first, 1);
        assert_eq!(second, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn finished_results_are_reused_until_they_expire() {
        let fresh = TaskRecycler::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        fresh.run_or_attach("k", || counted(Arc::clone(&calls))).await;
        assert_eq!(fresh.run_or_attach("k", || counted(Arc::clone(&calls))).await, 1);

        let expired = TaskRecycler::new(Duration::ZERO);
        let calls = Arc::new(AtomicUsize::new(0));
        expired.run_or_attach("k", || counted(Arc::clone(&calls))).await;
        assert_eq!(expired.run_or_attach("k", || counted(Arc::clone(&calls))).await, 2);
    }

    #[tokio::test]
    async fn failures_are_not_memoized() {
        let recycler: TaskRecycler<&str, Result<usize, String>> =
            TaskRecycler::new(Duration::from_secs(60));

        let failed = recycler
            .run_or_attach_ok("k", || async { Err("catalog offline".to_string()) })
            .await;
        assert!(failed.is_err());

        let recovered = recycler.run_or_attach_ok("k", || async { Ok(7) }).await;
        assert_eq!(recovered, Ok(7));

        let cached = recycler.run_or_attach_ok("k", || async { Ok(8) }).await;
        assert_eq!(cached, Ok(7));
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_run() {
        let recycler = TaskRecycler::new(Duration::from_secs(60));
        let calls = Arc::new(AtomicUsize::new(0));
        recycler.run_or_attach("k", || counted(Arc::clone(&calls))).await;

        recycler.invalidate(&"k");
        assert_eq!(recycler.run_or_attach("k", || counted(Arc::clone(&calls))).await, 2);
    }
}
