//! The per-controller FIFO work queue (§4.4, §5): a watcher callback enqueues a key;
//! a single worker task dequeues and reconciles. A key already in flight is marked
//! for one more pass instead of being queued twice, so "a burst of updates for the
//! same object collapses to reconcile at least once more" (§5).
//!
//! Per-key backoff (`backon::ExponentialBackoff`) is kept in a table generic over an
//! arbitrary key type rather than Kubernetes object identity alone, since pod keys
//! fold in the UID to distinguish a delete-then-recreate from an update.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};
use tokio::sync::{Mutex, Notify};
use tokio::time::Duration;

const MAX_BACKOFF: Duration = Duration::from_secs(5 * 60);

struct QueueState<K> {
    order: VecDeque<K>,
    queued: HashSet<K>,
    in_flight: HashSet<K>,
    redo: HashSet<K>,
}

/// A deduplicating FIFO queue of keys, one per controller (§4.4).
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                order: VecDeque::new(),
                queued: HashSet::new(),
                in_flight: HashSet::new(),
                redo: HashSet::new(),
            }),
            notify: Notify::new(),
        })
    }

    pub async fn depth(&self) -> i64 {
        let state = self.state.lock().await;
        (state.queued.len() + state.in_flight.len()) as i64
    }

    /// Enqueue `key`. A no-op if `key` is already waiting; if `key` is currently
    /// being reconciled, records that it must be reconciled again once that pass
    /// finishes instead of running two reconciliations concurrently.
    pub async fn enqueue(self: &Arc<Self>, key: K) {
        let mut state = self.state.lock().await;
        if state.in_flight.contains(&key) {
            state.redo.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            state.order.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Enqueue `key` after `delay` without blocking the caller, used for backoff
    /// requeues (§7 `TransientBackendError`).
    pub fn enqueue_after(self: &Arc<Self>, key: K, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(key).await;
        });
    }

    /// Block until a key is available, marking it in flight.
    pub async fn dequeue(self: &Arc<Self>) -> K {
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(key) = state.order.pop_front() {
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                    return key;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Mark `key`'s reconciliation complete. If another enqueue arrived while it was
    /// in flight, re-queues it once more (§5 "collapses to reconcile at least once
    /// more").
    pub async fn finish(self: &Arc<Self>, key: K) {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&key);
        if state.redo.remove(&key) && state.queued.insert(key.clone()) {
            state.order.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }
}

/// Per-key exponential backoff (§7 `TransientBackendError` recovery), grounded on
/// the teacher's `get_backoff`/`reset_backoff` pair.
pub struct BackoffTable<K> {
    policies: Mutex<HashMap<K, ExponentialBackoff>>,
}

impl<K> BackoffTable<K>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            policies: Mutex::new(HashMap::new()),
        }
    }

    /// Next backoff duration for `key`, creating a fresh policy on first failure.
    /// Sequence: 1s, 2s, 4s, ..., capped at 5 minutes.
    pub async fn next_delay(&self, key: &K) -> Duration {
        let mut policies = self.policies.lock().await;
        if let Some(backoff) = policies.get_mut(key) {
            if let Some(duration) = backoff.next() {
                return duration;
            }
        }
        let mut backoff = ExponentialBuilder::default()
            .with_max_delay(MAX_BACKOFF)
            .without_max_times()
            .build();
        let duration = backoff.next().expect("first backoff step is always Some");
        policies.insert(key.clone(), backoff);
        duration
    }

    /// Reset `key`'s backoff policy after a successful reconciliation.
    pub async fn reset(&self, key: &K) {
        self.policies.lock().await.remove(key);
    }
}

impl<K> Default for BackoffTable<K>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn repeated_enqueue_while_in_flight_collapses_to_one_redo() {
        let queue: Arc<WorkQueue<&'static str>> = WorkQueue::new();
        queue.enqueue("a").await;
        let key = queue.dequeue().await;
        assert_eq!(key, "a");

        // bursts while "a" is in flight
        queue.enqueue("a").await;
        queue.enqueue("a").await;
        assert_eq!(queue.depth().await, 1);

        queue.finish("a").await;
        assert_eq!(queue.depth().await, 1);
        assert_eq!(queue.dequeue().await, "a");
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let queue: Arc<WorkQueue<&'static str>> = WorkQueue::new();
        queue.enqueue("a").await;
        queue.enqueue("b").await;
        assert_eq!(queue.depth().await, 2);
    }

    #[tokio::test]
    async fn backoff_increases_then_resets() {
        let table: BackoffTable<&'static str> = BackoffTable::new();
        let first = table.next_delay(&"a").await;
        let second = table.next_delay(&"a").await;
        assert!(second >= first);
        table.reset(&"a").await;
        let after_reset = table.next_delay(&"a").await;
        assert_eq!(after_reset, first);
    }
}
