//! Work queue
//!
//! A FIFO of object keys shared by the controller's workers. A key is queued
//! at most once (duplicate adds coalesce) and is never handed to two workers
//! at the same time: adding a key that is being processed parks it until the
//! worker calls [`WorkQueue::done`]. A key has at most one pending delayed
//! add: the earliest deadline wins and an immediate add cancels it.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::models::ObjectKey;

/// Exponential backoff for failed keys: `base * 2^(failures - 1)`, capped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ObjectKey>,
    /// Keys waiting to be processed, queued or parked behind a running pass
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    /// Deadline of the one pending delayed add per key
    waiting: HashMap<ObjectKey, Instant>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

/// De-duplicating, per-key serialized work queue
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    retry: RetryPolicy,
}

impl WorkQueue {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            state: Mutex::default(),
            notify: Notify::new(),
            retry,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a key unless it is already waiting
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        state.waiting.remove(&key);
        if state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.notify.notify_one();
    }

    /// Queue a key once `delay` has elapsed. Of two pending deadlines for the
    /// same key only the earlier one is kept.
    pub fn add_after(self: &Arc<Self>, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            if state.waiting.get(&key).is_some_and(|pending| *pending <= deadline) {
                return;
            }
            state.waiting.insert(key.clone(), deadline);
        }

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            queue.fire(key, deadline);
        });
    }

    /// Timer callback: queue `key` unless its deadline was superseded
    fn fire(&self, key: ObjectKey, deadline: Instant) {
        {
            let mut state = self.state();
            if state.waiting.get(&key) != Some(&deadline) {
                return;
            }
            state.waiting.remove(&key);
        }
        self.add(key);
    }

    /// Whether `key` has a delayed add pending
    pub fn is_waiting(&self, key: &ObjectKey) -> bool {
        self.state().waiting.contains_key(key)
    }

    /// Record a failure for `key` and queue it after the backoff delay.
    /// Returns the delay used.
    pub fn add_rate_limited(self: &Arc<Self>, key: ObjectKey) -> Duration {
        let failures = {
            let mut state = self.state();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures = failures.saturating_add(1);
            *failures
        };
        let delay = self.retry.delay(failures);
        self.add_after(key, delay);
        delay
    }

    /// Reset the failure count of `key`
    pub fn forget(&self, key: &ObjectKey) {
        self.state().failures.remove(key);
    }

    /// Consecutive failures recorded for `key`
    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as no longer being processed, requeueing it if it was
    /// added meanwhile
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shutdown(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            state.waiting.clear();
        }
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys ready to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new("default", name)
    }

    #[test]
    fn test_retry_policy_delay() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(30),
        };
        assert_eq!(policy.delay(1), Duration::from_millis(5));
        assert_eq!(policy.delay(2), Duration::from_millis(10));
        assert_eq!(policy.delay(3), Duration::from_millis(20));
        assert_eq!(policy.delay(4), Duration::from_millis(30));
        assert_eq!(policy.delay(200), Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_add_coalesces_duplicates() {
        let queue = WorkQueue::default();
        queue.add(key("a"));
        queue.add(key("a"));
        queue.add(key("b"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.get().await, Some(key("a")));
        assert_eq!(queue.get().await, Some(key("b")));
    }

    #[tokio::test]
    async fn test_key_in_progress_is_parked_until_done() {
        let queue = WorkQueue::default();
        queue.add(key("a"));
        let first = queue.get().await;
        assert_eq!(first, Some(key("a")));

        queue.add(key("a"));
        assert!(queue.is_empty());

        queue.done(&key("a"));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(key("a")));
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let queue = Arc::new(WorkQueue::default());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shutdown();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add(key("a"));
        assert!(queue.is_empty());
    }
}
