//! # Work Queue
//!
//! Deduplicating, rate-limited work queue, one per resource kind.
//!
//! - A key is handed to at most one [`WorkQueue::get`] caller until [`WorkQueue::done`].
//! - Adding a key that is already pending is a no-op.
//! - Adding a key that is being processed marks it dirty; it is re-queued once on `done`.
//! - [`WorkQueue::add_rate_limited`] delays the re-add by `base * 2^failures`, capped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;

use crate::controller::backoff::ExponentialBackoff;
use crate::controller::QueueKey;

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<QueueKey>,
    /// Keys that need processing: queued, or re-added while in flight
    dirty: HashSet<QueueKey>,
    processing: HashSet<QueueKey>,
    failures: HashMap<QueueKey, u32>,
    shutting_down: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    notify: Notify,
    backoff: ExponentialBackoff,
}

/// Cheaply clonable handle to a shared queue
#[derive(Debug, Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `key` unless it is already pending
    pub fn add(&self, key: QueueKey) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next key and mark it as processing
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<QueueKey> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent shut_down cannot be missed
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Processing of `key` finished; re-queue it if it was added meanwhile
    pub fn done(&self, key: &QueueKey) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Re-add `key` after its per-key exponential backoff and count the failure
    pub fn add_rate_limited(&self, key: QueueKey) {
        let delay = {
            let mut state = self.state();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.inner.backoff.delay(*failures);
            *failures += 1;
            delay
        };
        self.add_after(key, delay);
    }

    /// Add `key` once `delay` has elapsed
    pub fn add_after(&self, key: QueueKey, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Reset the failure counter of `key`
    pub fn forget(&self, key: &QueueKey) {
        self.state().failures.remove(key);
    }

    /// Number of failures recorded for `key`
    pub fn num_requeues(&self, key: &QueueKey) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Stop accepting keys; `get` drains what is queued, then returns `None`
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys waiting to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
