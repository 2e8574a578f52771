//! The state update queue.
//!
//! A multi-producer, single-consumer FIFO of tagged `(field, value)`
//! updates. Producers push from any thread; one consumer drains the whole
//! queue once per tick and applies it, so the fields it owns are never
//! written by two sources within the same tick.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::state::{Scalar, SharedState};
use crate::sync::lock;

/// One pending write to a scalar field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateUpdate {
    /// Field to write.
    pub field: Scalar,
    /// Value to store.
    pub value: f64,
}

impl StateUpdate {
    /// Create an update for `field`.
    pub fn new(field: Scalar, value: f64) -> Self {
        Self { field, value }
    }

    /// Store this update into `state`.
    pub fn apply(&self, state: &SharedState) {
        state.set(self.field, self.value);
    }
}

/// Lock-protected FIFO of [`StateUpdate`]s.
///
/// Ordering is FIFO in the order pushes acquired the internal lock; there is
/// no ordering between interleaved producers beyond that.
#[derive(Debug, Default)]
pub struct StateUpdateQueue {
    queue: Mutex<VecDeque<StateUpdate>>,
    available: Condvar,
    pushed: AtomicU64,
}

// Compile-time assertion: StateUpdateQueue must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<StateUpdateQueue>();
};

impl StateUpdateQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an update and wake one waiting consumer.
    pub fn push(&self, update: StateUpdate) {
        lock(&self.queue).push_back(update);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
    }

    /// Dequeue the oldest update without blocking.
    pub fn try_pop(&self) -> Option<StateUpdate> {
        lock(&self.queue).pop_front()
    }

    /// Dequeue the oldest update, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<StateUpdate> {
        let guard = lock(&self.queue);
        let (mut guard, _) = self
            .available
            .wait_timeout_while(guard, timeout, |q| q.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        guard.pop_front()
    }

    /// Take every pending update in FIFO order, leaving the queue empty.
    pub fn drain(&self) -> Vec<StateUpdate> {
        let mut guard = lock(&self.queue);
        guard.drain(..).collect()
    }

    /// Drain the queue and apply every update to `state` in order.
    ///
    /// Returns the number of updates applied.
    pub fn apply_all(&self, state: &SharedState) -> usize {
        let pending = self.drain();
        for update in &pending {
            update.apply(state);
        }
        pending.len()
    }

    /// Number of pending updates.
    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Total number of updates ever pushed.
    pub fn total_pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}
