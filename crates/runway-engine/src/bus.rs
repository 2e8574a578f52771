//! Bounded multi-worker publish/subscribe event bus.
//!
//! One FIFO queue and one subscriber table share a mutex. A fixed pool of
//! worker threads pops events and invokes the matching callbacks in
//! registration order, outside the lock. Publishing never blocks: when the
//! queue is at capacity the event is dropped and counted.
//!
//! Queue order is FIFO, but with several workers two events may finish
//! out of publish order.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use indexmap::IndexMap;
use runway_core::sync::lock;
use runway_core::HandlerError;
use tracing::{debug, error, info, warn};

use crate::config::{BusConfig, ConfigError};

/// Opaque event payload.
pub type Payload = Arc<dyn Any + Send + Sync>;

type Callback = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

// ── Event ────────────────────────────────────────────────────────

/// A published event.
#[derive(Clone)]
pub struct Event {
    name: Arc<str>,
    payload: Option<Payload>,
}

impl Event {
    /// Event name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The payload, if one was published and it has type `T`.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Result of [`EventBus::publish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Enqueued for a worker.
    Queued,
    /// The queue was full; the event was discarded.
    Dropped,
    /// The bus has shut down.
    Closed,
}

/// Per-event counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventStats {
    /// Publish attempts, including dropped ones.
    pub published: u64,
    /// Events popped and handed to their subscribers.
    pub processed: u64,
    /// Events discarded because the queue was full.
    pub dropped: u64,
    /// Callback invocations that returned an error or panicked.
    pub failed: u64,
    /// Events popped with no subscriber registered.
    pub unhandled: u64,
}

// ── Shared state ─────────────────────────────────────────────────

struct BusState {
    queue: VecDeque<Event>,
    subscribers: HashMap<String, Vec<Callback>>,
    stats: IndexMap<String, EventStats>,
    running: bool,
    discarded: usize,
}

struct Shared {
    state: Mutex<BusState>,
    available: Condvar,
    capacity: usize,
}

// ── EventBus ─────────────────────────────────────────────────────

/// The event bus.
///
/// Workers start in [`new`](Self::new) and stop in
/// [`shutdown`](Self::shutdown) or on drop; events still queued at that
/// point are discarded.
pub struct EventBus {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

// Compile-time assertion: EventBus must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<EventBus>();
};

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.shared.capacity)
            .field("queued", &self.queued())
            .finish()
    }
}

impl EventBus {
    /// Validate `config` and spawn the worker pool.
    pub fn new(config: BusConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            state: Mutex::new(BusState {
                queue: VecDeque::with_capacity(config.capacity),
                subscribers: HashMap::new(),
                stats: IndexMap::new(),
                running: true,
                discarded: 0,
            }),
            available: Condvar::new(),
            capacity: config.capacity,
        });

        let bus = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(config.workers)),
        };
        for i in 0..config.workers {
            let name = format!("runway-bus-{i}");
            let shared = Arc::clone(&bus.shared);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(&shared, i))
                .map_err(|e| ConfigError::spawn(&name, e))?;
            lock(&bus.workers).push(handle);
        }
        debug!(
            workers = config.workers,
            capacity = config.capacity,
            "event bus started"
        );
        Ok(bus)
    }

    /// Register `callback` for `event`.
    ///
    /// Callbacks for one event run in registration order on whichever
    /// worker popped it.
    pub fn subscribe<F>(&self, event: &str, callback: F)
    where
        F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        lock(&self.shared.state)
            .subscribers
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Remove every subscription.
    pub fn clear_subscribers(&self) {
        lock(&self.shared.state).subscribers.clear();
    }

    /// Publish `event` with no payload.
    pub fn publish(&self, event: &str) -> PublishOutcome {
        self.enqueue(Event {
            name: Arc::from(event),
            payload: None,
        })
    }

    /// Publish `event` carrying `payload`.
    pub fn publish_with(&self, event: &str, payload: Payload) -> PublishOutcome {
        self.enqueue(Event {
            name: Arc::from(event),
            payload: Some(payload),
        })
    }

    fn enqueue(&self, event: Event) -> PublishOutcome {
        let mut guard = lock(&self.shared.state);
        let state = &mut *guard;
        if !state.running {
            return PublishOutcome::Closed;
        }
        let stats = state.stats.entry(event.name.to_string()).or_default();
        stats.published += 1;
        if state.queue.len() >= self.shared.capacity {
            stats.dropped += 1;
            let dropped = stats.dropped;
            drop(guard);
            warn!(event = %event.name, dropped, "event queue full, event dropped");
            return PublishOutcome::Dropped;
        }
        state.queue.push_back(event);
        drop(guard);
        self.shared.available.notify_one();
        PublishOutcome::Queued
    }

    /// Counters for every event name seen so far, in first-seen order.
    pub fn stats(&self) -> IndexMap<String, EventStats> {
        lock(&self.shared.state).stats.clone()
    }

    /// Counters for one event.
    pub fn stats_for(&self, event: &str) -> EventStats {
        lock(&self.shared.state)
            .stats
            .get(event)
            .copied()
            .unwrap_or_default()
    }

    /// Returns `true` once at least one `event` has been processed.
    pub fn has_processed(&self, event: &str) -> bool {
        self.stats_for(event).processed > 0
    }

    /// Events currently queued.
    pub fn queued(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    /// Events discarded unprocessed at shutdown.
    pub fn discarded(&self) -> usize {
        lock(&self.shared.state).discarded
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Returns `true` until [`shutdown`](Self::shutdown).
    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).running
    }

    /// Stop accepting events, wake and join every worker, and discard
    /// whatever is still queued. Returns the number of discarded events.
    ///
    /// Idempotent. A worker busy in a callback is joined once the callback
    /// returns.
    pub fn shutdown(&self) -> usize {
        let discarded = {
            let mut state = lock(&self.shared.state);
            if state.running {
                state.running = false;
                state.discarded = state.queue.len();
                state.queue.clear();
            }
            state.discarded
        };
        self.shared.available.notify_all();

        let current = thread::current().id();
        let handles: Vec<_> = lock(&self.workers).drain(..).collect();
        let joined = handles.len();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("event bus worker panicked");
            }
        }
        if joined > 0 {
            self.log_summary();
        }
        discarded
    }

    fn log_summary(&self) {
        let state = lock(&self.shared.state);
        for (name, s) in &state.stats {
            info!(
                event = %name,
                published = s.published,
                processed = s.processed,
                dropped = s.dropped,
                failed = s.failed,
                "event bus statistics"
            );
        }
        if state.discarded > 0 {
            warn!(
                discarded = state.discarded,
                "events discarded at shutdown"
            );
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Worker ───────────────────────────────────────────────────────

fn worker_loop(shared: &Shared, index: usize) {
    loop {
        let (event, callbacks) = {
            let guard = lock(&shared.state);
            let mut guard = shared
                .available
                .wait_while(guard, |s| s.running && s.queue.is_empty())
                .unwrap_or_else(PoisonError::into_inner);
            if !guard.running {
                break;
            }
            let Some(event) = guard.queue.pop_front() else {
                continue;
            };
            let callbacks = guard
                .subscribers
                .get(event.name())
                .cloned()
                .unwrap_or_default();
            (event, callbacks)
        };

        let mut failed = 0;
        for callback in &callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failed += 1;
                    warn!(event = %event.name, worker = index, error = %err, "event handler failed");
                }
                Err(panic) => {
                    failed += 1;
                    let err = HandlerError::from_panic(event.name(), panic.as_ref());
                    error!(event = %event.name, worker = index, error = %err, "event handler panicked");
                }
            }
        }

        let mut state = lock(&shared.state);
        let stats = state.stats.entry(event.name.to_string()).or_default();
        stats.processed += 1;
        stats.failed += failed;
        if callbacks.is_empty() {
            stats.unhandled += 1;
        }
    }
    debug!(worker = index, "event bus worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn bus(capacity: usize, workers: usize) -> EventBus {
        EventBus::new(BusConfig { capacity, workers }).unwrap()
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        false
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(EventBus::new(BusConfig {
            capacity: 0,
            workers: 1
        })
        .is_err());
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let bus = bus(16, 1);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = Arc::clone(&order);
            bus.subscribe("EV", move |_| {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }
        assert_eq!(bus.publish("EV"), PublishOutcome::Queued);
        assert!(wait_for(|| bus.has_processed("EV")));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn payload_is_delivered() {
        let bus = bus(16, 2);
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = Arc::clone(&seen);
            bus.subscribe("EV", move |ev| {
                seen.store(*ev.payload::<usize>().unwrap_or(&0), Ordering::SeqCst);
                Ok(())
            });
        }
        bus.publish_with("EV", Arc::new(41usize));
        assert!(wait_for(|| seen.load(Ordering::SeqCst) == 41));
    }

    #[test]
    fn failing_and_panicking_handlers_are_counted() {
        let bus = bus(16, 1);
        let after = Arc::new(AtomicUsize::new(0));
        bus.subscribe("EV", |ev| Err(HandlerError::failed(ev.name(), "nope")));
        bus.subscribe("EV", |_| panic!("handler blew up"));
        {
            let after = Arc::clone(&after);
            bus.subscribe("EV", move |_| {
                after.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        bus.publish("EV");
        bus.publish("EV");
        assert!(wait_for(|| bus.stats_for("EV").processed == 2));
        let stats = bus.stats_for("EV");
        assert_eq!(stats.failed, 4);
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribed_events_are_counted_unhandled() {
        let bus = bus(16, 1);
        bus.publish("NOBODY");
        assert!(wait_for(|| bus.has_processed("NOBODY")));
        assert_eq!(bus.stats_for("NOBODY").unhandled, 1);
    }

    #[test]
    fn publish_after_shutdown_is_closed() {
        let bus = bus(4, 2);
        assert_eq!(bus.shutdown(), 0);
        assert!(!bus.is_running());
        assert_eq!(bus.publish("EV"), PublishOutcome::Closed);
        assert_eq!(bus.shutdown(), 0);
    }

    #[test]
    fn handler_may_publish() {
        let bus = Arc::new(bus(16, 2));
        {
            let weak = Arc::downgrade(&bus);
            bus.subscribe("FIRST", move |_| {
                if let Some(bus) = weak.upgrade() {
                    bus.publish("SECOND");
                }
                Ok(())
            });
        }
        bus.publish("FIRST");
        assert!(wait_for(|| bus.has_processed("SECOND")));
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let bus = bus(3, 1);
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(1);
        bus.subscribe("BLOCK", move |_| {
            let _ = entered_tx.send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
            Ok(())
        });
        bus.publish("BLOCK");
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let outcomes: Vec<_> = (0..5).map(|_| bus.publish("WORK")).collect();
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| **o == PublishOutcome::Dropped)
                .count(),
            2
        );
        assert_eq!(bus.stats_for("WORK").dropped, 2);
        assert_eq!(bus.stats_for("WORK").published, 5);

        release_tx.send(()).unwrap();
        assert!(wait_for(|| bus.stats_for("WORK").processed == 3));
    }
}
