//! Barrier-synchronized simulation clock.
//!
//! [`SimClock`] is a reusable barrier whose coordinator runs on its own
//! thread inside [`SimClock::start`]. Each tick it waits until every
//! registered participant has reported completion, then advances the tick
//! index and simulation time and wakes every participant.
//!
//! ```text
//! Coordinator (start)          Participant threads (N)
//!     |                              |
//!     | advance -> tick 1            | next_tick() blocks while Idle
//!     |--notify tick_started-------->| wakes, does work
//!     |                              | complete()  (completed += 1)
//!     |<-notify tick_completed-------| last one wakes the coordinator
//!     | [paused? wait for resume]    |
//!     | advance -> tick 2            |
//! ```
//!
//! Completions are tagged with the tick they belong to. A participant that
//! leaves the barrier after completing the current tick retracts its
//! completion along with its registration, so `completed <= registered`
//! holds for every generation regardless of when threads join or leave.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use runway_core::state::AtomicF64;
use runway_core::sync::lock;
use runway_core::ClockReading;
use tracing::{debug, error, info, trace, warn};

use crate::config::{ClockConfig, ConfigError};

// ── Errors and reports ───────────────────────────────────────────

/// Lifecycle phase of a [`SimClock`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockPhase {
    /// Constructed, not yet started. Participants block in `next_tick`.
    Idle,
    /// The coordinator is advancing ticks.
    Running,
    /// Stopped for good. Every wait returns immediately.
    Stopped,
}

impl fmt::Display for ClockPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Errors reported by the clock.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ClockError {
    /// `start()` was called on a clock that is not idle.
    #[error("clock cannot start from phase {phase}")]
    NotIdle {
        /// Phase at the time of the call.
        phase: ClockPhase,
    },
    /// Not every participant completed a tick within the stall timeout.
    #[error(
        "barrier stalled at tick {tick}: {completed} of {registered} participants \
         completed within {waited:?}"
    )]
    BarrierStall {
        /// Tick that never resolved.
        tick: u64,
        /// Completions received.
        completed: usize,
        /// Participants registered.
        registered: usize,
        /// How long the coordinator waited.
        waited: Duration,
    },
    /// Invalid time step passed to [`SimClock::set_dt`].
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Summary returned by [`SimClock::start`] after a normal stop.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockReport {
    /// Ticks admitted, including the initial one.
    pub ticks: u64,
    /// Simulation time at stop, seconds.
    pub final_time: f64,
}

// ── Barrier state ────────────────────────────────────────────────

#[derive(Debug)]
struct Barrier {
    phase: ClockPhase,
    tick: u64,
    time: f64,
    dt: f64,
    registered: usize,
    completed: usize,
    paused: bool,
}

impl Barrier {
    fn resolved(&self) -> bool {
        self.completed >= self.registered
    }

    fn reading(&self) -> ClockReading {
        ClockReading {
            tick: self.tick,
            time: self.time,
            dt: self.dt,
        }
    }
}

// ── SimClock ─────────────────────────────────────────────────────

/// The barrier clock shared by every participant of one run.
///
/// Constructed explicitly and shared through an `Arc`; independent runs use
/// independent clocks.
pub struct SimClock {
    barrier: Mutex<Barrier>,
    tick_started: Condvar,
    tick_completed: Condvar,
    tick: AtomicU64,
    time: AtomicF64,
    running: AtomicBool,
    paused: AtomicBool,
    stall_timeout: Option<Duration>,
    max_ticks: Option<u64>,
}

// Compile-time assertion: SimClock must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SimClock>();
};

impl fmt::Debug for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimClock")
            .field("tick", &self.tick_count())
            .field("time", &self.current_time())
            .field("running", &self.is_running())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl SimClock {
    /// Create an idle clock.
    pub fn new(config: ClockConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            barrier: Mutex::new(Barrier {
                phase: ClockPhase::Idle,
                tick: 0,
                time: 0.0,
                dt: config.dt,
                registered: 0,
                completed: 0,
                paused: false,
            }),
            tick_started: Condvar::new(),
            tick_completed: Condvar::new(),
            tick: AtomicU64::new(0),
            time: AtomicF64::new(0.0),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stall_timeout: config.stall_timeout,
            max_ticks: config.max_ticks,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Barrier> {
        lock(&self.barrier)
    }

    // ── Coordinator ──

    /// Run the coordinator loop on the calling thread until stopped.
    ///
    /// Admits tick 1 unconditionally, then repeatedly waits for every
    /// registered participant to complete the current tick, honours
    /// `pause`, and advances. Returns when [`stop`](Self::stop) is called or
    /// `max_ticks` is reached. With a stall timeout configured, a tick that
    /// does not resolve in time stops the clock and is reported as
    /// [`ClockError::BarrierStall`].
    pub fn start(&self) -> Result<ClockReport, ClockError> {
        let mut b = self.lock();
        if b.phase != ClockPhase::Idle {
            return Err(ClockError::NotIdle { phase: b.phase });
        }
        b.phase = ClockPhase::Running;
        self.running.store(true, Ordering::Release);
        info!(dt = b.dt, "simulation clock started");
        self.advance(&mut b);

        loop {
            b = self.await_completion(b)?;
            if b.phase == ClockPhase::Stopped {
                break;
            }
            b = self
                .tick_completed
                .wait_while(b, |b| b.paused && b.phase == ClockPhase::Running)
                .unwrap_or_else(PoisonError::into_inner);
            if b.phase == ClockPhase::Stopped {
                break;
            }
            if self.max_ticks.is_some_and(|max| b.tick >= max) {
                info!(tick = b.tick, "tick limit reached");
                self.halt(&mut b);
                break;
            }
            self.advance(&mut b);
        }

        let report = ClockReport {
            ticks: b.tick,
            final_time: b.time,
        };
        info!(
            ticks = report.ticks,
            time = report.final_time,
            "simulation clock stopped"
        );
        Ok(report)
    }

    /// Block until the current tick resolves, the clock stops, or the stall
    /// timeout elapses.
    fn await_completion<'a>(
        &'a self,
        b: MutexGuard<'a, Barrier>,
    ) -> Result<MutexGuard<'a, Barrier>, ClockError> {
        let pending = |b: &mut Barrier| b.phase == ClockPhase::Running && !b.resolved();
        let Some(timeout) = self.stall_timeout else {
            return Ok(self
                .tick_completed
                .wait_while(b, pending)
                .unwrap_or_else(PoisonError::into_inner));
        };

        let started = Instant::now();
        let (mut b, result) = self
            .tick_completed
            .wait_timeout_while(b, timeout, pending)
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() && pending(&mut *b) {
            let err = ClockError::BarrierStall {
                tick: b.tick,
                completed: b.completed,
                registered: b.registered,
                waited: started.elapsed(),
            };
            error!(
                tick = b.tick,
                completed = b.completed,
                registered = b.registered,
                "barrier stall, stopping clock"
            );
            self.halt(&mut b);
            return Err(err);
        }
        Ok(b)
    }

    fn advance(&self, b: &mut Barrier) {
        b.completed = 0;
        b.tick += 1;
        b.time += b.dt;
        self.tick.store(b.tick, Ordering::Release);
        self.time.store(b.time);
        trace!(tick = b.tick, time = b.time, "tick admitted");
        self.tick_started.notify_all();
    }

    fn halt(&self, b: &mut Barrier) {
        b.phase = ClockPhase::Stopped;
        self.running.store(false, Ordering::Release);
        self.tick_started.notify_all();
        self.tick_completed.notify_all();
    }

    // ── Control ──

    /// Stop the clock and release every waiter, including participants
    /// blocked before the clock was started.
    pub fn stop(&self) {
        let mut b = self.lock();
        if b.phase != ClockPhase::Stopped {
            debug!(tick = b.tick, "clock stop requested");
        }
        self.halt(&mut b);
    }

    /// Hold the clock at the next tick boundary.
    pub fn pause(&self) {
        let mut b = self.lock();
        b.paused = true;
        self.paused.store(true, Ordering::Release);
        debug!(tick = b.tick, "clock paused");
    }

    /// Let a paused clock advance again.
    pub fn resume(&self) {
        let mut b = self.lock();
        b.paused = false;
        self.paused.store(false, Ordering::Release);
        debug!(tick = b.tick, "clock resumed");
        self.tick_completed.notify_all();
    }

    /// Change the time step. Takes effect at the next advance.
    pub fn set_dt(&self, dt: f64) -> Result<(), ClockError> {
        ClockConfig {
            dt,
            ..ClockConfig::default()
        }
        .validate()?;
        self.lock().dt = dt;
        Ok(())
    }

    /// Wake every thread blocked in a tick wait so it re-checks its
    /// cancellation flag.
    pub fn interrupt(&self) {
        drop(self.lock());
        self.tick_started.notify_all();
    }

    // ── Participation ──

    /// Add one participant to the barrier.
    ///
    /// Prefer [`join`](Self::join), which pairs registration with an RAII
    /// handle.
    pub fn register(&self) {
        let mut b = self.lock();
        b.registered += 1;
        trace!(registered = b.registered, "participant registered");
    }

    /// Remove one participant from the barrier.
    pub fn unregister(&self) {
        let mut b = self.lock();
        b.registered = b.registered.saturating_sub(1);
        b.completed = b.completed.min(b.registered);
        trace!(registered = b.registered, "participant unregistered");
        self.tick_completed.notify_all();
    }

    /// Record one completion for the current tick.
    ///
    /// Completions beyond the registered count are ignored.
    pub fn notify_tick_completed(&self) {
        let mut b = self.lock();
        self.record_completion(&mut b);
    }

    fn record_completion(&self, b: &mut Barrier) {
        if b.completed >= b.registered {
            warn!(
                tick = b.tick,
                registered = b.registered,
                "completion beyond registered participants ignored"
            );
            return;
        }
        b.completed += 1;
        if b.resolved() {
            self.tick_completed.notify_all();
        }
    }

    /// Block until the tick exceeds `last_seen` or the clock stops.
    ///
    /// Returns the current tick, which is the caller's new "last seen".
    /// While the clock is idle this keeps waiting.
    pub fn wait_for_next_tick(&self, last_seen: u64) -> u64 {
        let b = self.lock();
        let b = self
            .tick_started
            .wait_while(b, |b| match b.phase {
                ClockPhase::Idle => true,
                ClockPhase::Running => b.tick <= last_seen,
                ClockPhase::Stopped => false,
            })
            .unwrap_or_else(PoisonError::into_inner);
        b.tick
    }

    fn wait_tick(&self, last_seen: u64, cancel: &AtomicBool) -> Option<ClockReading> {
        let b = self.lock();
        let b = self
            .tick_started
            .wait_while(b, |b| {
                if cancel.load(Ordering::Acquire) {
                    return false;
                }
                match b.phase {
                    ClockPhase::Idle => true,
                    ClockPhase::Running => b.tick <= last_seen,
                    ClockPhase::Stopped => false,
                }
            })
            .unwrap_or_else(PoisonError::into_inner);
        if cancel.load(Ordering::Acquire) || b.phase != ClockPhase::Running {
            return None;
        }
        Some(b.reading())
    }

    /// Register a participant and return its handle.
    pub fn join(self: &Arc<Self>, name: impl Into<String>) -> TickParticipant {
        self.join_with_cancel(name, Arc::new(AtomicBool::new(false)))
    }

    /// Register a participant whose waits also end when `cancel` is set.
    ///
    /// Setting the flag must be followed by [`interrupt`](Self::interrupt)
    /// to wake a participant that is already blocked.
    pub fn join_with_cancel(
        self: &Arc<Self>,
        name: impl Into<String>,
        cancel: Arc<AtomicBool>,
    ) -> TickParticipant {
        let name = name.into();
        let mut b = self.lock();
        b.registered += 1;
        // A thread joining mid-run takes part in the tick that is current.
        let last_seen = match b.phase {
            ClockPhase::Running => b.tick.saturating_sub(1),
            _ => b.tick,
        };
        debug!(participant = %name, registered = b.registered, tick = b.tick, "joined barrier");
        drop(b);
        TickParticipant {
            clock: Arc::clone(self),
            name,
            last_seen,
            completed_tick: None,
            cancel,
        }
    }

    // ── Readers ──

    /// Simulation time of the current tick, seconds.
    pub fn current_time(&self) -> f64 {
        self.time.load()
    }

    /// Current simulation time with two decimals.
    pub fn formatted_time(&self) -> String {
        format!("{:.2}", self.current_time())
    }

    /// Current tick index. Zero before the clock starts.
    pub fn tick_count(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Returns `true` while the coordinator is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Returns `true` while paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Current time step, seconds.
    pub fn dt(&self) -> f64 {
        self.lock().dt
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ClockPhase {
        self.lock().phase
    }

    /// Registered participant count.
    pub fn registered(&self) -> usize {
        self.lock().registered
    }

    /// Completions received for the current tick.
    pub fn completed(&self) -> usize {
        self.lock().completed
    }
}

// ── TickParticipant ──────────────────────────────────────────────

/// A registered barrier participant.
///
/// Dropping the handle unregisters it. If it had already completed the
/// current tick, that completion is withdrawn too.
pub struct TickParticipant {
    clock: Arc<SimClock>,
    name: String,
    last_seen: u64,
    completed_tick: Option<u64>,
    cancel: Arc<AtomicBool>,
}

impl fmt::Debug for TickParticipant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickParticipant")
            .field("name", &self.name)
            .field("last_seen", &self.last_seen)
            .field("completed_tick", &self.completed_tick)
            .finish()
    }
}

impl TickParticipant {
    /// Block until the next tick is admitted.
    ///
    /// Returns `None` once the clock has stopped or the cancel flag is set.
    pub fn next_tick(&mut self) -> Option<ClockReading> {
        let reading = self.clock.wait_tick(self.last_seen, &self.cancel)?;
        self.last_seen = reading.tick;
        Some(reading)
    }

    /// Report completion of the tick last returned by
    /// [`next_tick`](Self::next_tick).
    ///
    /// A second completion for the same tick, or one for a tick the clock
    /// has already moved past, is ignored.
    pub fn complete(&mut self) {
        if self.completed_tick == Some(self.last_seen) {
            debug!(participant = %self.name, tick = self.last_seen, "duplicate completion ignored");
            return;
        }
        let mut b = self.clock.lock();
        if b.tick != self.last_seen {
            debug!(
                participant = %self.name,
                tick = self.last_seen,
                current = b.tick,
                "stale completion ignored"
            );
            return;
        }
        self.completed_tick = Some(b.tick);
        self.clock.record_completion(&mut b);
    }

    /// The tick this participant most recently saw.
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    /// Participant name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The clock this participant is registered with.
    pub fn clock(&self) -> &Arc<SimClock> {
        &self.clock
    }
}

impl Drop for TickParticipant {
    fn drop(&mut self) {
        let mut b = self.clock.lock();
        b.registered = b.registered.saturating_sub(1);
        if self.completed_tick == Some(b.tick) {
            b.completed = b.completed.saturating_sub(1);
        }
        b.completed = b.completed.min(b.registered);
        debug!(participant = %self.name, registered = b.registered, "left barrier");
        self.clock.tick_completed.notify_all();
    }
}
