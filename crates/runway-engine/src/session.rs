//! The run context.
//!
//! A [`Session`] owns one clock, one state store, one update queue and one
//! event bus. [`Session::start`] takes a [`Scenario`] (events, actions,
//! controllers, optional model, recorder sink and stop condition), wires
//! every participant and launches the clock coordinator on its own thread.
//!
//! # Shutdown
//!
//! [`Session::stop`] walks a small state machine:
//!
//! ```text
//! Running ──> Draining ──> Quiescing ──> Stopped
//!   stop clock,   stop participants,
//!   join it       manager, bus
//! ```
//!
//! and returns a [`ShutdownReport`]. Dropping a running session performs
//! the same sequence.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use runway_core::{ControlFlag, Model, SharedState, StateUpdateQueue};
use tracing::{error, info, warn};

use crate::action::ActionTable;
use crate::bus::{EventBus, EventStats};
use crate::clock::{ClockError, ClockReport, SimClock};
use crate::config::{ConfigError, KernelConfig};
use crate::event::{EventTable, Predicate};
use crate::manager::{ControllerManager, ControllerSet, DispatchStats};
use crate::model::ModelRunner;
use crate::monitor::EventMonitor;
use crate::participant::ParticipantThread;
use crate::recorder::{DataRecorder, RecordSink};
use crate::state_manager::StateManager;

/// Errors from [`Session::start`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session has already been started once.
    #[error("session already started")]
    AlreadyStarted,
    /// Wiring failed.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ── SimContext ───────────────────────────────────────────────────

/// The handles a controller needs to take part in a run.
#[derive(Clone, Debug)]
pub struct SimContext {
    /// The run's clock.
    pub clock: Arc<SimClock>,
    /// The run's state store.
    pub state: Arc<SharedState>,
    /// The run's update queue.
    pub updates: Arc<StateUpdateQueue>,
}

// ── Scenario ─────────────────────────────────────────────────────

/// Everything that varies between runs.
#[derive(Default)]
pub struct Scenario {
    /// Event definitions.
    pub events: EventTable,
    /// Action resolution table.
    pub actions: ActionTable,
    /// Managed controllers.
    pub controllers: ControllerSet,
    /// Vehicle model, stepped every tick.
    pub model: Option<Box<dyn Model>>,
    /// Recorder destination.
    pub sink: Option<Box<dyn RecordSink>>,
    /// Stops the clock the first tick this holds.
    pub stop_when: Option<Predicate>,
    /// Called with the event name whenever an event is accepted for dispatch.
    pub on_event: Option<Box<dyn Fn(&str) + Send + Sync>>,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("events", &self.events)
            .field("controllers", &self.controllers)
            .field("model", &self.model.as_ref().map(|m| m.name().to_string()))
            .finish_non_exhaustive()
    }
}

impl Scenario {
    /// A scenario over `events` with the standard action table.
    pub fn new(events: EventTable) -> Self {
        Self {
            events,
            actions: ActionTable::standard(),
            ..Self::default()
        }
    }

    /// Use `controllers`.
    pub fn with_controllers(mut self, controllers: ControllerSet) -> Self {
        self.controllers = controllers;
        self
    }

    /// Use `actions` instead of the standard table.
    pub fn with_actions(mut self, actions: ActionTable) -> Self {
        self.actions = actions;
        self
    }

    /// Step `model` every tick.
    pub fn with_model(mut self, model: impl Model + 'static) -> Self {
        self.model = Some(Box::new(model));
        self
    }

    /// Record into `sink`.
    pub fn with_sink(mut self, sink: impl RecordSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Stop the clock once `pred` holds.
    pub fn stop_when<F>(mut self, pred: F) -> Self
    where
        F: Fn(&SharedState) -> bool + Send + Sync + 'static,
    {
        self.stop_when = Some(Box::new(pred));
        self
    }

    /// Install an event hook.
    pub fn on_event<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_event = Some(Box::new(hook));
        self
    }
}

// ── ShutdownReport ───────────────────────────────────────────────

/// Report from [`Session::stop`].
#[derive(Debug)]
pub struct ShutdownReport {
    /// Total time spent in the shutdown sequence.
    pub total_ms: u64,
    /// Time spent stopping and joining the clock.
    pub drain_ms: u64,
    /// Time spent stopping participants, the manager and the bus.
    pub quiesce_ms: u64,
    /// Outcome of the clock coordinator, if it ran and was joined.
    pub clock: Option<Result<ClockReport, ClockError>>,
    /// Participant threads joined cleanly.
    pub participants_joined: usize,
    /// Participant threads that had panicked.
    pub participants_panicked: usize,
    /// Per-event bus statistics.
    pub bus: IndexMap<String, EventStats>,
    /// Dispatcher counters.
    pub dispatch: DispatchStats,
    /// Events still queued on the bus at shutdown.
    pub discarded: usize,
}

impl ShutdownReport {
    fn empty() -> Self {
        Self {
            total_ms: 0,
            drain_ms: 0,
            quiesce_ms: 0,
            clock: None,
            participants_joined: 0,
            participants_panicked: 0,
            bus: IndexMap::new(),
            dispatch: DispatchStats::default(),
            discarded: 0,
        }
    }
}

// ── ShutdownState ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownState {
    Ready,
    Running,
    Draining,
    Quiescing,
    Stopped,
}

// ── Session ──────────────────────────────────────────────────────

/// One simulation run.
pub struct Session {
    clock: Arc<SimClock>,
    state: Arc<SharedState>,
    updates: Arc<StateUpdateQueue>,
    bus: Arc<EventBus>,
    config: KernelConfig,
    events: Option<Arc<EventTable>>,
    manager: Option<ControllerManager>,
    participants: Vec<ParticipantThread>,
    clock_thread: Option<JoinHandle<Result<ClockReport, ClockError>>>,
    phase: ShutdownState,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("phase", &self.phase)
            .field("clock", &self.clock)
            .field("participants", &self.participants.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Validate `config` and build the clock, state store, update queue and
    /// bus. Bus workers start immediately; the clock does not.
    pub fn new(config: KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let clock = Arc::new(SimClock::new(config.clock.clone())?);
        let bus = Arc::new(EventBus::new(config.bus.clone())?);
        Ok(Self {
            clock,
            state: Arc::new(SharedState::new()),
            updates: Arc::new(StateUpdateQueue::new()),
            bus,
            config,
            events: None,
            manager: None,
            participants: Vec::new(),
            clock_thread: None,
            phase: ShutdownState::Ready,
        })
    }

    /// Handles for building controllers.
    pub fn context(&self) -> SimContext {
        SimContext {
            clock: Arc::clone(&self.clock),
            state: Arc::clone(&self.state),
            updates: Arc::clone(&self.updates),
        }
    }

    /// The clock.
    pub fn clock(&self) -> &Arc<SimClock> {
        &self.clock
    }

    /// The state store.
    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// The update queue.
    pub fn updates(&self) -> &Arc<StateUpdateQueue> {
        &self.updates
    }

    /// The event bus.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The event table, once started.
    pub fn events(&self) -> Option<&Arc<EventTable>> {
        self.events.as_ref()
    }

    /// The controller manager, once started.
    pub fn manager(&self) -> Option<&ControllerManager> {
        self.manager.as_ref()
    }

    /// Wire `scenario` and launch the run.
    ///
    /// Participants are registered before the clock coordinator starts, so
    /// tick 1 already waits for all of them.
    pub fn start(&mut self, scenario: Scenario) -> Result<(), SessionError> {
        if self.phase != ShutdownState::Ready {
            return Err(SessionError::AlreadyStarted);
        }
        let Scenario {
            events,
            actions,
            controllers,
            model,
            sink,
            stop_when,
            on_event,
        } = scenario;
        let events = Arc::new(events);

        let mut manager = ControllerManager::new(
            Arc::clone(&self.state),
            Arc::clone(&events),
            controllers,
            actions,
        );
        if let Some(hook) = on_event {
            manager.set_event_hook(hook);
        }
        manager.subscribe_all(&self.bus);
        manager.start()?;
        self.manager = Some(manager);
        self.events = Some(Arc::clone(&events));
        // From here on a failure leaves a partly wired run that stop() unwinds.
        self.phase = ShutdownState::Running;

        let clock = &self.clock;
        self.participants.push(
            StateManager::new(Arc::clone(&self.state), Arc::clone(&self.updates)).spawn(clock)?,
        );
        self.participants.push(
            EventMonitor::new(events, Arc::clone(&self.bus), Arc::clone(&self.state)).spawn(clock)?,
        );
        if let Some(model) = model {
            self.participants.push(
                ModelRunner::new(model, Arc::clone(&self.state), Arc::clone(&self.updates))
                    .spawn(clock)?,
            );
        }
        if let Some(sink) = sink {
            self.participants.push(
                DataRecorder::new(Arc::clone(&self.state), sink, &self.config.recorder)?
                    .spawn(clock)?,
            );
        }
        if let Some(pred) = stop_when {
            let stopper = self.spawn_stop_condition(pred)?;
            self.participants.push(stopper);
        }

        self.state.notify_start();
        let coordinator = Arc::clone(&self.clock);
        let name = "runway-clock";
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || coordinator.start())
            .map_err(|e| ConfigError::spawn(name, e))?;
        self.clock_thread = Some(handle);
        info!(participants = self.participants.len(), "session started");
        Ok(())
    }

    fn spawn_stop_condition(&self, pred: Predicate) -> Result<ParticipantThread, ConfigError> {
        let state = Arc::clone(&self.state);
        let clock = Arc::clone(&self.clock);
        ParticipantThread::spawn(&self.clock, "stop-condition", move |reading| {
            if pred(&state) {
                info!(
                    time = reading.time,
                    position = state.position(),
                    "stop condition met"
                );
                state.set_flag(ControlFlag::SimulationRunning, false);
                clock.stop();
            }
        })
    }

    /// Returns `true` once the clock coordinator has returned.
    pub fn is_finished(&self) -> bool {
        match self.phase {
            ShutdownState::Ready => false,
            ShutdownState::Running => self.clock_thread.as_ref().is_some_and(|h| h.is_finished()),
            _ => true,
        }
    }

    /// Block until `pred` holds on the state store, the run finishes, or
    /// `timeout` elapses. Returns the final value of `pred`.
    ///
    /// Wakes on every snapshot publication, i.e. once per tick.
    pub fn run_until<F>(&self, pred: F, timeout: Duration) -> bool
    where
        F: Fn(&SharedState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let version = self.state.version();
            if pred(&self.state) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline || self.is_finished() {
                return pred(&self.state);
            }
            let slice = (deadline - now).min(Duration::from_millis(50));
            self.state.wait_for_update(version, slice);
        }
    }

    /// Block until the run finishes on its own or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            let version = self.state.version();
            self.state.wait_for_update(version, Duration::from_millis(10));
        }
        true
    }

    /// Shut the run down and report.
    ///
    /// Idempotent; later calls return an empty report.
    pub fn stop(&mut self) -> ShutdownReport {
        match self.phase {
            ShutdownState::Stopped => return ShutdownReport::empty(),
            ShutdownState::Ready => {
                self.phase = ShutdownState::Stopped;
                self.clock.stop();
                let mut report = ShutdownReport::empty();
                report.discarded = self.bus.shutdown();
                return report;
            }
            _ => {}
        }
        let start = Instant::now();

        // Phase 1: Running -> Draining
        self.phase = ShutdownState::Draining;
        self.state.set_flag(ControlFlag::SimulationRunning, false);
        self.clock.stop();
        let clock = match self.clock_thread.take().map(JoinHandle::join) {
            Some(Ok(result)) => Some(result),
            Some(Err(_)) => {
                error!("clock coordinator panicked");
                None
            }
            None => None,
        };
        if let Some(Err(err)) = &clock {
            warn!(error = %err, "clock stopped with an error");
        }
        let drain_ms = start.elapsed().as_millis() as u64;

        // Phase 2: Draining -> Quiescing
        self.phase = ShutdownState::Quiescing;
        let mut participants_joined = 0;
        let mut participants_panicked = 0;
        for mut p in self.participants.drain(..) {
            if p.stop() {
                participants_joined += 1;
            } else {
                participants_panicked += 1;
            }
        }
        // Bus workers are joined before the manager drains its queue.
        let discarded = self.bus.shutdown();
        let dispatch = match self.manager.as_mut() {
            Some(manager) => {
                manager.shutdown();
                manager.stats()
            }
            None => DispatchStats::default(),
        };
        let quiesce_ms = (start.elapsed().as_millis() as u64).saturating_sub(drain_ms);

        // Phase 3: Quiescing -> Stopped
        self.phase = ShutdownState::Stopped;
        let total_ms = start.elapsed().as_millis() as u64;
        info!(total_ms, drain_ms, quiesce_ms, "session stopped");
        ShutdownReport {
            total_ms,
            drain_ms,
            quiesce_ms,
            clock,
            participants_joined,
            participants_panicked,
            bus: self.bus.stats(),
            dispatch,
            discarded,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.phase != ShutdownState::Stopped {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ControllerAction;
    use crate::config::ClockConfig;
    use crate::event::EventDefinition;
    use crate::recorder::MemorySink;
    use runway_core::{Actuator, Controller, FlightMode, Scalar};
    use runway_test_utils::{MockController, RecordingModel};

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn config(max_ticks: Option<u64>) -> KernelConfig {
        KernelConfig {
            clock: ClockConfig {
                max_ticks,
                ..ClockConfig::default()
            },
            ..KernelConfig::default()
        }
    }

    #[test]
    fn runs_to_the_tick_limit_and_reports() {
        let mut session = Session::new(config(Some(20))).unwrap();
        let model = RecordingModel::new();
        let sink = MemorySink::new();
        session
            .start(
                Scenario::new(EventTable::new())
                    .with_model(model.clone())
                    .with_sink(sink.clone()),
            )
            .unwrap();
        assert!(session.wait(TIMEOUT));
        let report = session.stop();
        let clock = report.clock.unwrap().unwrap();
        assert_eq!(clock.ticks, 20);
        assert_eq!(model.steps(), 20);
        assert_eq!(report.participants_panicked, 0);
        assert!(!sink.rows().is_empty());
        assert!((session.state().simulation_time() - clock.final_time).abs() < 1e-9);
    }

    #[test]
    fn start_twice_is_rejected() {
        let mut session = Session::new(config(Some(1))).unwrap();
        session.start(Scenario::default()).unwrap();
        assert!(matches!(
            session.start(Scenario::default()),
            Err(SessionError::AlreadyStarted)
        ));
    }

    #[test]
    fn stop_condition_ends_the_run() {
        let mut session = Session::new(config(None)).unwrap();
        session
            .start(Scenario::default().stop_when(|s| s.simulation_time() >= 0.05))
            .unwrap();
        assert!(session.wait(TIMEOUT));
        assert!(!session.state().flag(ControlFlag::SimulationRunning));
        let report = session.stop();
        let clock = report.clock.unwrap().unwrap();
        assert!(clock.final_time >= 0.05 - 1e-9);
    }

    #[test]
    fn triggered_events_reach_controllers() {
        let mut session = Session::new(config(None)).unwrap();
        session.state().set_flight_mode(FlightMode::Auto);
        let brake = MockController::new("brake").with_authority(Actuator::Brake);
        let mut controllers = ControllerSet::new();
        controllers.insert(Box::new(brake.clone())).unwrap();
        let events = EventTable::from_definitions([EventDefinition::new("FAR", |s| {
            s.position() >= 10.0
        })
        .actions([ControllerAction::StartBrake])])
        .unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        session
            .start(
                Scenario::new(events)
                    .with_controllers(controllers)
                    .on_event(move |e| hook_seen.lock().unwrap().push(e.to_string())),
            )
            .unwrap();

        session.updates().push(runway_core::StateUpdate::new(Scalar::Position, 12.0));
        assert!(session.run_until(|_| brake.is_enabled(), TIMEOUT));
        let report = session.stop();
        assert_eq!(report.dispatch.events_acted, 1);
        assert_eq!(report.bus["FAR"].processed, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["FAR".to_string()]);
        assert!(!brake.is_enabled(), "shutdown stops controllers");
    }

    #[test]
    fn stop_is_idempotent_and_bounded() {
        let mut session = Session::new(config(None)).unwrap();
        session.start(Scenario::default()).unwrap();
        assert!(session.run_until(|s| s.simulation_time() > 0.02, TIMEOUT));
        let report = session.stop();
        assert!(report.total_ms < 2000, "shutdown took {}ms", report.total_ms);
        assert!(!session.bus().is_running());
        let again = session.stop();
        assert!(again.clock.is_none());
        assert!(session.is_finished());
    }

    #[test]
    fn never_started_session_shuts_down() {
        let mut session = Session::new(KernelConfig::default()).unwrap();
        assert!(!session.is_finished());
        let report = session.stop();
        assert!(report.clock.is_none());
        assert!(!session.bus().is_running());
    }
}
