//! Controller manager and action dispatcher.
//!
//! The manager owns the run's controllers and turns triggered events into
//! controller operations:
//!
//! ```text
//! Bus worker                      Manager thread
//!     |                                |
//!     | callback(event)                |
//!     |   events.try_mark_acted()      |
//!     |   on_event hook                |
//!     |   work_tx.send(item) --------->| work_rx.recv()
//!     |                                | dispatch(actions)
//!     |                                |   settings -> state store
//!     |                                |   start/stop/stop_all/mode
//! ```
//!
//! The ledger check happens in the bus callback, so a duplicate delivery of
//! the same event never reaches the work queue. Starting a controller that
//! needs an actuator the automatic system does not hold is a policy
//! outcome: it is logged, counted and skipped.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{select, Receiver, Sender};
use indexmap::IndexMap;
use runway_core::{Controller, ControllerError, HandlerError, SharedState};
use tracing::{debug, error, info, warn};

use crate::action::{ActionTable, ControllerAction, ControllerOp, ResolvedAction};
use crate::bus::EventBus;
use crate::config::ConfigError;
use crate::event::{Actions, EventTable};

type EventHook = Box<dyn Fn(&str) + Send + Sync>;

// ── ControllerSet ────────────────────────────────────────────────

/// Name-keyed registry of controllers, fixed for the run.
#[derive(Default)]
pub struct ControllerSet {
    controllers: IndexMap<String, Box<dyn Controller>>,
}

impl fmt::Debug for ControllerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.controllers.keys()).finish()
    }
}

impl ControllerSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a controller, rejecting duplicate names.
    pub fn insert(&mut self, controller: Box<dyn Controller>) -> Result<(), ConfigError> {
        let name = controller.name().to_string();
        if self.controllers.contains_key(&name) {
            return Err(ConfigError::DuplicateController { name });
        }
        self.controllers.insert(name, controller);
        Ok(())
    }

    /// Borrow a controller by name.
    pub fn get(&self, name: &str) -> Option<&dyn Controller> {
        self.controllers.get(name).map(|c| c.as_ref())
    }

    /// Returns `true` if a controller named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.controllers.contains_key(name)
    }

    /// Controllers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Controller> {
        self.controllers.values().map(|c| c.as_ref())
    }

    /// Number of controllers.
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

// ── Status and statistics ────────────────────────────────────────

/// Point-in-time status of one controller.
#[derive(Clone, Debug, PartialEq)]
pub struct ControllerStatus {
    /// Controller name.
    pub name: String,
    /// Whether it is running.
    pub enabled: bool,
    /// Its current output.
    pub value: f64,
}

/// Result of [`ControllerManager::start_controller`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// The controller was started.
    Started,
    /// The automatic system lacks the required authority; not started.
    Denied,
}

/// Dispatcher counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events accepted for dispatch.
    pub events_acted: u64,
    /// Deliveries of an already-acted event that were ignored.
    pub duplicates_skipped: u64,
    /// Actions carried out.
    pub actions_executed: u64,
    /// Actions with no configuration.
    pub actions_unconfigured: u64,
    /// Controller starts refused by the authority gate.
    pub permission_denials: u64,
    /// Work items or actions that failed or panicked.
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    events_acted: AtomicU64,
    duplicates_skipped: AtomicU64,
    actions_executed: AtomicU64,
    actions_unconfigured: AtomicU64,
    permission_denials: AtomicU64,
    failures: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            events_acted: self.events_acted.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            actions_executed: self.actions_executed.load(Ordering::Relaxed),
            actions_unconfigured: self.actions_unconfigured.load(Ordering::Relaxed),
            permission_denials: self.permission_denials.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

struct WorkItem {
    event: String,
    actions: Actions,
}

struct Dispatcher {
    state: Arc<SharedState>,
    events: Arc<EventTable>,
    controllers: ControllerSet,
    actions: ActionTable,
    on_event: OnceLock<EventHook>,
    counters: Counters,
}

impl Dispatcher {
    fn dispatch(&self, actions: &[ControllerAction]) -> Result<(), HandlerError> {
        let mut first_err = None;
        for &action in actions {
            if let Err(err) = self.execute(action) {
                Counters::bump(&self.counters.failures);
                warn!(%action, error = %err, "action failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn execute(&self, action: ControllerAction) -> Result<(), HandlerError> {
        let Some(resolved) = self.actions.get(action) else {
            Counters::bump(&self.counters.actions_unconfigured);
            warn!(%action, "no configuration for action, skipped");
            return Ok(());
        };
        debug!(%action, "executing action");
        match resolved {
            ResolvedAction::Controller {
                controller,
                settings,
                op,
            } => {
                for setting in settings {
                    setting.apply(&self.state);
                }
                match op {
                    ControllerOp::Start => {
                        self.start_controller(controller)?;
                    }
                    ControllerOp::Stop => self.stop_controller(controller)?,
                    ControllerOp::Configure => {}
                }
            }
            ResolvedAction::StopAll => self.stop_all(),
            ResolvedAction::Mode(mode) => self.state.set_flight_mode(*mode),
        }
        Counters::bump(&self.counters.actions_executed);
        Ok(())
    }

    fn controller(&self, name: &str) -> Result<&dyn Controller, ControllerError> {
        self.controllers.get(name).ok_or_else(|| ControllerError::Unknown {
            name: name.to_string(),
        })
    }

    fn start_controller(&self, name: &str) -> Result<StartOutcome, ControllerError> {
        let controller = self.controller(name)?;
        if let Some(actuator) = controller.required_authority() {
            let (mode, authority) = self.state.mode_and_authority();
            if !authority.auto_holds(actuator) {
                Counters::bump(&self.counters.permission_denials);
                warn!(
                    controller = name,
                    ?actuator,
                    %mode,
                    "automatic system lacks authority, controller not started"
                );
                return Ok(StartOutcome::Denied);
            }
        }
        controller.start()?;
        info!(controller = name, "controller started");
        Ok(StartOutcome::Started)
    }

    fn stop_controller(&self, name: &str) -> Result<(), ControllerError> {
        self.controller(name)?.stop();
        info!(controller = name, "controller stopped");
        Ok(())
    }

    fn stop_all(&self) {
        for controller in self.controllers.iter() {
            controller.stop();
        }
        info!(count = self.controllers.len(), "all controllers stopped");
    }

    fn run_item(&self, item: WorkItem) {
        let result = catch_unwind(AssertUnwindSafe(|| self.dispatch(&item.actions)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(event = %item.event, error = %err, "event dispatch incomplete");
            }
            Err(panic) => {
                Counters::bump(&self.counters.failures);
                let err = HandlerError::from_panic(&item.event, panic.as_ref());
                error!(event = %item.event, error = %err, "event dispatch panicked");
            }
        }
        for c in self.controllers.iter() {
            debug!(
                controller = c.name(),
                enabled = c.is_enabled(),
                value = c.current_value(),
                "controller status"
            );
        }
    }

    fn on_bus_event(&self, event: &str, work: &Sender<WorkItem>) -> Result<(), HandlerError> {
        if !self.events.try_mark_acted(event) {
            Counters::bump(&self.counters.duplicates_skipped);
            debug!(event, "event already acted on, ignored");
            return Ok(());
        }
        Counters::bump(&self.counters.events_acted);
        if let Some(hook) = self.on_event.get() {
            hook(event);
        }
        let actions = self
            .events
            .get(event)
            .map(|def| def.action_list().iter().copied().collect())
            .unwrap_or_default();
        work.send(WorkItem {
            event: event.to_string(),
            actions,
        })
        .map_err(|_| HandlerError::failed(event, "controller manager work queue closed"))
    }
}

// ── ControllerManager ────────────────────────────────────────────

/// Owns the controller set and dispatches event actions on its own thread.
///
/// [`start`](Self::start) and [`stop`](Self::stop) control only the work
/// thread; controllers change state only through dispatched actions or
/// the explicit `*_controller` calls. [`shutdown`](Self::shutdown) also
/// stops every controller.
pub struct ControllerManager {
    dispatcher: Arc<Dispatcher>,
    work_tx: Sender<WorkItem>,
    work_rx: Receiver<WorkItem>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

// Compile-time assertion: ControllerManager must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<ControllerManager>();
};

impl fmt::Debug for ControllerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerManager")
            .field("controllers", &self.dispatcher.controllers)
            .field("running", &self.is_running())
            .field("pending", &self.work_rx.len())
            .finish()
    }
}

impl ControllerManager {
    /// Bind `actions` to `controllers`.
    ///
    /// Controller actions naming a controller that is not in the set are
    /// removed from the table with a warning, so they later dispatch as
    /// unconfigured.
    pub fn new(
        state: Arc<SharedState>,
        events: Arc<EventTable>,
        controllers: ControllerSet,
        mut actions: ActionTable,
    ) -> Self {
        let unknown: Vec<_> = actions
            .iter()
            .filter_map(|(action, resolved)| match resolved {
                ResolvedAction::Controller { controller, .. } if !controllers.contains(controller) => {
                    Some((action, controller.clone()))
                }
                _ => None,
            })
            .collect();
        for (action, controller) in unknown {
            warn!(%action, %controller, "action names an unknown controller, removed");
            actions.remove(action);
        }

        let (work_tx, work_rx) = crossbeam_channel::unbounded();
        Self {
            dispatcher: Arc::new(Dispatcher {
                state,
                events,
                controllers,
                actions,
                on_event: OnceLock::new(),
                counters: Counters::default(),
            }),
            work_tx,
            work_rx,
            stop_tx: None,
            thread: None,
        }
    }

    /// Install a hook called with the event name each time an event is
    /// accepted for dispatch. Returns `false` if a hook was already set.
    pub fn set_event_hook<F>(&self, hook: F) -> bool
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.dispatcher.on_event.set(Box::new(hook)).is_ok()
    }

    /// Subscribe to every event in the table.
    ///
    /// Each callback checks the acted ledger, runs the event hook and
    /// queues the event's actions for the work thread.
    pub fn subscribe_all(&self, bus: &EventBus) {
        for name in self.dispatcher.events.names() {
            let dispatcher = Arc::clone(&self.dispatcher);
            let work = self.work_tx.clone();
            bus.subscribe(name, move |event| dispatcher.on_bus_event(event.name(), &work));
        }
        debug!(events = self.dispatcher.events.len(), "subscribed to events");
    }

    /// Execute `actions` in order on the calling thread.
    ///
    /// Every action is attempted; the first failure is returned.
    pub fn dispatch(&self, actions: &[ControllerAction]) -> Result<(), HandlerError> {
        self.dispatcher.dispatch(actions)
    }

    /// Queue `actions` for the work thread without an event.
    pub fn enqueue(&self, actions: &[ControllerAction]) {
        let _ = self.work_tx.send(WorkItem {
            event: "<direct>".to_string(),
            actions: actions.iter().copied().collect(),
        });
    }

    /// Start a controller, subject to the authority gate.
    pub fn start_controller(&self, name: &str) -> Result<StartOutcome, ControllerError> {
        self.dispatcher.start_controller(name)
    }

    /// Stop a controller. Always permitted.
    pub fn stop_controller(&self, name: &str) -> Result<(), ControllerError> {
        self.dispatcher.stop_controller(name)
    }

    /// Stop every controller.
    pub fn stop_all(&self) {
        self.dispatcher.stop_all();
    }

    /// Borrow a controller for status queries.
    pub fn controller(&self, name: &str) -> Option<&dyn Controller> {
        self.dispatcher.controllers.get(name)
    }

    /// Status of every controller, in registration order.
    pub fn controller_status(&self) -> Vec<ControllerStatus> {
        self.dispatcher
            .controllers
            .iter()
            .map(|c| ControllerStatus {
                name: c.name().to_string(),
                enabled: c.is_enabled(),
                value: c.current_value(),
            })
            .collect()
    }

    /// Dispatcher counters.
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.counters.snapshot()
    }

    /// Work items waiting for the work thread.
    pub fn pending_work(&self) -> usize {
        self.work_rx.len()
    }

    /// Returns `true` while the work thread is running.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawn the work thread. No-op if it is already running.
    pub fn start(&mut self) -> Result<(), ConfigError> {
        if self.thread.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let work_rx = self.work_rx.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let name = "runway-controller-manager";
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                loop {
                    select! {
                        recv(stop_rx) -> _ => {
                            // Finish what the bus already handed over.
                            for item in work_rx.try_iter() {
                                dispatcher.run_item(item);
                            }
                            break;
                        }
                        recv(work_rx) -> item => match item {
                            Ok(item) => dispatcher.run_item(item),
                            Err(_) => break,
                        },
                    }
                }
                debug!("controller manager thread exiting");
            })
            .map_err(|e| ConfigError::spawn(name, e))?;
        self.stop_tx = Some(stop_tx);
        self.thread = Some(handle);
        info!("controller manager started");
        Ok(())
    }

    /// Stop and join the work thread once it has run the work queued so
    /// far. Work queued after that stays queued.
    ///
    /// Controllers are left as they are.
    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
        if handle.join().is_err() {
            error!("controller manager thread panicked");
        }
        let pending = self.work_rx.len();
        if pending > 0 {
            warn!(pending, "controller manager stopped with queued work");
        }
        info!("controller manager stopped");
    }

    /// Stop the work thread, then every controller.
    pub fn shutdown(&mut self) {
        self.stop();
        self.stop_all();
    }
}

impl Drop for ControllerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use crate::event::EventDefinition;
    use runway_core::{Actuator, ControlFlag, FlightMode};
    use runway_test_utils::{wait_until, MockController};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Fixture {
        state: Arc<SharedState>,
        throttle: MockController,
        brake: MockController,
        manager: ControllerManager,
    }

    fn fixture(events: EventTable) -> Fixture {
        let state = Arc::new(SharedState::new());
        let throttle = MockController::new("throttle_increase").with_authority(Actuator::Throttle);
        let brake = MockController::new("brake").with_authority(Actuator::Brake);
        let mut set = ControllerSet::new();
        set.insert(Box::new(throttle.clone())).unwrap();
        set.insert(Box::new(brake.clone())).unwrap();
        let manager = ControllerManager::new(
            Arc::clone(&state),
            Arc::new(events),
            set,
            ActionTable::standard(),
        );
        Fixture {
            state,
            throttle,
            brake,
            manager,
        }
    }

    #[test]
    fn duplicate_controller_names_are_rejected() {
        let mut set = ControllerSet::new();
        set.insert(Box::new(MockController::new("brake"))).unwrap();
        assert_eq!(
            set.insert(Box::new(MockController::new("brake"))),
            Err(ConfigError::DuplicateController {
                name: "brake".into()
            })
        );
    }

    #[test]
    fn actions_for_unknown_controllers_become_unconfigured() {
        let f = fixture(EventTable::new());
        f.manager.dispatch(&[ControllerAction::StartCruise]).unwrap();
        assert_eq!(f.manager.stats().actions_unconfigured, 1);
        assert!(!f.state.flag(ControlFlag::CruiseControlEnabled));
    }

    #[test]
    fn start_is_denied_without_authority() {
        let f = fixture(EventTable::new());
        assert_eq!(f.state.flight_mode(), FlightMode::Manual);
        f.manager
            .dispatch(&[ControllerAction::StartThrottleIncrease])
            .unwrap();
        assert_eq!(f.throttle.starts(), 0);
        assert!(!f.throttle.is_enabled());
        assert_eq!(f.manager.stats().permission_denials, 1);
        // Settings are applied before the gate.
        assert!(f.state.flag(ControlFlag::ThrottleControlEnabled));
    }

    #[test]
    fn start_succeeds_with_authority() {
        let f = fixture(EventTable::new());
        f.manager
            .dispatch(&[
                ControllerAction::SwitchToAutoMode,
                ControllerAction::StartThrottleIncrease,
                ControllerAction::StartBrake,
            ])
            .unwrap();
        assert!(f.throttle.is_enabled());
        assert!(f.brake.is_enabled());
        assert!(!f.state.flag(ControlFlag::CruiseControlEnabled));
        assert!(f.state.flag(ControlFlag::BrakeControlEnabled));
        assert_eq!(f.manager.stats().actions_executed, 3);
    }

    #[test]
    fn stop_all_and_mode_switch() {
        let f = fixture(EventTable::new());
        f.state.set_flight_mode(FlightMode::Auto);
        f.manager.start_controller("brake").unwrap();
        f.manager.start_controller("throttle_increase").unwrap();
        f.manager
            .dispatch(&[
                ControllerAction::StopAllControllers,
                ControllerAction::SwitchToManualMode,
            ])
            .unwrap();
        assert!(!f.throttle.is_enabled());
        assert!(!f.brake.is_enabled());
        assert_eq!(f.state.flight_mode(), FlightMode::Manual);
        let status = f.manager.controller_status();
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| !s.enabled));
    }

    #[test]
    fn unknown_controller_lookup_is_an_error() {
        let f = fixture(EventTable::new());
        assert_eq!(
            f.manager.stop_controller("warp"),
            Err(ControllerError::Unknown {
                name: "warp".into()
            })
        );
        assert!(f.manager.controller("brake").is_some());
    }

    #[test]
    fn failing_start_is_reported_and_later_actions_still_run() {
        let f = fixture(EventTable::new());
        f.state.set_flight_mode(FlightMode::Auto);
        f.brake.fail_next_start();
        let err = f
            .manager
            .dispatch(&[
                ControllerAction::StartBrake,
                ControllerAction::StartThrottleIncrease,
            ])
            .unwrap_err();
        assert!(matches!(err, HandlerError::Controller(_)));
        assert!(f.throttle.is_enabled());
        assert_eq!(f.manager.stats().failures, 1);
    }

    #[test]
    fn bus_events_dispatch_once_on_the_work_thread() {
        let events = EventTable::from_definitions([EventDefinition::new("GO", |_| true)
            .actions([
                ControllerAction::SwitchToAutoMode,
                ControllerAction::StartBrake,
            ])])
        .unwrap();
        let mut f = fixture(events);
        let hooked = Arc::new(AtomicU64::new(0));
        {
            let hooked = Arc::clone(&hooked);
            assert!(f.manager.set_event_hook(move |_| {
                hooked.fetch_add(1, Ordering::SeqCst);
            }));
        }
        let bus = EventBus::new(BusConfig::default()).unwrap();
        f.manager.subscribe_all(&bus);
        f.manager.start().unwrap();

        for _ in 0..5 {
            bus.publish("GO");
        }
        assert!(wait_until(TIMEOUT, || bus.stats_for("GO").processed == 5));
        assert!(wait_until(TIMEOUT, || f.brake.is_enabled()));
        assert!(wait_until(TIMEOUT, || f.manager.pending_work() == 0));

        assert_eq!(f.brake.starts(), 1);
        assert_eq!(hooked.load(Ordering::SeqCst), 1);
        let stats = f.manager.stats();
        assert_eq!(stats.events_acted, 1);
        assert_eq!(stats.duplicates_skipped, 4);

        f.manager.shutdown();
        assert!(!f.manager.is_running());
        assert!(!f.brake.is_enabled());
    }

    #[test]
    fn panicking_controller_does_not_kill_the_work_thread() {
        let mut f = fixture(EventTable::new());
        f.state.set_flight_mode(FlightMode::Auto);
        f.throttle.panic_next_start();
        f.manager.start().unwrap();
        f.manager.enqueue(&[ControllerAction::StartThrottleIncrease]);
        f.manager.enqueue(&[ControllerAction::StartBrake]);
        assert!(wait_until(TIMEOUT, || f.brake.is_enabled()));
        assert!(f.manager.is_running());
        assert_eq!(f.manager.stats().failures, 1);
        f.manager.stop();
        assert!(f.brake.is_enabled(), "stop() must not touch controllers");
    }
}
