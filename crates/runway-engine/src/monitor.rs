//! The event monitor.
//!
//! Once per tick the monitor evaluates every not-yet-detected event's
//! predicate against the state store. The first time a predicate holds it
//! marks the event detected in the event table and publishes it on the bus,
//! exactly once per run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use runway_core::{ControlFlag, SharedState};
use smallvec::SmallVec;
use tracing::{error, info};

use crate::bus::{EventBus, PublishOutcome};
use crate::clock::SimClock;
use crate::config::ConfigError;
use crate::event::EventTable;
use crate::participant::ParticipantThread;

/// Evaluates trigger predicates and publishes matching events.
pub struct EventMonitor {
    events: Arc<EventTable>,
    bus: Arc<EventBus>,
    state: Arc<SharedState>,
    last_running: bool,
    last_started: bool,
}

impl EventMonitor {
    /// Create a monitor over `events`.
    pub fn new(events: Arc<EventTable>, bus: Arc<EventBus>, state: Arc<SharedState>) -> Self {
        Self {
            events,
            bus,
            state,
            last_running: false,
            last_started: false,
        }
    }

    /// Evaluate every pending predicate once and publish the ones that hold.
    ///
    /// Returns the names published by this call. A predicate that panics is
    /// logged and treated as not holding.
    pub fn scan(&mut self) -> SmallVec<[String; 4]> {
        self.log_run_state();
        let mut fired = SmallVec::new();
        for def in self.events.iter() {
            if self.events.is_detected(def.name()) {
                continue;
            }
            let holds = match catch_unwind(AssertUnwindSafe(|| def.is_triggered_by(&self.state))) {
                Ok(holds) => holds,
                Err(_) => {
                    error!(event = def.name(), "trigger predicate panicked");
                    false
                }
            };
            if !holds || !self.events.try_mark_detected(def.name()) {
                continue;
            }
            info!(
                event = def.name(),
                description = def.description_text(),
                time = self.state.simulation_time(),
                "event triggered"
            );
            if self.bus.publish(def.name()) != PublishOutcome::Queued {
                error!(event = def.name(), "triggered event could not be queued");
            }
            fired.push(def.name().to_string());
        }
        fired
    }

    fn log_run_state(&mut self) {
        let running = self.state.flag(ControlFlag::SimulationRunning);
        let started = self.state.flag(ControlFlag::SimulationStarted);
        if running != self.last_running || started != self.last_started {
            info!(running, started, "simulation run state changed");
            self.last_running = running;
            self.last_started = started;
        }
    }

    /// Run the monitor as a tick participant.
    pub fn spawn(mut self, clock: &Arc<SimClock>) -> Result<ParticipantThread, ConfigError> {
        ParticipantThread::spawn(clock, "event-monitor", move |_| {
            self.scan();
        })
    }
}
