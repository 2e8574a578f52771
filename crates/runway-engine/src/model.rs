//! Drives a vehicle [`Model`] once per tick.

use std::sync::Arc;

use runway_core::{ClockReading, Model, Scalar, SharedState, StateUpdateQueue};
use tracing::debug;

use crate::clock::SimClock;
use crate::config::ConfigError;
use crate::participant::ParticipantThread;

/// Steps a model and stamps the simulation time into the state store.
pub struct ModelRunner {
    model: Box<dyn Model>,
    state: Arc<SharedState>,
    updates: Arc<StateUpdateQueue>,
}

impl ModelRunner {
    /// Create a runner for `model`.
    pub fn new(model: Box<dyn Model>, state: Arc<SharedState>, updates: Arc<StateUpdateQueue>) -> Self {
        Self {
            model,
            state,
            updates,
        }
    }

    /// Step the model for one tick.
    pub fn step(&mut self, clock: ClockReading) {
        self.model.step(&self.state, &self.updates, clock);
        self.state.set(Scalar::SimulationTime, clock.time);
    }

    /// Run the model as a tick participant.
    pub fn spawn(mut self, clock: &Arc<SimClock>) -> Result<ParticipantThread, ConfigError> {
        debug!(model = self.model.name(), "starting model runner");
        ParticipantThread::spawn(clock, "model", move |reading| self.step(reading))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runway_core::StateUpdate;

    struct Constant;

    impl Model for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn step(&mut self, _state: &SharedState, updates: &StateUpdateQueue, clock: ClockReading) {
            updates.push(StateUpdate::new(Scalar::Velocity, clock.tick as f64));
        }
    }

    #[test]
    fn step_pushes_updates_and_stamps_time() {
        let state = Arc::new(SharedState::new());
        let updates = Arc::new(StateUpdateQueue::new());
        let mut runner = ModelRunner::new(Box::new(Constant), Arc::clone(&state), Arc::clone(&updates));
        runner.step(ClockReading {
            tick: 3,
            time: 0.03,
            dt: 0.01,
        });
        assert_eq!(state.simulation_time(), 0.03);
        assert_eq!(updates.try_pop(), Some(StateUpdate::new(Scalar::Velocity, 3.0)));
    }
}
