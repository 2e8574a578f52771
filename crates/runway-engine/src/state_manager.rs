//! The single consumer of the state update queue.

use std::sync::Arc;

use runway_core::{Scalar, SharedState, StateUpdateQueue};
use tracing::trace;

use crate::clock::SimClock;
use crate::config::ConfigError;
use crate::participant::ParticipantThread;

/// Drains the update queue once per tick and publishes a fresh snapshot.
#[derive(Debug)]
pub struct StateManager {
    state: Arc<SharedState>,
    updates: Arc<StateUpdateQueue>,
}

impl StateManager {
    /// Create a manager for `state` fed by `updates`.
    pub fn new(state: Arc<SharedState>, updates: Arc<StateUpdateQueue>) -> Self {
        Self { state, updates }
    }

    /// Apply every pending update in order, then publish the composite
    /// snapshot. Returns the number of updates applied.
    pub fn process(&self) -> usize {
        let applied = self.updates.apply_all(&self.state);
        let version = self.state.publish_snapshot();
        trace!(
            applied,
            version,
            time = self.state.get(Scalar::SimulationTime),
            position = self.state.get(Scalar::Position),
            velocity = self.state.get(Scalar::Velocity),
            acceleration = self.state.get(Scalar::Acceleration),
            throttle = self.state.get(Scalar::Throttle),
            brake = self.state.get(Scalar::Brake),
            "state updated"
        );
        applied
    }

    /// Run the manager as a tick participant.
    pub fn spawn(self, clock: &Arc<SimClock>) -> Result<ParticipantThread, ConfigError> {
        ParticipantThread::spawn(clock, "state-manager", move |_| {
            self.process();
        })
    }
}
