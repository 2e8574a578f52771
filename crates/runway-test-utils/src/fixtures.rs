//! Reusable model fixtures and polling helpers.
//!
//! - [`RecordingModel`]: records every clock reading it is stepped with.
//! - [`ConstantSpeedModel`]: drives velocity and position through the
//!   update queue at a fixed speed.
//! - [`wait_until`]: bounded polling for threaded tests.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use runway_core::{ClockReading, Model, Scalar, SharedState, StateUpdate, StateUpdateQueue};

/// Records each reading; writes nothing.
#[derive(Clone, Default)]
pub struct RecordingModel {
    readings: Arc<Mutex<Vec<ClockReading>>>,
}

impl RecordingModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps(&self) -> usize {
        self.readings().len()
    }

    pub fn readings(&self) -> Vec<ClockReading> {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Model for RecordingModel {
    fn name(&self) -> &str {
        "recording"
    }

    fn step(&mut self, _state: &SharedState, _updates: &StateUpdateQueue, clock: ClockReading) {
        self.readings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(clock);
    }
}

/// Moves at `speed` m/s regardless of actuators.
#[derive(Clone, Copy, Debug)]
pub struct ConstantSpeedModel {
    pub speed: f64,
}

impl ConstantSpeedModel {
    pub fn new(speed: f64) -> Self {
        Self { speed }
    }
}

impl Model for ConstantSpeedModel {
    fn name(&self) -> &str {
        "constant-speed"
    }

    fn step(&mut self, state: &SharedState, updates: &StateUpdateQueue, clock: ClockReading) {
        updates.push(StateUpdate::new(Scalar::Velocity, self.speed));
        updates.push(StateUpdate::new(
            Scalar::Position,
            state.position() + self.speed * clock.dt,
        ));
    }
}

/// Poll `cond` every millisecond until it holds or `timeout` elapses.
/// Returns the last value of `cond`.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_until_times_out() {
        assert!(!wait_until(Duration::from_millis(20), || false));
        assert!(wait_until(Duration::from_millis(20), || true));
    }

    #[test]
    fn constant_speed_pushes_velocity_then_position() {
        let state = SharedState::new();
        let updates = StateUpdateQueue::new();
        let mut model = ConstantSpeedModel::new(10.0);
        model.step(
            &state,
            &updates,
            ClockReading {
                tick: 1,
                time: 0.01,
                dt: 0.01,
            },
        );
        assert_eq!(updates.apply_all(&state), 2);
        assert_eq!(state.velocity(), 10.0);
        assert!((state.position() - 0.1).abs() < 1e-12);
    }
}
