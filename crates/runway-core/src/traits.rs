//! Capability traits for the kernel's external collaborators.
//!
//! - [`Controller`]: an actuator loop the dispatcher starts and stops.
//! - [`Model`]: the vehicle model stepped once per tick.

use crate::error::ControllerError;
use crate::state::{Actuator, SharedState};
use crate::update::StateUpdateQueue;

/// What a participant knows about the tick it is working on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClockReading {
    /// Tick index, starting at 1 for the first admitted tick.
    pub tick: u64,
    /// Simulation time at the start of this tick, seconds.
    pub time: f64,
    /// Time step, seconds.
    pub dt: f64,
}

/// An actuator controller managed by the dispatcher.
///
/// Controllers are created once, owned by the controller manager for the
/// whole run, and started or stopped only through dispatched actions.
/// `stop()` must be idempotent and must join any internal thread.
pub trait Controller: Send + Sync {
    /// Unique name, used as the dispatch key.
    fn name(&self) -> &str;

    /// Begin acting. Calling `start` on a running controller is a no-op.
    fn start(&self) -> Result<(), ControllerError>;

    /// Stop acting and release any worker thread.
    fn stop(&self);

    /// Returns `true` while the controller is running.
    fn is_enabled(&self) -> bool;

    /// The controller's current output, for status reporting.
    fn current_value(&self) -> f64;

    /// Actuator the automatic system must hold before this controller may
    /// start. `None` means the controller is not authority-gated.
    fn required_authority(&self) -> Option<Actuator> {
        None
    }
}

/// A vehicle model stepped once per tick.
///
/// `step` reads the state store, pushes zero or more updates to the queue
/// and must not block beyond its own computation. Parameters belong to
/// the implementing type.
pub trait Model: Send {
    /// Name for logs.
    fn name(&self) -> &str;

    /// Advance the model by one tick.
    fn step(&mut self, state: &SharedState, updates: &StateUpdateQueue, clock: ClockReading);
}
