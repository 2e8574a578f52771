//! Longitudinal ground-roll model for a fixed-wing aircraft.
//!
//! Forces, per tick, from the current state:
//!
//! ```text
//! thrust      = throttle * max_thrust
//! drag        = 0.5 * rho * A * cd * v^2
//! brake_force = brake * max_brake_force * clamp(|v| / 50, 0.3, 1)   (|v| >= 0.01)
//! friction    = mu * m * g                                         (|v| <  0.01)
//! ```
//!
//! Drag and brake force oppose the direction of motion. At standstill the
//! net force must overcome static friction before the aircraft moves.
//! Integration is explicit Euler: velocity from the new acceleration,
//! position from the previous velocity.

use runway_core::{ClockReading, Model, Scalar, SharedState, StateUpdate, StateUpdateQueue};
use runway_engine::{require_non_negative, require_positive, ConfigError};

const AIR_DENSITY: f64 = 1.225;
const FRONTAL_AREA: f64 = 50.0;
const GRAVITY: f64 = 9.81;
const STANDSTILL: f64 = 0.01;
const BRAKE_REFERENCE_SPEED: f64 = 50.0;
const MIN_BRAKE_FACTOR: f64 = 0.3;

/// Airframe parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AircraftParams {
    /// Mass, kg.
    pub mass: f64,
    /// Thrust at full throttle, N.
    pub max_thrust: f64,
    /// Brake force at full brake and reference speed, N.
    pub max_brake_force: f64,
    /// Drag coefficient.
    pub drag_coefficient: f64,
    /// Static friction coefficient.
    pub static_friction: f64,
}

impl AircraftParams {
    /// Reference airframe AC1.
    pub const AC1: Self = Self {
        mass: 80_000.0,
        max_thrust: 500_000.0,
        max_brake_force: 400_000.0,
        drag_coefficient: 0.02,
        static_friction: 0.02,
    };

    /// Reference airframe AC2, slightly heavier than AC1.
    pub const AC2: Self = Self {
        mass: 85_000.0,
        max_thrust: 520_000.0,
        max_brake_force: 420_000.0,
        drag_coefficient: 0.021,
        static_friction: 0.021,
    };

    /// Check every parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("mass", self.mass)?;
        require_non_negative("max_thrust", self.max_thrust)?;
        require_non_negative("max_brake_force", self.max_brake_force)?;
        require_non_negative("drag_coefficient", self.drag_coefficient)?;
        require_non_negative("static_friction", self.static_friction)
    }
}

impl Default for AircraftParams {
    fn default() -> Self {
        Self::AC1
    }
}

/// Force breakdown for one step, N.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Forces {
    /// Engine thrust.
    pub thrust: f64,
    /// Aerodynamic drag magnitude.
    pub drag: f64,
    /// Brake force magnitude.
    pub brake: f64,
    /// Static friction available at standstill.
    pub static_friction: f64,
    /// Resultant along the runway.
    pub net: f64,
}

/// Linear taxi dynamics.
#[derive(Clone, Debug, Default)]
pub struct LinearTaxiModel {
    params: AircraftParams,
}

impl LinearTaxiModel {
    /// A model for `params`.
    pub fn new(params: AircraftParams) -> Result<Self, ConfigError> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Airframe parameters.
    pub fn params(&self) -> &AircraftParams {
        &self.params
    }

    /// Forces at `velocity` for the given actuator positions.
    pub fn forces(&self, throttle: f64, brake: f64, velocity: f64) -> Forces {
        let p = &self.params;
        let thrust = throttle * p.max_thrust;
        let drag = 0.5 * AIR_DENSITY * FRONTAL_AREA * p.drag_coefficient * velocity * velocity;
        let speed = velocity.abs();

        if speed < STANDSTILL {
            let static_friction = p.static_friction * p.mass * GRAVITY;
            let applied = thrust - drag;
            let net = if applied.abs() < static_friction {
                0.0
            } else {
                applied - static_friction * applied.signum()
            };
            return Forces {
                thrust,
                drag,
                brake: 0.0,
                static_friction,
                net,
            };
        }

        let factor = (speed / BRAKE_REFERENCE_SPEED).clamp(MIN_BRAKE_FACTOR, 1.0);
        let brake_force = brake * p.max_brake_force * factor;
        let direction = velocity.signum();
        Forces {
            thrust,
            drag,
            brake: brake_force,
            static_friction: 0.0,
            net: thrust - direction * (drag + brake_force),
        }
    }
}

impl Model for LinearTaxiModel {
    fn name(&self) -> &str {
        "linear-taxi"
    }

    fn step(&mut self, state: &SharedState, updates: &StateUpdateQueue, clock: ClockReading) {
        let velocity = state.velocity();
        let position = state.position();
        let forces = self.forces(state.get(Scalar::Throttle), state.get(Scalar::Brake), velocity);
        state.set(Scalar::Thrust, forces.thrust);
        state.set(Scalar::DragForce, forces.drag);
        state.set(Scalar::BrakeForce, forces.brake);

        let acceleration = forces.net / self.params.mass;
        let mut next_velocity = velocity + acceleration * clock.dt;
        // Braking cannot reverse the direction of travel.
        if forces.thrust == 0.0 && velocity != 0.0 && next_velocity.signum() != velocity.signum() {
            next_velocity = 0.0;
        }
        updates.push(StateUpdate::new(Scalar::Velocity, next_velocity));
        updates.push(StateUpdate::new(Scalar::Position, position + velocity * clock.dt));
        updates.push(StateUpdate::new(Scalar::Acceleration, acceleration));
    }
}
