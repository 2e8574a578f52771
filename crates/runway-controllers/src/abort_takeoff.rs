//! Rejected takeoff.
//!
//! The aircraft accelerates for takeoff in AUTO mode. At the abort speed
//! throttle is cut and the brake applied; once it has slowed to taxi speed
//! the brake is released and cruise control holds a slow roll-out, the
//! brake point re-applies the brake, and at standstill past the brake point
//! the pilot takes over.

use std::sync::Arc;

use runway_core::{ControlFlag, Scalar, SharedState};
use runway_engine::{
    require_positive, ConfigError, ControllerAction, EventDefinition, EventTable, Scenario,
    SimContext,
};
use tracing::{info, warn};

use crate::controller::standard_controllers;
use crate::model::{AircraftParams, LinearTaxiModel};

/// Takeoff roll begins.
pub const START_THROTTLE: &str = "START_THROTTLE";
/// Abort speed reached.
pub const ABORT_TAKEOFF: &str = "ABORT_TAKEOFF";
/// Slowed to taxi speed after the abort.
pub const START_CRUISE: &str = "START_CRUISE";
/// Brake point reached.
pub const START_BRAKE: &str = "START_BRAKE";
/// Standstill after the abort.
pub const FINAL_STOP: &str = "FINAL_STOP";

/// Rejected takeoff parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct AbortTakeoffParams {
    /// Simulation time at which the takeoff roll begins, s.
    pub throttle_start_time: f64,
    /// Takeoff target speed, m/s.
    pub target_speed: f64,
    /// Speed at which the takeoff is rejected, m/s.
    pub abort_speed: f64,
    /// At or below this speed after the abort, cruise control takes over, m/s.
    pub taxi_speed: f64,
    /// Cruise target for the roll-out, m/s.
    pub cruise_speed: f64,
    /// Cruise is only engaged short of this position, m.
    pub cruise_limit_position: f64,
    /// Position at which the brake is re-applied, m.
    pub brake_position: f64,
    /// Speed at or below which the aircraft counts as stopped, m/s.
    pub zero_velocity_threshold: f64,
    /// Stop the run beyond this position, m.
    pub stop_position: f64,
    /// Stop the run after this simulation time, s.
    pub stop_time: f64,
    /// Airframe.
    pub aircraft: AircraftParams,
}

impl Default for AbortTakeoffParams {
    fn default() -> Self {
        Self {
            throttle_start_time: 1.0,
            target_speed: 100.0,
            abort_speed: 40.0,
            // 15 km/h
            taxi_speed: 4.17,
            cruise_speed: 3.0,
            cruise_limit_position: 1500.0,
            brake_position: 1000.0,
            zero_velocity_threshold: 0.1,
            stop_position: 3000.0,
            stop_time: 180.0,
            aircraft: AircraftParams::AC2,
        }
    }
}

impl AbortTakeoffParams {
    /// Check every parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("throttle_start_time", self.throttle_start_time)?;
        require_positive("target_speed", self.target_speed)?;
        require_positive("abort_speed", self.abort_speed)?;
        require_positive("taxi_speed", self.taxi_speed)?;
        require_positive("cruise_speed", self.cruise_speed)?;
        require_positive("cruise_limit_position", self.cruise_limit_position)?;
        require_positive("brake_position", self.brake_position)?;
        require_positive("zero_velocity_threshold", self.zero_velocity_threshold)?;
        require_positive("stop_position", self.stop_position)?;
        require_positive("stop_time", self.stop_time)?;
        if self.taxi_speed >= self.abort_speed {
            return Err(ConfigError::InvalidParameter {
                name: "taxi_speed",
                value: self.taxi_speed,
            });
        }
        self.aircraft.validate()
    }
}

/// Put `state` into the pre-takeoff condition.
pub fn initialize(state: &SharedState, params: &AbortTakeoffParams) {
    state.reset_motion();
    state.set_flag(ControlFlag::AbortTriggered, false);
    state.set(Scalar::TargetSpeed, params.target_speed);
}

/// The five rejected-takeoff events.
pub fn events(params: &AbortTakeoffParams) -> Result<EventTable, ConfigError> {
    params.validate()?;
    let start_time = params.throttle_start_time;
    let abort_speed = params.abort_speed;
    let taxi_speed = params.taxi_speed;
    let cruise_limit = params.cruise_limit_position;
    let brake_position = params.brake_position;
    let threshold = params.zero_velocity_threshold;

    EventTable::from_definitions([
        EventDefinition::new(START_THROTTLE, move |s| {
            s.flag(ControlFlag::SimulationStarted)
                && s.flag(ControlFlag::SimulationRunning)
                && s.simulation_time() >= start_time
        })
        .description("takeoff roll")
        .actions([
            ControllerAction::SwitchToAutoMode,
            ControllerAction::StartThrottleIncrease,
        ])
        .response("switch to AUTO and advance the throttle"),
        EventDefinition::new(ABORT_TAKEOFF, move |s| {
            s.velocity() >= abort_speed && !s.flag(ControlFlag::AbortTriggered)
        })
        .description("abort speed reached")
        .actions([
            ControllerAction::StopThrottleIncrease,
            ControllerAction::StartThrottleDecrease,
            ControllerAction::StartBrake,
        ])
        .response("cut throttle and brake"),
        EventDefinition::new(START_CRUISE, move |s| {
            s.velocity() <= taxi_speed
                && s.position() < cruise_limit
                && s.flag(ControlFlag::AbortTriggered)
        })
        .description("slowed to taxi speed")
        .actions([
            ControllerAction::StopThrottleDecrease,
            ControllerAction::StopBrake,
            ControllerAction::StartCruise,
        ])
        .response("release the brake and hold taxi speed"),
        EventDefinition::new(START_BRAKE, move |s| s.position() >= brake_position)
            .description("brake point reached")
            .actions([ControllerAction::StartBrake])
            .response("apply the brake"),
        EventDefinition::new(FINAL_STOP, move |s| {
            s.velocity() <= threshold
                && s.position() >= brake_position
                && s.flag(ControlFlag::AbortTriggered)
        })
        .description("aircraft stopped after the abort")
        .actions([
            ControllerAction::StopAllControllers,
            ControllerAction::SwitchToManualMode,
        ])
        .response("stop every controller and hand back to the pilot"),
    ])
}

/// A complete rejected-takeoff scenario in `ctx`.
///
/// The event hook records the abort in [`ControlFlag::AbortTriggered`],
/// lowers the cruise target at `START_CRUISE` and signals the final stop.
pub fn scenario(ctx: &SimContext, params: &AbortTakeoffParams) -> Result<Scenario, ConfigError> {
    let events = events(params)?;
    let controllers = standard_controllers(ctx)?;
    let model = LinearTaxiModel::new(params.aircraft)?;
    initialize(&ctx.state, params);

    let hook_state = Arc::clone(&ctx.state);
    let cruise_speed = params.cruise_speed;
    let stop_position = params.stop_position;
    let stop_time = params.stop_time;
    Ok(Scenario::new(events)
        .with_controllers(controllers)
        .with_model(model)
        .on_event(move |event| match event {
            ABORT_TAKEOFF => {
                hook_state.set_flag(ControlFlag::AbortTriggered, true);
                warn!(velocity = hook_state.velocity(), "takeoff rejected");
            }
            START_CRUISE => hook_state.set(Scalar::TargetSpeed, cruise_speed),
            FINAL_STOP => hook_state.notify_final_stop(),
            _ => {}
        })
        .stop_when(move |s| {
            let ended = s.position() > stop_position || s.simulation_time() > stop_time;
            if ended {
                info!(
                    position = s.position(),
                    time = s.simulation_time(),
                    "run limit reached"
                );
            }
            ended || s.flag(ControlFlag::FinalStopEnabled)
        }))
}
