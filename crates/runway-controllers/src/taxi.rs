//! The reference taxi run.
//!
//! Throttle comes up one second into the run, the aircraft rolls to the
//! brake point, throttle is wound down and the brake applied, and once the
//! aircraft is (nearly) at rest every controller is stopped and the pilot
//! gets the aircraft back in MANUAL mode.
//!
//! | Event            | Trigger                                   | Actions                                      |
//! |------------------|-------------------------------------------|----------------------------------------------|
//! | `START_THROTTLE` | started, running, `t >= 1 s`              | `START_THROTTLE_INCREASE`                    |
//! | `START_BRAKE`    | `position >= 500 m`                       | `STOP_THROTTLE_INCREASE`, `START_THROTTLE_DECREASE`, `START_BRAKE` |
//! | `FINAL_STOP`     | `velocity <= 0.1 m/s`                     | `STOP_ALL_CONTROLLERS`, `SWITCH_TO_MANUAL_MODE` |

use std::sync::Arc;

use runway_core::{ControlFlag, Scalar, SharedState};
use runway_engine::{
    require_positive, ConfigError, ControllerAction, EventDefinition, EventTable, Scenario,
    SimContext,
};
use tracing::info;

use crate::controller::standard_controllers;
use crate::model::{AircraftParams, LinearTaxiModel};

/// Throttle-up event.
pub const START_THROTTLE: &str = "START_THROTTLE";
/// Brake-point event.
pub const START_BRAKE: &str = "START_BRAKE";
/// Standstill event.
pub const FINAL_STOP: &str = "FINAL_STOP";

/// Taxi run parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct TaxiParams {
    /// Simulation time at which throttle comes up, s.
    pub throttle_start_time: f64,
    /// Position at which braking starts, m.
    pub brake_position: f64,
    /// Speed at or below which the aircraft counts as stopped, m/s.
    pub zero_velocity_threshold: f64,
    /// Cruise target speed, m/s.
    pub target_speed: f64,
    /// Stop the run beyond this position, m.
    pub stop_position: f64,
    /// Stop the run after this simulation time, s.
    pub stop_time: f64,
    /// Only fire `FINAL_STOP` once the brake has been commanded. With the
    /// default `false` the event fires at the standstill the run starts in.
    pub arm_final_stop_after_brake: bool,
    /// Also stop the run once `FINAL_STOP` has been acted on.
    pub stop_at_final_stop: bool,
    /// Airframe.
    pub aircraft: AircraftParams,
}

impl Default for TaxiParams {
    fn default() -> Self {
        Self {
            throttle_start_time: 1.0,
            brake_position: 500.0,
            zero_velocity_threshold: 0.1,
            target_speed: 30.0,
            stop_position: 1500.0,
            stop_time: 180.0,
            arm_final_stop_after_brake: false,
            stop_at_final_stop: true,
            aircraft: AircraftParams::AC1,
        }
    }
}

impl TaxiParams {
    /// Check every parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("throttle_start_time", self.throttle_start_time)?;
        require_positive("brake_position", self.brake_position)?;
        require_positive("zero_velocity_threshold", self.zero_velocity_threshold)?;
        require_positive("target_speed", self.target_speed)?;
        require_positive("stop_position", self.stop_position)?;
        require_positive("stop_time", self.stop_time)?;
        self.aircraft.validate()
    }
}

/// Put `state` into the taxi starting condition: at rest, no actuators,
/// controller flags cleared and the cruise target set.
pub fn initialize(state: &SharedState, params: &TaxiParams) {
    state.reset_motion();
    state.set(Scalar::TargetSpeed, params.target_speed);
}

/// The three taxi events.
pub fn events(params: &TaxiParams) -> Result<EventTable, ConfigError> {
    params.validate()?;
    let start_time = params.throttle_start_time;
    let brake_position = params.brake_position;
    let threshold = params.zero_velocity_threshold;
    let armed_only = params.arm_final_stop_after_brake;

    EventTable::from_definitions([
        EventDefinition::new(START_THROTTLE, move |s| {
            s.flag(ControlFlag::SimulationStarted)
                && s.flag(ControlFlag::SimulationRunning)
                && s.simulation_time() >= start_time
        })
        .description("throttle up")
        .actions([ControllerAction::StartThrottleIncrease])
        .response("start the throttle-increase controller"),
        EventDefinition::new(START_BRAKE, move |s| s.position() >= brake_position)
            .description("brake point reached")
            .actions([
                ControllerAction::StopThrottleIncrease,
                ControllerAction::StartThrottleDecrease,
                ControllerAction::StartBrake,
            ])
            .response("hand the throttle to the ramp-down and apply the brake"),
        EventDefinition::new(FINAL_STOP, move |s| {
            s.velocity() <= threshold && (!armed_only || s.flag(ControlFlag::BrakeControlEnabled))
        })
        .description("aircraft stopped")
        .actions([
            ControllerAction::StopAllControllers,
            ControllerAction::SwitchToManualMode,
        ])
        .response("stop every controller and hand back to the pilot"),
    ])
}

/// A complete taxi scenario in `ctx`: events, the five reference
/// controllers, the linear taxi model and the run-end condition.
///
/// The caller chooses the flight mode and attaches a recorder sink.
pub fn scenario(ctx: &SimContext, params: &TaxiParams) -> Result<Scenario, ConfigError> {
    let events = events(params)?;
    let controllers = standard_controllers(ctx)?;
    let model = LinearTaxiModel::new(params.aircraft)?;
    initialize(&ctx.state, params);

    let hook_state = Arc::clone(&ctx.state);
    let stop_position = params.stop_position;
    let stop_time = params.stop_time;
    let stop_at_final_stop = params.stop_at_final_stop;
    Ok(Scenario::new(events)
        .with_controllers(controllers)
        .with_model(model)
        .on_event(move |event| {
            if event == FINAL_STOP {
                hook_state.notify_final_stop();
            }
        })
        .stop_when(move |s| {
            let ended = s.position() > stop_position || s.simulation_time() > stop_time;
            let stopped = stop_at_final_stop && s.flag(ControlFlag::FinalStopEnabled);
            if ended {
                info!(
                    position = s.position(),
                    time = s.simulation_time(),
                    "run limit reached"
                );
            }
            ended || stopped
        }))
}
