//! Loop controllers.
//!
//! Every reference controller is a [`LoopController`]: a tick participant
//! thread that, while its enable flag is set in the state store, applies
//! one [`ControlLaw`] per tick and pushes the resulting actuator values
//! through the update queue. Starting spawns the thread; stopping joins it.

use std::f64::consts::PI;
use std::fmt;
use std::sync::{Arc, Mutex};

use runway_core::sync::lock;
use runway_core::{
    Actuator, AtomicF64, ControlFlag, Controller, ControllerError, Scalar, SharedState,
    StateUpdate,
};
use runway_engine::action::names;
use runway_engine::{
    require_non_negative, require_positive, ConfigError, ControllerSet, ParticipantThread,
    SimContext,
};
use smallvec::SmallVec;
use tracing::{debug, trace};

/// Updates produced by one control step.
pub type ControlOutput = SmallVec<[StateUpdate; 2]>;

/// Throttle changes smaller than this are not pushed.
const THROTTLE_EPSILON: f64 = 1e-6;

/// Largest commanded pitch angle magnitude, radians.
pub const MAX_TARGET_PITCH: f64 = PI / 4.0;

/// Pitch rate produced per unit of pitch control output, rad/s.
const PITCH_RATE_SCALE: f64 = 0.1;

const PITCH_INTEGRAL_LIMIT: f64 = 10.0;

// ── ControlLaw ───────────────────────────────────────────────────

/// PID gains.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PidGains {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.05,
        }
    }
}

/// Integrator state carried between steps.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LawMemory {
    integral: f64,
    previous_error: f64,
}

/// The closed set of control laws.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ControlLaw {
    /// Ramp throttle up at `rate` per second, capped at 1.
    ThrottleIncrease {
        /// Throttle fraction per second.
        rate: f64,
    },
    /// Ramp throttle down at `rate` per second, floored at 0.
    ThrottleDecrease {
        /// Throttle fraction per second.
        rate: f64,
    },
    /// Ramp brake up at `rate` per second, capped at `max`.
    Brake {
        /// Brake fraction per second.
        rate: f64,
        /// Brake ceiling.
        max: f64,
    },
    /// Proportional throttle/brake split on the target-speed error.
    Cruise {
        /// Proportional gain, per m/s of error.
        gain: f64,
        /// Throttle ceiling.
        max_throttle: f64,
        /// Brake ceiling.
        max_brake: f64,
    },
    /// PID on pitch angle toward the controller's target.
    PitchHold {
        /// Loop gains.
        gains: PidGains,
    },
}

impl ControlLaw {
    /// Throttle ramp-up at 0.1/s.
    pub const fn throttle_increase() -> Self {
        Self::ThrottleIncrease { rate: 0.1 }
    }

    /// Throttle ramp-down at 0.2/s.
    pub const fn throttle_decrease() -> Self {
        Self::ThrottleDecrease { rate: 0.2 }
    }

    /// Brake ramp at 0.2/s up to full brake.
    pub const fn brake() -> Self {
        Self::Brake { rate: 0.2, max: 1.0 }
    }

    /// Cruise with gain 0.1.
    pub const fn cruise() -> Self {
        Self::Cruise {
            gain: 0.1,
            max_throttle: 1.0,
            max_brake: 1.0,
        }
    }

    /// Pitch hold with the default gains.
    pub fn pitch_hold() -> Self {
        Self::PitchHold {
            gains: PidGains::default(),
        }
    }

    /// State flag that gates this law.
    pub fn enable_flag(&self) -> ControlFlag {
        match self {
            Self::ThrottleIncrease { .. } | Self::ThrottleDecrease { .. } => {
                ControlFlag::ThrottleControlEnabled
            }
            Self::Brake { .. } => ControlFlag::BrakeControlEnabled,
            Self::Cruise { .. } => ControlFlag::CruiseControlEnabled,
            Self::PitchHold { .. } => ControlFlag::PitchControlEnabled,
        }
    }

    /// Actuator the automatic system must hold to run this law.
    pub fn required_authority(&self) -> Option<Actuator> {
        match self {
            Self::ThrottleIncrease { .. } | Self::ThrottleDecrease { .. } | Self::Cruise { .. } => {
                Some(Actuator::Throttle)
            }
            Self::Brake { .. } => Some(Actuator::Brake),
            Self::PitchHold { .. } => None,
        }
    }

    /// Field reported as the controller's current value.
    pub fn output_field(&self) -> Scalar {
        match self {
            Self::ThrottleIncrease { .. } | Self::ThrottleDecrease { .. } | Self::Cruise { .. } => {
                Scalar::Throttle
            }
            Self::Brake { .. } => Scalar::Brake,
            Self::PitchHold { .. } => Scalar::PitchControlOutput,
        }
    }

    /// Reject non-finite or negative parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match *self {
            Self::ThrottleIncrease { rate } | Self::ThrottleDecrease { rate } => {
                require_positive("rate", rate)
            }
            Self::Brake { rate, max } => {
                require_positive("rate", rate)?;
                require_positive("max", max)
            }
            Self::Cruise {
                gain,
                max_throttle,
                max_brake,
            } => {
                require_positive("gain", gain)?;
                require_positive("max_throttle", max_throttle)?;
                require_positive("max_brake", max_brake)
            }
            Self::PitchHold { gains } => {
                require_non_negative("kp", gains.kp)?;
                require_non_negative("ki", gains.ki)?;
                require_non_negative("kd", gains.kd)
            }
        }
    }

    /// Compute one step of this law from the current state.
    pub fn step(
        &self,
        state: &SharedState,
        dt: f64,
        memory: &mut LawMemory,
        target_pitch: f64,
    ) -> ControlOutput {
        let mut out = ControlOutput::new();
        match *self {
            Self::ThrottleIncrease { rate } => {
                let current = state.get(Scalar::Throttle);
                let next = (current + rate * dt).clamp(0.0, 1.0);
                if (next - current).abs() > THROTTLE_EPSILON {
                    out.push(StateUpdate::new(Scalar::Throttle, next));
                }
            }
            Self::ThrottleDecrease { rate } => {
                let next = (state.get(Scalar::Throttle) - rate * dt).max(0.0);
                out.push(StateUpdate::new(Scalar::Throttle, next));
            }
            Self::Brake { rate, max } => {
                let next = (state.get(Scalar::Brake) + rate * dt).min(max);
                out.push(StateUpdate::new(Scalar::Brake, next));
            }
            Self::Cruise {
                gain,
                max_throttle,
                max_brake,
            } => {
                let error = state.get(Scalar::TargetSpeed) - state.velocity();
                let (throttle, brake) = if error > 0.0 {
                    ((gain * error).clamp(0.0, max_throttle), 0.0)
                } else {
                    (0.0, (-gain * error).clamp(0.0, max_brake))
                };
                out.push(StateUpdate::new(Scalar::Throttle, throttle));
                out.push(StateUpdate::new(Scalar::Brake, brake));
            }
            Self::PitchHold { gains } => {
                let error = (target_pitch - state.get(Scalar::PitchAngle)).clamp(-PI, PI);
                memory.integral = (memory.integral + gains.ki * error * dt)
                    .clamp(-PITCH_INTEGRAL_LIMIT, PITCH_INTEGRAL_LIMIT);
                let derivative = gains.kd * (error - memory.previous_error) / dt;
                memory.previous_error = error;
                let output = (gains.kp * error + memory.integral + derivative).clamp(-1.0, 1.0);
                out.push(StateUpdate::new(Scalar::PitchControlOutput, output));
                out.push(StateUpdate::new(Scalar::PitchRate, output * PITCH_RATE_SCALE));
            }
        }
        out
    }
}

// ── LoopController ───────────────────────────────────────────────

/// A controller that runs one [`ControlLaw`] as a tick participant.
pub struct LoopController {
    name: String,
    law: ControlLaw,
    ctx: SimContext,
    target_pitch: Arc<AtomicF64>,
    worker: Mutex<Option<ParticipantThread>>,
}

impl fmt::Debug for LoopController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopController")
            .field("name", &self.name)
            .field("law", &self.law)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl LoopController {
    /// A stopped controller named `name` running `law` in `ctx`.
    pub fn new(name: impl Into<String>, law: ControlLaw, ctx: SimContext) -> Result<Self, ConfigError> {
        law.validate()?;
        Ok(Self {
            name: name.into(),
            law,
            ctx,
            target_pitch: Arc::new(AtomicF64::new(0.0)),
            worker: Mutex::new(None),
        })
    }

    /// The control law.
    pub fn law(&self) -> ControlLaw {
        self.law
    }

    /// Set the pitch target, clamped to ±[`MAX_TARGET_PITCH`]. Takes effect
    /// on the next step; only pitch hold reads it.
    pub fn set_target_pitch(&self, radians: f64) {
        self.target_pitch
            .store(radians.clamp(-MAX_TARGET_PITCH, MAX_TARGET_PITCH));
    }

    /// Current pitch target, radians.
    pub fn target_pitch(&self) -> f64 {
        self.target_pitch.load()
    }
}

impl Controller for LoopController {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&self) -> Result<(), ControllerError> {
        let mut worker = lock(&self.worker);
        if worker.as_ref().is_some_and(ParticipantThread::is_running) {
            return Ok(());
        }
        // A previous worker may have exited with the clock.
        if let Some(mut old) = worker.take() {
            old.stop();
        }

        let law = self.law;
        let flag = law.enable_flag();
        let state = Arc::clone(&self.ctx.state);
        let updates = Arc::clone(&self.ctx.updates);
        let target = Arc::clone(&self.target_pitch);
        let mut memory = LawMemory::default();
        let thread = ParticipantThread::spawn(&self.ctx.clock, &self.name, move |reading| {
            if !state.flag(flag) {
                return;
            }
            for update in law.step(&state, reading.dt, &mut memory, target.load()) {
                trace!(tick = reading.tick, field = %update.field, value = update.value, "control output");
                updates.push(update);
            }
        })
        .map_err(|e| ControllerError::StartFailed {
            name: self.name.clone(),
            reason: e.to_string(),
        })?;
        *worker = Some(thread);
        debug!(controller = %self.name, "control loop running");
        Ok(())
    }

    fn stop(&self) {
        let thread = lock(&self.worker).take();
        if let Some(mut thread) = thread {
            thread.stop();
            debug!(controller = %self.name, "control loop joined");
        }
    }

    fn is_enabled(&self) -> bool {
        lock(&self.worker)
            .as_ref()
            .is_some_and(ParticipantThread::is_running)
    }

    fn current_value(&self) -> f64 {
        self.ctx.state.get(self.law.output_field())
    }

    fn required_authority(&self) -> Option<Actuator> {
        self.law.required_authority()
    }
}

/// The five reference controllers under their standard action-table names.
pub fn standard_controllers(ctx: &SimContext) -> Result<ControllerSet, ConfigError> {
    let mut set = ControllerSet::new();
    for (name, law) in [
        (names::THROTTLE_INCREASE, ControlLaw::throttle_increase()),
        (names::THROTTLE_DECREASE, ControlLaw::throttle_decrease()),
        (names::BRAKE, ControlLaw::brake()),
        (names::CRUISE, ControlLaw::cruise()),
        (names::PITCH_HOLD, ControlLaw::pitch_hold()),
    ] {
        set.insert(Box::new(LoopController::new(name, law, ctx.clone())?))?;
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use runway_core::StateUpdateQueue;
    use runway_engine::{ClockConfig, SimClock, StateManager};
    use runway_test_utils::wait_until;
    use std::time::Duration;

    const DT: f64 = 0.01;

    fn ctx(max_ticks: Option<u64>) -> SimContext {
        SimContext {
            clock: Arc::new(
                SimClock::new(ClockConfig {
                    max_ticks,
                    ..ClockConfig::default()
                })
                .unwrap(),
            ),
            state: Arc::new(SharedState::new()),
            updates: Arc::new(StateUpdateQueue::new()),
        }
    }

    fn single(law: ControlLaw, state: &SharedState) -> ControlOutput {
        law.step(state, DT, &mut LawMemory::default(), 0.0)
    }

    #[test]
    fn throttle_increase_ramps_and_saturates() {
        let state = SharedState::new();
        let out = single(ControlLaw::throttle_increase(), &state);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].field, Scalar::Throttle);
        assert!((out[0].value - 0.001).abs() < 1e-12);

        state.set(Scalar::Throttle, 1.0);
        assert!(single(ControlLaw::throttle_increase(), &state).is_empty());
    }

    #[test]
    fn throttle_decrease_floors_at_zero() {
        let state = SharedState::new();
        state.set(Scalar::Throttle, 0.001);
        let out = single(ControlLaw::throttle_decrease(), &state);
        assert_eq!(out[0].value, 0.0);
    }

    #[test]
    fn brake_caps_at_max() {
        let state = SharedState::new();
        state.set(Scalar::Brake, 0.999);
        let out = single(ControlLaw::brake(), &state);
        assert_eq!(out[0].field, Scalar::Brake);
        assert_eq!(out[0].value, 1.0);
    }

    #[test]
    fn cruise_splits_throttle_and_brake() {
        let state = SharedState::new();
        state.set(Scalar::TargetSpeed, 30.0);
        state.set(Scalar::Velocity, 25.0);
        let out = single(ControlLaw::cruise(), &state);
        assert_eq!(out[0], StateUpdate::new(Scalar::Throttle, 0.5));
        assert_eq!(out[1], StateUpdate::new(Scalar::Brake, 0.0));

        state.set(Scalar::Velocity, 32.0);
        let out = single(ControlLaw::cruise(), &state);
        assert_eq!(out[0], StateUpdate::new(Scalar::Throttle, 0.0));
        assert!((out[1].value - 0.2).abs() < 1e-12);

        state.set(Scalar::Velocity, 0.0);
        let out = single(ControlLaw::cruise(), &state);
        assert_eq!(out[0].value, 1.0);
    }

    #[test]
    fn pitch_hold_saturates_and_integrates() {
        let state = SharedState::new();
        let law = ControlLaw::pitch_hold();
        let mut memory = LawMemory::default();
        let out = law.step(&state, DT, &mut memory, 0.5);
        assert_eq!(out[0], StateUpdate::new(Scalar::PitchControlOutput, 1.0));
        assert!((out[1].value - 0.1).abs() < 1e-12);
        assert!((memory.integral - 0.1 * 0.5 * DT).abs() < 1e-12);

        // Steady error: the derivative term vanishes on the second step.
        let small = 0.01;
        let mut memory = LawMemory::default();
        law.step(&state, DT, &mut memory, small);
        let out = law.step(&state, DT, &mut memory, small);
        let expected = small + 2.0 * 0.1 * small * DT;
        assert!((out[0].value - expected).abs() < 1e-9);
    }

    #[test]
    fn authority_and_flags_match_the_law() {
        assert_eq!(
            ControlLaw::throttle_decrease().required_authority(),
            Some(Actuator::Throttle)
        );
        assert_eq!(ControlLaw::cruise().required_authority(), Some(Actuator::Throttle));
        assert_eq!(ControlLaw::brake().required_authority(), Some(Actuator::Brake));
        assert_eq!(ControlLaw::pitch_hold().required_authority(), None);
        assert_eq!(
            ControlLaw::brake().enable_flag(),
            ControlFlag::BrakeControlEnabled
        );
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let c = ctx(None);
        let err = LoopController::new("x", ControlLaw::Brake { rate: -1.0, max: 1.0 }, c)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidParameter { name: "rate", .. }));
    }

    #[test]
    fn target_pitch_is_clamped() {
        let c = LoopController::new("p", ControlLaw::pitch_hold(), ctx(None)).unwrap();
        c.set_target_pitch(2.0);
        assert_eq!(c.target_pitch(), MAX_TARGET_PITCH);
    }

    #[test]
    fn loop_runs_only_while_enabled_and_joins_on_stop() {
        let c = ctx(None);
        let mut applier = StateManager::new(Arc::clone(&c.state), Arc::clone(&c.updates))
            .spawn(&c.clock)
            .unwrap();
        let ctl = LoopController::new("brake", ControlLaw::brake(), c.clone()).unwrap();
        ctl.start().unwrap();
        ctl.start().unwrap();
        assert!(ctl.is_enabled());

        let clock = Arc::clone(&c.clock);
        let coordinator = std::thread::spawn(move || clock.start());

        assert!(wait_until(Duration::from_secs(5), || c.clock.tick_count() > 20));
        assert_eq!(c.state.get(Scalar::Brake), 0.0, "flag is off");

        c.state.set_flag(ControlFlag::BrakeControlEnabled, true);
        assert!(wait_until(Duration::from_secs(5), || ctl.current_value() > 0.01));

        ctl.stop();
        assert!(!ctl.is_enabled());
        c.clock.stop();
        coordinator.join().unwrap().unwrap();
        applier.stop();
        assert!(ctl.current_value() <= 1.0);
    }

    #[test]
    fn standard_set_uses_action_table_names() {
        let set = standard_controllers(&ctx(None)).unwrap();
        let names: Vec<_> = set.iter().map(|c| c.name().to_string()).collect();
        assert_eq!(
            names,
            ["throttle_increase", "throttle_decrease", "brake", "cruise", "pitch_hold"]
        );
        assert!(set.iter().all(|c| !c.is_enabled()));
    }

    proptest! {
        #[test]
        fn actuator_outputs_stay_in_range(
            throttle in 0.0f64..=1.0,
            brake in 0.0f64..=1.0,
            velocity in -5.0f64..80.0,
            target in 0.0f64..60.0,
        ) {
            let state = SharedState::new();
            state.set(Scalar::Throttle, throttle);
            state.set(Scalar::Brake, brake);
            state.set(Scalar::Velocity, velocity);
            state.set(Scalar::TargetSpeed, target);
            for law in [
                ControlLaw::throttle_increase(),
                ControlLaw::throttle_decrease(),
                ControlLaw::brake(),
                ControlLaw::cruise(),
            ] {
                for update in single(law, &state) {
                    prop_assert!((0.0..=1.0).contains(&update.value), "{law:?} -> {update:?}");
                }
            }
        }
    }
}
