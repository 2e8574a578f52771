//! The shared state store.
//!
//! [`SharedState`] holds simulation-wide state as independently atomic
//! scalar fields and boolean flags, plus a lock-protected composite
//! [`StateSnapshot`] with a monotonically increasing version. Reading two
//! atomic fields one after the other gives no joint consistency guarantee;
//! a consistent view of several fields is only available through
//! [`SharedState::get_snapshot`].
//!
//! Flight mode and the four control-authority bits are packed into a single
//! atomic byte, so [`SharedState::set_flight_mode`] replaces both in one
//! store and an observer can never see the old mode with the new authority.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::sync::lock;

// ── AtomicF64 ────────────────────────────────────────────────────

/// An `f64` stored as its bit pattern in an [`AtomicU64`].
///
/// Loads use `Acquire` and stores use `Release`.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    /// Create a new cell holding `value`.
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Read the current value.
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Replace the current value.
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

// ── Field names ──────────────────────────────────────────────────

/// A state variable or mode name that did not match any known entry.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{name}'")]
pub struct ParseNameError {
    /// What was being parsed ("scalar", "flag", "flight mode").
    pub kind: &'static str,
    /// The rejected input.
    pub name: String,
}

/// Scalar fields of the shared state store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scalar {
    /// Distance travelled along the runway, metres.
    Position,
    /// Ground speed, m/s.
    Velocity,
    /// Longitudinal acceleration, m/s².
    Acceleration,
    /// Throttle setting, 0..=1.
    Throttle,
    /// Brake setting, 0..=1.
    Brake,
    /// Engine thrust, newtons.
    Thrust,
    /// Aerodynamic drag, newtons.
    DragForce,
    /// Wheel-brake force, newtons.
    BrakeForce,
    /// Simulation time as last written by the model, seconds.
    SimulationTime,
    /// Cruise target speed, m/s.
    TargetSpeed,
    /// Pitch angle, radians.
    PitchAngle,
    /// Pitch rate, rad/s.
    PitchRate,
    /// Output of the pitch-hold loop.
    PitchControlOutput,
}

impl Scalar {
    /// Number of scalar fields.
    pub const COUNT: usize = 13;

    /// Every scalar field, in declaration order.
    pub const ALL: [Scalar; Self::COUNT] = [
        Scalar::Position,
        Scalar::Velocity,
        Scalar::Acceleration,
        Scalar::Throttle,
        Scalar::Brake,
        Scalar::Thrust,
        Scalar::DragForce,
        Scalar::BrakeForce,
        Scalar::SimulationTime,
        Scalar::TargetSpeed,
        Scalar::PitchAngle,
        Scalar::PitchRate,
        Scalar::PitchControlOutput,
    ];

    /// The snake_case name used in configuration files and logs.
    pub fn name(self) -> &'static str {
        match self {
            Scalar::Position => "position",
            Scalar::Velocity => "velocity",
            Scalar::Acceleration => "acceleration",
            Scalar::Throttle => "throttle",
            Scalar::Brake => "brake",
            Scalar::Thrust => "thrust",
            Scalar::DragForce => "drag_force",
            Scalar::BrakeForce => "brake_force",
            Scalar::SimulationTime => "simulation_time",
            Scalar::TargetSpeed => "target_speed",
            Scalar::PitchAngle => "pitch_angle",
            Scalar::PitchRate => "pitch_rate",
            Scalar::PitchControlOutput => "pitch_control_output",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scalar {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| ParseNameError {
                kind: "scalar",
                name: s.to_string(),
            })
    }
}

/// Boolean flags of the shared state store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlFlag {
    /// The throttle loops may act.
    ThrottleControlEnabled,
    /// The brake loop may act.
    BrakeControlEnabled,
    /// The cruise loop may act.
    CruiseControlEnabled,
    /// The pitch-hold loop may act.
    PitchControlEnabled,
    /// The run is in progress.
    SimulationRunning,
    /// The run has been started at least once.
    SimulationStarted,
    /// The final-stop phase has been entered.
    FinalStopEnabled,
    /// An abort has been requested.
    AbortTriggered,
}

impl ControlFlag {
    /// Number of flags.
    pub const COUNT: usize = 8;

    /// Every flag, in declaration order.
    pub const ALL: [ControlFlag; Self::COUNT] = [
        ControlFlag::ThrottleControlEnabled,
        ControlFlag::BrakeControlEnabled,
        ControlFlag::CruiseControlEnabled,
        ControlFlag::PitchControlEnabled,
        ControlFlag::SimulationRunning,
        ControlFlag::SimulationStarted,
        ControlFlag::FinalStopEnabled,
        ControlFlag::AbortTriggered,
    ];

    /// The snake_case name used in configuration files and logs.
    pub fn name(self) -> &'static str {
        match self {
            ControlFlag::ThrottleControlEnabled => "throttle_control_enabled",
            ControlFlag::BrakeControlEnabled => "brake_control_enabled",
            ControlFlag::CruiseControlEnabled => "cruise_control_enabled",
            ControlFlag::PitchControlEnabled => "pitch_control_enabled",
            ControlFlag::SimulationRunning => "simulation_running",
            ControlFlag::SimulationStarted => "simulation_started",
            ControlFlag::FinalStopEnabled => "final_stop_enabled",
            ControlFlag::AbortTriggered => "abort_triggered",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ControlFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControlFlag {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.name() == s)
            .ok_or_else(|| ParseNameError {
                kind: "flag",
                name: s.to_string(),
            })
    }
}

// ── Flight mode and authority ────────────────────────────────────

/// Coarse operating mode that determines the default control authority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FlightMode {
    /// The pilot drives both actuators.
    #[default]
    Manual,
    /// The automatic system drives both actuators.
    Auto,
    /// Pilot and automatic system share both actuators.
    SemiAuto,
}

impl FlightMode {
    /// The authority configuration this mode implies.
    pub fn authority(self) -> ControlAuthority {
        match self {
            FlightMode::Manual => ControlAuthority {
                pilot_throttle: true,
                pilot_brake: true,
                auto_throttle: false,
                auto_brake: false,
            },
            FlightMode::Auto => ControlAuthority {
                pilot_throttle: false,
                pilot_brake: false,
                auto_throttle: true,
                auto_brake: true,
            },
            FlightMode::SemiAuto => ControlAuthority {
                pilot_throttle: true,
                pilot_brake: true,
                auto_throttle: true,
                auto_brake: true,
            },
        }
    }

    /// The upper-case name used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            FlightMode::Manual => "MANUAL",
            FlightMode::Auto => "AUTO",
            FlightMode::SemiAuto => "SEMI_AUTO",
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & MODE_MASK {
            1 => FlightMode::Auto,
            2 => FlightMode::SemiAuto,
            _ => FlightMode::Manual,
        }
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FlightMode {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(FlightMode::Manual),
            "AUTO" => Ok(FlightMode::Auto),
            "SEMI_AUTO" => Ok(FlightMode::SemiAuto),
            other => Err(ParseNameError {
                kind: "flight mode",
                name: other.to_string(),
            }),
        }
    }
}

/// An actuator that is subject to control authority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Actuator {
    /// Engine throttle.
    Throttle,
    /// Wheel brakes.
    Brake,
}

/// Which actor may drive each actuator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ControlAuthority {
    /// The pilot may drive the throttle.
    pub pilot_throttle: bool,
    /// The pilot may drive the brakes.
    pub pilot_brake: bool,
    /// The automatic system may drive the throttle.
    pub auto_throttle: bool,
    /// The automatic system may drive the brakes.
    pub auto_brake: bool,
}

impl ControlAuthority {
    /// Returns `true` if the automatic system holds `actuator`.
    pub fn auto_holds(&self, actuator: Actuator) -> bool {
        match actuator {
            Actuator::Throttle => self.auto_throttle,
            Actuator::Brake => self.auto_brake,
        }
    }

    /// Returns `true` if the pilot holds `actuator`.
    pub fn pilot_holds(&self, actuator: Actuator) -> bool {
        match actuator {
            Actuator::Throttle => self.pilot_throttle,
            Actuator::Brake => self.pilot_brake,
        }
    }

    /// Returns `true` if pilot and automatic system share any actuator.
    pub fn has_conflict(&self) -> bool {
        (self.pilot_throttle && self.auto_throttle) || (self.pilot_brake && self.auto_brake)
    }

    fn to_bits(self) -> u8 {
        (self.pilot_throttle as u8) << 2
            | (self.pilot_brake as u8) << 3
            | (self.auto_throttle as u8) << 4
            | (self.auto_brake as u8) << 5
    }

    fn from_bits(bits: u8) -> Self {
        Self {
            pilot_throttle: bits & (1 << 2) != 0,
            pilot_brake: bits & (1 << 3) != 0,
            auto_throttle: bits & (1 << 4) != 0,
            auto_brake: bits & (1 << 5) != 0,
        }
    }
}

impl Default for ControlAuthority {
    fn default() -> Self {
        FlightMode::Manual.authority()
    }
}

const MODE_MASK: u8 = 0b11;

fn pack_mode(mode: FlightMode, authority: ControlAuthority) -> u8 {
    (mode as u8) | authority.to_bits()
}

// ── StateSnapshot ────────────────────────────────────────────────

/// A consistent composite view of the state store.
#[derive(Clone, Debug, PartialEq)]
pub struct StateSnapshot {
    scalars: [f64; Scalar::COUNT],
    flags: [bool; ControlFlag::COUNT],
    /// Flight mode at capture time.
    pub flight_mode: FlightMode,
    /// Control authority at capture time.
    pub authority: ControlAuthority,
    /// Store version this snapshot was published as.
    pub version: u64,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            scalars: [0.0; Scalar::COUNT],
            flags: [false; ControlFlag::COUNT],
            flight_mode: FlightMode::Manual,
            authority: ControlAuthority::default(),
            version: 0,
        }
    }
}

impl StateSnapshot {
    /// Value of a scalar field.
    pub fn get(&self, field: Scalar) -> f64 {
        self.scalars[field.index()]
    }

    /// Set a scalar field.
    pub fn set(&mut self, field: Scalar, value: f64) {
        self.scalars[field.index()] = value;
    }

    /// Value of a flag.
    pub fn flag(&self, flag: ControlFlag) -> bool {
        self.flags[flag.index()]
    }

    /// Set a flag.
    pub fn set_flag(&mut self, flag: ControlFlag, value: bool) {
        self.flags[flag.index()] = value;
    }
}

// ── Latch ────────────────────────────────────────────────────────

/// One-shot rendezvous: waiters block until the latch is set.
#[derive(Debug, Default)]
struct Latch {
    set: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    fn set(&self) {
        *lock(&self.set) = true;
        self.cv.notify_all();
    }

    fn reset(&self) {
        *lock(&self.set) = false;
    }

    fn wait(&self, timeout: Duration) -> bool {
        let guard = lock(&self.set);
        let (guard, _) = self
            .cv
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

// ── SharedState ──────────────────────────────────────────────────

/// Simulation-wide state shared by every participant.
///
/// Scalars and flags are lock-free atomics. The composite snapshot has its
/// own mutex and a version counter that advances on every update, and a
/// condition variable so consumers can wait for a new version instead of
/// polling.
#[derive(Debug)]
pub struct SharedState {
    scalars: [AtomicF64; Scalar::COUNT],
    flags: [AtomicBool; ControlFlag::COUNT],
    mode: AtomicU8,
    snapshot: Mutex<StateSnapshot>,
    snapshot_changed: Condvar,
    started: Latch,
    final_stop: Latch,
}

// Compile-time assertion: SharedState must be Send + Sync.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SharedState>();
};

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    /// A zeroed store in [`FlightMode::Manual`].
    pub fn new() -> Self {
        let mode = FlightMode::Manual;
        Self {
            scalars: std::array::from_fn(|_| AtomicF64::default()),
            flags: std::array::from_fn(|_| AtomicBool::new(false)),
            mode: AtomicU8::new(pack_mode(mode, mode.authority())),
            snapshot: Mutex::new(StateSnapshot::default()),
            snapshot_changed: Condvar::new(),
            started: Latch::default(),
            final_stop: Latch::default(),
        }
    }

    /// Read a scalar field.
    pub fn get(&self, field: Scalar) -> f64 {
        self.scalars[field.index()].load()
    }

    /// Write a scalar field.
    pub fn set(&self, field: Scalar, value: f64) {
        self.scalars[field.index()].store(value);
    }

    /// Read a flag.
    pub fn flag(&self, flag: ControlFlag) -> bool {
        self.flags[flag.index()].load(Ordering::Acquire)
    }

    /// Write a flag.
    pub fn set_flag(&self, flag: ControlFlag, value: bool) {
        self.flags[flag.index()].store(value, Ordering::Release);
    }

    /// Shorthand for `get(Scalar::Position)`.
    pub fn position(&self) -> f64 {
        self.get(Scalar::Position)
    }

    /// Shorthand for `get(Scalar::Velocity)`.
    pub fn velocity(&self) -> f64 {
        self.get(Scalar::Velocity)
    }

    /// Shorthand for `get(Scalar::SimulationTime)`.
    pub fn simulation_time(&self) -> f64 {
        self.get(Scalar::SimulationTime)
    }

    // ── Mode and authority ──

    /// Switch flight mode and install the authority it implies, as one
    /// atomic store.
    pub fn set_flight_mode(&self, mode: FlightMode) {
        let old = self
            .mode
            .swap(pack_mode(mode, mode.authority()), Ordering::AcqRel);
        let old = FlightMode::from_bits(old);
        if old != mode {
            tracing::info!(from = %old, to = %mode, "flight mode switched");
        }
    }

    /// Override the authority bits while keeping the current mode.
    pub fn set_authority(&self, authority: ControlAuthority) {
        let _ = self
            .mode
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some(pack_mode(FlightMode::from_bits(word), authority))
            });
    }

    /// Current flight mode.
    pub fn flight_mode(&self) -> FlightMode {
        FlightMode::from_bits(self.mode.load(Ordering::Acquire))
    }

    /// Current control authority, read in the same load as the mode.
    pub fn authority(&self) -> ControlAuthority {
        ControlAuthority::from_bits(self.mode.load(Ordering::Acquire))
    }

    /// Mode and authority from a single load.
    pub fn mode_and_authority(&self) -> (FlightMode, ControlAuthority) {
        let word = self.mode.load(Ordering::Acquire);
        (FlightMode::from_bits(word), ControlAuthority::from_bits(word))
    }

    /// Returns `true` if pilot and automatic system share an actuator.
    pub fn has_control_conflict(&self) -> bool {
        self.authority().has_conflict()
    }

    // ── Snapshot ──

    /// A copy of the most recently published composite snapshot.
    pub fn get_snapshot(&self) -> StateSnapshot {
        lock(&self.snapshot).clone()
    }

    /// Replace the composite snapshot and advance the version.
    ///
    /// Returns the new version. Wakes every thread blocked in
    /// [`wait_for_update`](Self::wait_for_update).
    pub fn update_snapshot(&self, mut snapshot: StateSnapshot) -> u64 {
        let version = {
            let mut slot = lock(&self.snapshot);
            snapshot.version = slot.version + 1;
            *slot = snapshot;
            slot.version
        };
        self.snapshot_changed.notify_all();
        version
    }

    /// Capture every atomic field into a new snapshot and publish it.
    ///
    /// Individual fields are read one at a time, so the capture is only
    /// as consistent as the writers are quiescent. The state manager calls
    /// this once per tick after draining the update queue.
    pub fn publish_snapshot(&self) -> u64 {
        let (flight_mode, authority) = self.mode_and_authority();
        let mut snapshot = StateSnapshot {
            flight_mode,
            authority,
            ..StateSnapshot::default()
        };
        for field in Scalar::ALL {
            snapshot.set(field, self.get(field));
        }
        for flag in ControlFlag::ALL {
            snapshot.set_flag(flag, self.flag(flag));
        }
        self.update_snapshot(snapshot)
    }

    /// Current snapshot version.
    pub fn version(&self) -> u64 {
        lock(&self.snapshot).version
    }

    /// Block until the snapshot version exceeds `since` or `timeout`
    /// elapses. Returns `true` if a newer version is available.
    pub fn wait_for_update(&self, since: u64, timeout: Duration) -> bool {
        let guard = lock(&self.snapshot);
        let (guard, _) = self
            .snapshot_changed
            .wait_timeout_while(guard, timeout, |snap| snap.version <= since)
            .unwrap_or_else(PoisonError::into_inner);
        guard.version > since
    }

    // ── Run rendezvous ──

    /// Mark the run as started and release [`wait_for_start`](Self::wait_for_start).
    pub fn notify_start(&self) {
        self.set_flag(ControlFlag::SimulationStarted, true);
        self.set_flag(ControlFlag::SimulationRunning, true);
        self.started.set();
    }

    /// Block until the run has been started or `timeout` elapses.
    pub fn wait_for_start(&self, timeout: Duration) -> bool {
        self.started.wait(timeout)
    }

    /// Mark the final stop and release [`wait_for_final_stop`](Self::wait_for_final_stop).
    pub fn notify_final_stop(&self) {
        self.set_flag(ControlFlag::FinalStopEnabled, true);
        self.final_stop.set();
    }

    /// Block until the final stop has been signalled or `timeout` elapses.
    pub fn wait_for_final_stop(&self, timeout: Duration) -> bool {
        self.final_stop.wait(timeout)
    }

    /// Zero the motion state and clear the controller enable flags.
    ///
    /// Run flags, mode and the snapshot version are left alone.
    pub fn reset_motion(&self) {
        for field in Scalar::ALL {
            if field != Scalar::TargetSpeed {
                self.set(field, 0.0);
            }
        }
        for flag in [
            ControlFlag::ThrottleControlEnabled,
            ControlFlag::BrakeControlEnabled,
            ControlFlag::CruiseControlEnabled,
            ControlFlag::PitchControlEnabled,
            ControlFlag::FinalStopEnabled,
        ] {
            self.set_flag(flag, false);
        }
        self.final_stop.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn names_round_trip_through_from_str() {
        for field in Scalar::ALL {
            assert_eq!(field.name().parse::<Scalar>(), Ok(field));
        }
        for flag in ControlFlag::ALL {
            assert_eq!(flag.name().parse::<ControlFlag>(), Ok(flag));
        }
        assert!("altitude".parse::<Scalar>().is_err());
        assert_eq!("SEMI_AUTO".parse::<FlightMode>(), Ok(FlightMode::SemiAuto));
        assert!("auto".parse::<FlightMode>().is_err());
    }

    #[test]
    fn default_mode_is_manual_with_pilot_authority() {
        let state = SharedState::new();
        assert_eq!(state.flight_mode(), FlightMode::Manual);
        let auth = state.authority();
        assert!(auth.pilot_throttle && auth.pilot_brake);
        assert!(!auth.auto_throttle && !auth.auto_brake);
        assert!(!state.has_control_conflict());
    }

    #[test]
    fn set_flight_mode_auto_reads_back_consistent() {
        let state = SharedState::new();
        state.set_flight_mode(FlightMode::Auto);
        let (mode, auth) = state.mode_and_authority();
        assert_eq!(mode, FlightMode::Auto);
        assert_eq!(
            auth,
            ControlAuthority {
                pilot_throttle: false,
                pilot_brake: false,
                auto_throttle: true,
                auto_brake: true,
            }
        );
    }

    #[test]
    fn semi_auto_is_a_conflict() {
        let state = SharedState::new();
        state.set_flight_mode(FlightMode::SemiAuto);
        assert!(state.has_control_conflict());
        state.set_flight_mode(FlightMode::Manual);
        assert!(!state.has_control_conflict());
    }

    #[test]
    fn set_authority_keeps_mode() {
        let state = SharedState::new();
        state.set_flight_mode(FlightMode::Auto);
        let mut auth = state.authority();
        auth.auto_brake = false;
        state.set_authority(auth);
        assert_eq!(state.flight_mode(), FlightMode::Auto);
        assert!(!state.authority().auto_holds(Actuator::Brake));
        assert!(state.authority().auto_holds(Actuator::Throttle));
    }

    #[test]
    fn observers_never_see_mixed_mode_and_authority() {
        let state = Arc::new(SharedState::new());
        let writer = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for i in 0..20_000 {
                    let mode = match i % 3 {
                        0 => FlightMode::Auto,
                        1 => FlightMode::Manual,
                        _ => FlightMode::SemiAuto,
                    };
                    state.set_flight_mode(mode);
                }
            })
        };
        for _ in 0..20_000 {
            let (mode, auth) = state.mode_and_authority();
            assert_eq!(auth, mode.authority());
        }
        writer.join().unwrap();
    }

    #[test]
    fn update_snapshot_bumps_version() {
        let state = SharedState::new();
        assert_eq!(state.version(), 0);
        let mut snap = state.get_snapshot();
        snap.set(Scalar::Velocity, 12.5);
        assert_eq!(state.update_snapshot(snap), 1);
        let read = state.get_snapshot();
        assert_eq!(read.version, 1);
        assert_eq!(read.get(Scalar::Velocity), 12.5);
    }

    #[test]
    fn publish_snapshot_captures_atomics() {
        let state = SharedState::new();
        state.set(Scalar::Position, 42.0);
        state.set_flag(ControlFlag::BrakeControlEnabled, true);
        state.set_flight_mode(FlightMode::Auto);
        let v = state.publish_snapshot();
        let snap = state.get_snapshot();
        assert_eq!(snap.version, v);
        assert_eq!(snap.get(Scalar::Position), 42.0);
        assert!(snap.flag(ControlFlag::BrakeControlEnabled));
        assert_eq!(snap.flight_mode, FlightMode::Auto);
    }

    #[test]
    fn wait_for_update_times_out_without_publish() {
        let state = SharedState::new();
        assert!(!state.wait_for_update(0, Duration::from_millis(20)));
    }

    #[test]
    fn wait_for_update_wakes_on_publish() {
        let state = Arc::new(SharedState::new());
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_for_update(0, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(10));
        state.publish_snapshot();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn start_latch_releases_waiters() {
        let state = Arc::new(SharedState::new());
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait_for_start(Duration::from_secs(5)))
        };
        state.notify_start();
        assert!(waiter.join().unwrap());
        assert!(state.flag(ControlFlag::SimulationStarted));
        assert!(state.flag(ControlFlag::SimulationRunning));
    }

    #[test]
    fn reset_motion_keeps_target_speed() {
        let state = SharedState::new();
        state.set(Scalar::TargetSpeed, 30.0);
        state.set(Scalar::Velocity, 10.0);
        state.set_flag(ControlFlag::CruiseControlEnabled, true);
        state.notify_final_stop();
        state.reset_motion();
        assert_eq!(state.velocity(), 0.0);
        assert_eq!(state.get(Scalar::TargetSpeed), 30.0);
        assert!(!state.flag(ControlFlag::CruiseControlEnabled));
        assert!(!state.wait_for_final_stop(Duration::from_millis(1)));
    }
}
