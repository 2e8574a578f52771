//! Controller actions and the action table that resolves them.
//!
//! A [`ControllerAction`] is the abstract verb an event asks for. The
//! [`ActionTable`] resolves each one, at load time, into a typed
//! [`ResolvedAction`]: start or stop a named controller after applying
//! state settings, stop every controller, or switch flight mode.
//!
//! The text form is one action per line:
//!
//! ```text
//! # comment
//! START_BRAKE = brake, cruise_control_enabled=false; brake_control_enabled=true
//! STOP_ALL_CONTROLLERS = STOP_ALL
//! SWITCH_TO_AUTO_MODE = MODE, flight_mode=AUTO
//! ```
//!
//! Lines that cannot be resolved are skipped and reported as
//! [`ActionConfigError`] diagnostics.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use runway_core::state::ParseNameError;
use runway_core::{ControlFlag, FlightMode, Scalar, SharedState};
use smallvec::SmallVec;
use tracing::{debug, info, warn};

// ── ControllerAction ─────────────────────────────────────────────

/// Abstract actions an event can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ControllerAction {
    StartThrottleIncrease,
    StopThrottleIncrease,
    StartThrottleDecrease,
    StopThrottleDecrease,
    StartBrake,
    StopBrake,
    StartCruise,
    StopCruise,
    StartPitchControl,
    StopPitchControl,
    SetPitchAngle,
    StopAllControllers,
    SwitchToAutoMode,
    SwitchToManualMode,
    SwitchToSemiAutoMode,
}

/// What a controller action does to its controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControllerOp {
    /// Start the controller after applying settings.
    Start,
    /// Stop the controller after applying settings.
    Stop,
    /// Apply settings only.
    Configure,
}

impl ControllerAction {
    /// Number of actions.
    pub const COUNT: usize = 15;

    /// Every action, in declaration order.
    pub const ALL: [ControllerAction; Self::COUNT] = [
        Self::StartThrottleIncrease,
        Self::StopThrottleIncrease,
        Self::StartThrottleDecrease,
        Self::StopThrottleDecrease,
        Self::StartBrake,
        Self::StopBrake,
        Self::StartCruise,
        Self::StopCruise,
        Self::StartPitchControl,
        Self::StopPitchControl,
        Self::SetPitchAngle,
        Self::StopAllControllers,
        Self::SwitchToAutoMode,
        Self::SwitchToManualMode,
        Self::SwitchToSemiAutoMode,
    ];

    /// The upper-case name used in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Self::StartThrottleIncrease => "START_THROTTLE_INCREASE",
            Self::StopThrottleIncrease => "STOP_THROTTLE_INCREASE",
            Self::StartThrottleDecrease => "START_THROTTLE_DECREASE",
            Self::StopThrottleDecrease => "STOP_THROTTLE_DECREASE",
            Self::StartBrake => "START_BRAKE",
            Self::StopBrake => "STOP_BRAKE",
            Self::StartCruise => "START_CRUISE",
            Self::StopCruise => "STOP_CRUISE",
            Self::StartPitchControl => "START_PITCH_CONTROL",
            Self::StopPitchControl => "STOP_PITCH_CONTROL",
            Self::SetPitchAngle => "SET_PITCH_ANGLE",
            Self::StopAllControllers => "STOP_ALL_CONTROLLERS",
            Self::SwitchToAutoMode => "SWITCH_TO_AUTO_MODE",
            Self::SwitchToManualMode => "SWITCH_TO_MANUAL_MODE",
            Self::SwitchToSemiAutoMode => "SWITCH_TO_SEMI_AUTO_MODE",
        }
    }

    /// Whether this action starts, stops or only configures its controller.
    pub fn op(self) -> ControllerOp {
        let name = self.name();
        if name.starts_with("START_") {
            ControllerOp::Start
        } else if name.starts_with("STOP_") {
            ControllerOp::Stop
        } else {
            ControllerOp::Configure
        }
    }
}

impl fmt::Display for ControllerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ControllerAction {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| ParseNameError {
                kind: "action",
                name: s.to_string(),
            })
    }
}

// ── ResolvedAction ───────────────────────────────────────────────

/// One state write applied before a controller operation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Setting {
    /// Set a flag.
    Flag(ControlFlag, bool),
    /// Set a scalar field.
    Scalar(Scalar, f64),
}

impl Setting {
    /// Write this setting into `state`.
    pub fn apply(&self, state: &SharedState) {
        match *self {
            Setting::Flag(flag, value) => state.set_flag(flag, value),
            Setting::Scalar(field, value) => state.set(field, value),
        }
    }
}

/// Settings list; the standard table never needs more than two.
pub type Settings = SmallVec<[Setting; 2]>;

/// A fully resolved action.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedAction {
    /// Apply `settings`, then perform `op` on `controller`.
    Controller {
        /// Target controller name.
        controller: String,
        /// State writes applied first, in order.
        settings: Settings,
        /// Start, stop or configure only.
        op: ControllerOp,
    },
    /// Stop every managed controller.
    StopAll,
    /// Switch flight mode.
    Mode(FlightMode),
}

impl ResolvedAction {
    fn controller(name: &str, op: ControllerOp, settings: &[Setting]) -> Self {
        ResolvedAction::Controller {
            controller: name.to_string(),
            settings: settings.iter().copied().collect(),
            op,
        }
    }
}

// ── Diagnostics ──────────────────────────────────────────────────

/// A problem found while loading an action configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ActionConfigError {
    /// The line has no `=` or no controller name.
    #[error("line {line}: malformed action line '{text}'")]
    Malformed {
        /// 1-based line number.
        line: usize,
        /// The offending line.
        text: String,
    },
    /// The action name is not a known [`ControllerAction`].
    #[error("line {line}: unknown action '{name}'")]
    UnknownAction {
        /// 1-based line number.
        line: usize,
        /// The rejected name.
        name: String,
    },
    /// A setting names neither a flag nor a scalar field.
    #[error("line {line}: unknown state variable '{variable}'")]
    UnknownVariable {
        /// 1-based line number.
        line: usize,
        /// The rejected variable.
        variable: String,
    },
    /// A setting value does not parse for its variable.
    #[error("line {line}: invalid value '{value}' for '{variable}'")]
    InvalidValue {
        /// 1-based line number.
        line: usize,
        /// The variable.
        variable: String,
        /// The rejected value.
        value: String,
    },
    /// A `MODE` line without a valid `flight_mode` setting.
    #[error("line {line}: MODE action '{action}' needs flight_mode=AUTO|MANUAL|SEMI_AUTO")]
    MissingFlightMode {
        /// 1-based line number.
        line: usize,
        /// The action being configured.
        action: String,
    },
    /// The configuration file could not be read.
    #[error("cannot read action configuration '{path}': {reason}")]
    Unreadable {
        /// File path.
        path: String,
        /// I/O error description.
        reason: String,
    },
}

/// Controller names used by [`ActionTable::standard`].
pub mod names {
    /// Throttle ramp-up controller.
    pub const THROTTLE_INCREASE: &str = "throttle_increase";
    /// Throttle ramp-down controller.
    pub const THROTTLE_DECREASE: &str = "throttle_decrease";
    /// Brake ramp controller.
    pub const BRAKE: &str = "brake";
    /// Runway cruise controller.
    pub const CRUISE: &str = "cruise";
    /// Pitch-hold controller.
    pub const PITCH_HOLD: &str = "pitch_hold";
}

// ── ActionTable ──────────────────────────────────────────────────

/// Read-only mapping from [`ControllerAction`] to [`ResolvedAction`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionTable {
    entries: IndexMap<ControllerAction, ResolvedAction>,
}

impl ActionTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The default mapping used when no configuration file is present.
    pub fn standard() -> Self {
        use ControlFlag::*;
        use ControllerAction as A;
        use ControllerOp::*;

        let mut t = Self::new();
        let mut ctl = |action, name: &str, op, settings: &[Setting]| {
            t.insert(action, ResolvedAction::controller(name, op, settings));
        };
        ctl(A::StartThrottleIncrease, names::THROTTLE_INCREASE, Start, &[Setting::Flag(ThrottleControlEnabled, true)]);
        ctl(A::StopThrottleIncrease, names::THROTTLE_INCREASE, Stop, &[Setting::Flag(ThrottleControlEnabled, false)]);
        ctl(A::StartThrottleDecrease, names::THROTTLE_DECREASE, Start, &[Setting::Flag(ThrottleControlEnabled, true)]);
        ctl(A::StopThrottleDecrease, names::THROTTLE_DECREASE, Stop, &[Setting::Flag(ThrottleControlEnabled, false)]);
        ctl(
            A::StartBrake,
            names::BRAKE,
            Start,
            &[
                Setting::Flag(CruiseControlEnabled, false),
                Setting::Flag(BrakeControlEnabled, true),
            ],
        );
        ctl(A::StopBrake, names::BRAKE, Stop, &[Setting::Flag(BrakeControlEnabled, false)]);
        ctl(A::StartCruise, names::CRUISE, Start, &[Setting::Flag(CruiseControlEnabled, true)]);
        ctl(A::StopCruise, names::CRUISE, Stop, &[Setting::Flag(CruiseControlEnabled, false)]);
        ctl(A::StartPitchControl, names::PITCH_HOLD, Start, &[Setting::Flag(PitchControlEnabled, true)]);
        ctl(A::StopPitchControl, names::PITCH_HOLD, Stop, &[Setting::Flag(PitchControlEnabled, false)]);
        ctl(A::SetPitchAngle, names::PITCH_HOLD, Configure, &[]);
        t.insert(A::StopAllControllers, ResolvedAction::StopAll);
        t.insert(A::SwitchToAutoMode, ResolvedAction::Mode(FlightMode::Auto));
        t.insert(A::SwitchToManualMode, ResolvedAction::Mode(FlightMode::Manual));
        t.insert(A::SwitchToSemiAutoMode, ResolvedAction::Mode(FlightMode::SemiAuto));
        t
    }

    /// Parse the line-oriented text form.
    ///
    /// Returns the table built from every valid line together with one
    /// diagnostic per skipped line. A later line for the same action
    /// replaces an earlier one.
    pub fn parse(text: &str) -> (Self, Vec<ActionConfigError>) {
        let mut table = Self::new();
        let mut diagnostics = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_line(idx + 1, line) {
                Ok((action, resolved)) => {
                    debug!(%action, "action configured");
                    table.insert(action, resolved);
                }
                Err(err) => diagnostics.push(err),
            }
        }
        (table, diagnostics)
    }

    /// Load a configuration file, falling back to [`standard`](Self::standard)
    /// when it cannot be read. Diagnostics are logged and returned.
    pub fn load(path: impl AsRef<Path>) -> (Self, Vec<ActionConfigError>) {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                let (table, diagnostics) = Self::parse(&text);
                for d in &diagnostics {
                    warn!(error = %d, "action configuration line skipped");
                }
                info!(
                    path = %path.display(),
                    actions = table.len(),
                    skipped = diagnostics.len(),
                    "action configuration loaded"
                );
                (table, diagnostics)
            }
            Err(e) => {
                let err = ActionConfigError::Unreadable {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "using the standard action table");
                (Self::standard(), vec![err])
            }
        }
    }

    /// Add or replace an entry.
    pub fn insert(&mut self, action: ControllerAction, resolved: ResolvedAction) {
        self.entries.insert(action, resolved);
    }

    /// Remove an entry.
    pub fn remove(&mut self, action: ControllerAction) -> Option<ResolvedAction> {
        self.entries.shift_remove(&action)
    }

    /// Resolve one action.
    pub fn get(&self, action: ControllerAction) -> Option<&ResolvedAction> {
        self.entries.get(&action)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (ControllerAction, &ResolvedAction)> {
        self.entries.iter().map(|(a, r)| (*a, r))
    }

    /// Number of configured actions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is configured.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line: usize, text: &str) -> Result<(ControllerAction, ResolvedAction), ActionConfigError> {
    let malformed = || ActionConfigError::Malformed {
        line,
        text: text.to_string(),
    };
    let (name, rhs) = text.split_once('=').ok_or_else(malformed)?;
    let name = name.trim();
    let action: ControllerAction = name.parse().map_err(|_| ActionConfigError::UnknownAction {
        line,
        name: name.to_string(),
    })?;

    let (controller, settings_text) = match rhs.split_once(',') {
        Some((c, s)) => (c.trim(), s),
        None => (rhs.trim(), ""),
    };
    if controller.is_empty() {
        return Err(malformed());
    }

    let mut pairs = Vec::new();
    for part in settings_text.split(';') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (var, value) = part.split_once('=').ok_or_else(malformed)?;
        pairs.push((var.trim(), value.trim()));
    }

    let resolved = match controller {
        "STOP_ALL" => ResolvedAction::StopAll,
        "MODE" => {
            let mode = pairs
                .iter()
                .find(|(var, _)| *var == "flight_mode")
                .and_then(|(_, value)| value.parse::<FlightMode>().ok())
                .ok_or_else(|| ActionConfigError::MissingFlightMode {
                    line,
                    action: action.to_string(),
                })?;
            ResolvedAction::Mode(mode)
        }
        _ => {
            let settings = pairs
                .iter()
                .map(|(var, value)| parse_setting(line, var, value))
                .collect::<Result<Settings, _>>()?;
            ResolvedAction::Controller {
                controller: controller.to_string(),
                settings,
                op: action.op(),
            }
        }
    };
    Ok((action, resolved))
}

fn parse_setting(line: usize, var: &str, value: &str) -> Result<Setting, ActionConfigError> {
    let invalid = || ActionConfigError::InvalidValue {
        line,
        variable: var.to_string(),
        value: value.to_string(),
    };
    if let Ok(flag) = var.parse::<ControlFlag>() {
        let on = match value {
            "true" | "1" => true,
            "false" | "0" => false,
            _ => return Err(invalid()),
        };
        return Ok(Setting::Flag(flag, on));
    }
    if let Ok(field) = var.parse::<Scalar>() {
        let v: f64 = value.parse().map_err(|_| invalid())?;
        if !v.is_finite() {
            return Err(invalid());
        }
        return Ok(Setting::Scalar(field, v));
    }
    Err(ActionConfigError::UnknownVariable {
        line,
        variable: var.to_string(),
    })
}
