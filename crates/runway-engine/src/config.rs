//! Kernel configuration: clock, event bus and recorder settings.
//!
//! Every struct has a `Default` that reproduces the reference taxi run and a
//! `validate()` that rejects values the kernel cannot run with.

use std::time::Duration;

// ── Error ────────────────────────────────────────────────────────

/// Errors detected while validating configuration or bringing up threads.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The time step is NaN, infinite, zero or negative.
    #[error("invalid time step {value}: must be finite and positive")]
    InvalidDt {
        /// The rejected value.
        value: f64,
    },
    /// Event bus capacity is zero.
    #[error("event bus capacity must be at least 1")]
    BusCapacityZero,
    /// Event bus has no workers.
    #[error("event bus needs at least one worker")]
    BusWorkersZero,
    /// Recorder interval is NaN, infinite, zero or negative.
    #[error("invalid recorder interval {value}: must be finite and positive")]
    InvalidRecordInterval {
        /// The rejected value.
        value: f64,
    },
    /// Two events in one table share a name.
    #[error("duplicate event '{name}'")]
    DuplicateEvent {
        /// The repeated name.
        name: String,
    },
    /// Two controllers in one set share a name.
    #[error("duplicate controller '{name}'")]
    DuplicateController {
        /// The repeated name.
        name: String,
    },
    /// A controller, model or scenario parameter is out of range.
    #[error("invalid parameter {name} = {value}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },
    /// A background thread could not be spawned.
    #[error("failed to spawn thread '{thread}': {reason}")]
    ThreadSpawnFailed {
        /// Name of the thread.
        thread: String,
        /// OS error description.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn spawn(thread: &str, err: std::io::Error) -> Self {
        Self::ThreadSpawnFailed {
            thread: thread.to_string(),
            reason: err.to_string(),
        }
    }
}

fn check_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Require `value` to be finite and strictly positive.
pub fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if check_positive(value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter { name, value })
    }
}

/// Require `value` to be finite and not negative.
pub fn require_non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter { name, value })
    }
}

// ── ClockConfig ──────────────────────────────────────────────────

/// Settings for [`SimClock`](crate::clock::SimClock).
#[derive(Clone, Debug, PartialEq)]
pub struct ClockConfig {
    /// Simulation time advanced per tick, seconds.
    pub dt: f64,
    /// Longest the coordinator waits for one tick's completions before it
    /// reports a barrier stall. `None` waits forever.
    pub stall_timeout: Option<Duration>,
    /// Stop after this many ticks. `None` runs until stopped.
    pub max_ticks: Option<u64>,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            dt: 0.01,
            stall_timeout: None,
            max_ticks: None,
        }
    }
}

impl ClockConfig {
    /// Check the time step.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !check_positive(self.dt) {
            return Err(ConfigError::InvalidDt { value: self.dt });
        }
        Ok(())
    }
}

// ── BusConfig ────────────────────────────────────────────────────

/// Settings for [`EventBus`](crate::bus::EventBus).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusConfig {
    /// Maximum number of queued, not yet popped events.
    pub capacity: usize,
    /// Number of worker threads.
    pub workers: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            workers: 4,
        }
    }
}

impl BusConfig {
    /// Check capacity and worker count.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::BusCapacityZero);
        }
        if self.workers == 0 {
            return Err(ConfigError::BusWorkersZero);
        }
        Ok(())
    }
}

// ── RecorderConfig ───────────────────────────────────────────────

/// Settings for [`DataRecorder`](crate::recorder::DataRecorder).
#[derive(Clone, Debug, PartialEq)]
pub struct RecorderConfig {
    /// Simulation time between recorded rows, seconds.
    pub interval: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self { interval: 0.01 }
    }
}

impl RecorderConfig {
    /// Check the interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !check_positive(self.interval) {
            return Err(ConfigError::InvalidRecordInterval {
                value: self.interval,
            });
        }
        Ok(())
    }
}

// ── KernelConfig ─────────────────────────────────────────────────

/// Complete configuration for a [`Session`](crate::session::Session).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KernelConfig {
    /// Clock settings.
    pub clock: ClockConfig,
    /// Event bus settings.
    pub bus: BusConfig,
    /// Recorder settings.
    pub recorder: RecorderConfig,
}

impl KernelConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock.validate()?;
        self.bus.validate()?;
        self.recorder.validate()?;
        Ok(())
    }
}
