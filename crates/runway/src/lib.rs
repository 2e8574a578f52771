//! Runway: a real-time, discrete-time vehicle motion simulation kernel.
//!
//! This is the facade crate. It re-exports the kernel ([`engine`]), the
//! shared state and capability traits ([`types`]) and the reference
//! controllers, model and scenarios ([`controllers`]).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use runway::prelude::*;
//! use runway::controllers::taxi;
//!
//! let mut session = Session::new(KernelConfig::default()).unwrap();
//! session.state().set_flight_mode(FlightMode::Auto);
//! let scenario = taxi::scenario(&session.context(), &TaxiParams::default()).unwrap();
//! session.start(scenario).unwrap();
//! session.wait(Duration::from_secs(60));
//! let report = session.stop();
//! println!("{} ticks", report.clock.unwrap().unwrap().ticks);
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `runway-core` | State store, update queue, flight mode, traits |
//! | [`engine`] | `runway-engine` | Clock, event bus, monitor, controller manager, session |
//! | [`controllers`] | `runway-controllers` | Loop controllers, taxi model, scenarios |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Shared state, update queue, flight mode and capability traits
/// (`runway-core`).
pub use runway_core as types;

/// Barrier clock, event bus, event monitor, controller manager and session
/// (`runway-engine`).
pub use runway_engine as engine;

/// Reference loop controllers, the linear taxi model and the taxi and
/// rejected-takeoff scenarios (`runway-controllers`).
pub use runway_controllers as controllers;

/// Common imports for typical usage.
///
/// ```rust
/// use runway::prelude::*;
/// ```
pub mod prelude {
    // State and traits
    pub use runway_core::{
        Actuator, ClockReading, ControlAuthority, ControlFlag, Controller, FlightMode, Model,
        Scalar, SharedState, StateUpdate, StateUpdateQueue,
    };

    // Errors
    pub use runway_core::{ControllerError, HandlerError};
    pub use runway_engine::{ClockError, ConfigError, SessionError};

    // Kernel
    pub use runway_engine::{
        BusConfig, ClockConfig, ControllerAction, ControllerManager, ControllerSet,
        EventDefinition, EventTable, KernelConfig, RecorderConfig, Scenario, Session,
        ShutdownReport, SimClock, SimContext,
    };

    // Recording
    pub use runway_engine::{CsvSink, MemorySink, RecordSink};

    // Reference implementations
    pub use runway_controllers::{
        AbortTakeoffParams, AircraftParams, LinearTaxiModel, LoopController, TaxiParams,
    };
}
