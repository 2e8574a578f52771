//! Reference controllers, vehicle model and scenarios for the runway kernel.
//!
//! - [`controller`]: the five loop controllers (throttle up, throttle down,
//!   brake, cruise, pitch hold) and [`standard_controllers`].
//! - [`model`]: [`LinearTaxiModel`], a longitudinal ground-roll model.
//! - [`taxi`] and [`abort_takeoff`]: event tables and ready-made
//!   [`Scenario`](runway_engine::Scenario)s.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod abort_takeoff;
pub mod controller;
pub mod model;
pub mod taxi;

pub use abort_takeoff::AbortTakeoffParams;
pub use controller::{
    standard_controllers, ControlLaw, ControlOutput, LawMemory, LoopController, PidGains,
    MAX_TARGET_PITCH,
};
pub use model::{AircraftParams, Forces, LinearTaxiModel};
pub use taxi::TaxiParams;
