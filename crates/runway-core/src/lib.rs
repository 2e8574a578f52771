//! Core types and traits for the runway simulation kernel.
//!
//! This is the leaf crate of the workspace. It defines the shared state
//! store every participant reads and writes, the single-consumer state
//! update queue, the capability traits for controllers and vehicle models,
//! and the error types those traits surface.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod state;
pub mod sync;
pub mod traits;
pub mod update;

pub use error::{ControllerError, HandlerError};
pub use state::{
    Actuator, AtomicF64, ControlAuthority, ControlFlag, FlightMode, ParseNameError, Scalar,
    SharedState, StateSnapshot,
};
pub use traits::{ClockReading, Controller, Model};
pub use update::{StateUpdate, StateUpdateQueue};
