//! Concurrency kernel for the runway simulation.
//!
//! Provides the barrier [`SimClock`], the bounded multi-worker
//! [`EventBus`], the event table and [`EventMonitor`], the action model and
//! [`ControllerManager`], and the tick participants (state manager, model
//! runner, data recorder) that a [`Session`] wires into one run.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod action;
pub mod bus;
pub mod clock;
pub mod config;
pub mod event;
pub mod manager;
pub mod model;
pub mod monitor;
pub mod participant;
pub mod recorder;
pub mod session;
pub mod state_manager;

pub use action::{
    ActionConfigError, ActionTable, ControllerAction, ControllerOp, ResolvedAction, Setting,
};
pub use bus::{Event, EventBus, EventStats, Payload, PublishOutcome};
pub use clock::{ClockError, ClockPhase, ClockReport, SimClock, TickParticipant};
pub use config::{
    require_non_negative, require_positive, BusConfig, ClockConfig, ConfigError, KernelConfig,
    RecorderConfig,
};
pub use event::{EventDefinition, EventTable, Predicate, TriggerState};
pub use manager::{
    ControllerManager, ControllerSet, ControllerStatus, DispatchStats, StartOutcome,
};
pub use model::ModelRunner;
pub use monitor::EventMonitor;
pub use participant::ParticipantThread;
pub use recorder::{CsvSink, DataRecorder, MemorySink, RecordRow, RecordSink};
pub use session::{Scenario, Session, SessionError, ShutdownReport, SimContext};
pub use state_manager::StateManager;
