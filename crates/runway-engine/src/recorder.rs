//! Periodic recording of the motion state.
//!
//! [`DataRecorder`] writes one [`RecordRow`] at time zero and then every
//! `interval` seconds of simulation time into a [`RecordSink`]. Timestamps
//! are strictly increasing; a row that would break that is rejected.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use runway_core::sync::lock;
use runway_core::{ClockReading, Scalar, SharedState};
use tracing::warn;

use crate::clock::SimClock;
use crate::config::{ConfigError, RecorderConfig};
use crate::participant::ParticipantThread;

/// One recorded sample.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RecordRow {
    /// Simulation time, seconds.
    pub time: f64,
    /// Metres.
    pub position: f64,
    /// m/s.
    pub velocity: f64,
    /// m/s².
    pub acceleration: f64,
    /// 0..=1.
    pub throttle: f64,
    /// 0..=1.
    pub brake: f64,
    /// Newtons.
    pub thrust: f64,
    /// Newtons.
    pub drag_force: f64,
    /// Newtons.
    pub brake_force: f64,
}

impl RecordRow {
    /// Sample `state` at `time`.
    pub fn capture(state: &SharedState, time: f64) -> Self {
        Self {
            time,
            position: state.get(Scalar::Position),
            velocity: state.get(Scalar::Velocity),
            acceleration: state.get(Scalar::Acceleration),
            throttle: state.get(Scalar::Throttle),
            brake: state.get(Scalar::Brake),
            thrust: state.get(Scalar::Thrust),
            drag_force: state.get(Scalar::DragForce),
            brake_force: state.get(Scalar::BrakeForce),
        }
    }
}

/// Destination for recorded rows.
pub trait RecordSink: Send {
    /// Write one row.
    fn write_row(&mut self, row: &RecordRow) -> io::Result<()>;

    /// Flush buffered output.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes rows as CSV with a header line.
#[derive(Debug)]
pub struct CsvSink<W: Write> {
    out: W,
    header_written: bool,
}

impl<W: Write> CsvSink<W> {
    /// Column header.
    pub const HEADER: &'static str =
        "time,position,velocity,acceleration,throttle,brake,thrust,drag_force,brake_force";

    /// Wrap a writer.
    pub fn new(out: W) -> Self {
        Self {
            out,
            header_written: false,
        }
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> RecordSink for CsvSink<W> {
    fn write_row(&mut self, r: &RecordRow) -> io::Result<()> {
        if !self.header_written {
            writeln!(self.out, "{}", Self::HEADER)?;
            self.header_written = true;
        }
        writeln!(
            self.out,
            "{:.3},{:.3},{:.3},{:.3},{:.4},{:.4},{:.1},{:.1},{:.1}",
            r.time,
            r.position,
            r.velocity,
            r.acceleration,
            r.throttle,
            r.brake,
            r.thrust,
            r.drag_force,
            r.brake_force
        )
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Keeps rows in memory behind a shared handle.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<RecordRow>>>,
}

impl MemorySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every row recorded so far.
    pub fn rows(&self) -> Vec<RecordRow> {
        lock(&self.rows).clone()
    }
}

impl RecordSink for MemorySink {
    fn write_row(&mut self, row: &RecordRow) -> io::Result<()> {
        lock(&self.rows).push(*row);
        Ok(())
    }
}

/// Samples the state store on a fixed simulation-time interval.
pub struct DataRecorder {
    state: Arc<SharedState>,
    sink: Box<dyn RecordSink>,
    interval: f64,
    last_time: Option<f64>,
    next_due: f64,
}

impl DataRecorder {
    /// Create a recorder writing into `sink`.
    pub fn new(
        state: Arc<SharedState>,
        sink: Box<dyn RecordSink>,
        config: &RecorderConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state,
            sink,
            interval: config.interval,
            last_time: None,
            next_due: 0.0,
        })
    }

    /// Record a row stamped `time`. Returns `false` if the row was rejected.
    pub fn record(&mut self, time: f64) -> bool {
        if let Some(last) = self.last_time {
            if time <= last {
                warn!(time, last, "non-increasing record timestamp rejected");
                return false;
            }
        }
        let row = RecordRow::capture(&self.state, time);
        if let Err(e) = self.sink.write_row(&row) {
            warn!(time, error = %e, "failed to write record row");
            return false;
        }
        self.last_time = Some(time);
        true
    }

    /// Per-tick hook: records the initial row on the first call, then one
    /// row whenever `interval` has elapsed.
    pub fn on_tick(&mut self, clock: ClockReading) {
        if self.last_time.is_none() {
            self.record(0.0);
            self.next_due = self.interval;
        }
        // Tolerate accumulated floating-point error in the clock's time.
        if clock.time + 1e-9 >= self.next_due {
            self.record(clock.time);
            self.next_due = clock.time + self.interval;
        }
    }

    /// Flush the sink.
    pub fn flush(&mut self) {
        if let Err(e) = self.sink.flush() {
            warn!(error = %e, "failed to flush recorder");
        }
    }

    /// Run the recorder as a tick participant.
    pub fn spawn(mut self, clock: &Arc<SimClock>) -> Result<ParticipantThread, ConfigError> {
        ParticipantThread::spawn(clock, "recorder", move |reading| {
            self.on_tick(reading);
        })
    }
}

impl Drop for DataRecorder {
    fn drop(&mut self) {
        self.flush();
    }
}
