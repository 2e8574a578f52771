//! Runway taxi run: throttle up, roll to the brake point, brake to a stop
//! and hand back to the pilot.
//!
//! Demonstrates:
//!   1. Building a Session from the default KernelConfig
//!   2. Putting the aircraft in AUTO mode so the controllers may act
//!   3. Running the reference taxi scenario with a CSV recorder
//!   4. Reading the shutdown report
//!
//! Run with:
//!   cargo run --example taxi                 # CSV to stdout
//!   cargo run --example taxi -- taxi.csv     # CSV to a file
//!   RUST_LOG=debug cargo run --example taxi  # more logging

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::time::Duration;

use runway::controllers::taxi;
use runway::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let out: Box<dyn Write + Send> = match std::env::args().nth(1) {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout()),
    };

    let mut session = Session::new(KernelConfig::default())?;
    session.state().set_flight_mode(FlightMode::Auto);

    let params = TaxiParams {
        arm_final_stop_after_brake: true,
        stop_position: 3000.0,
        ..TaxiParams::default()
    };
    let scenario = taxi::scenario(&session.context(), &params)?.with_sink(CsvSink::new(out));
    session.start(scenario)?;

    if !session.wait(Duration::from_secs(300)) {
        warn!("run did not finish in time, stopping");
    }
    let report = session.stop();

    let state = session.state();
    info!(
        time = state.simulation_time(),
        position = state.position(),
        velocity = state.velocity(),
        mode = %state.flight_mode(),
        "taxi complete"
    );
    match report.clock {
        Some(Ok(clock)) => info!(ticks = clock.ticks, "clock"),
        Some(Err(err)) => warn!(error = %err, "clock ended with an error"),
        None => {}
    }
    info!(
        total_ms = report.total_ms,
        events = report.dispatch.events_acted,
        denials = report.dispatch.permission_denials,
        "shutdown"
    );
    Ok(())
}
