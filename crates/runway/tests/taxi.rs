//! Taxi scenario end to end.

use std::time::Duration;

use runway::controllers::standard_controllers;
use runway::controllers::taxi::{self, FINAL_STOP, START_THROTTLE};
use runway::engine::action::names;
use runway::prelude::*;
use runway_test_utils::wait_until;

const TIMEOUT: Duration = Duration::from_secs(30);

fn wait_ticks(s: &Session, n: u64) {
    let target = s.clock().tick_count() + n;
    assert!(wait_until(TIMEOUT, || s.clock().tick_count() >= target));
}

fn running(s: &Session) -> Vec<String> {
    s.manager()
        .unwrap()
        .controller_status()
        .into_iter()
        .filter(|c| c.enabled)
        .map(|c| c.name)
        .collect()
}

#[test]
fn final_stop_hands_back_to_the_pilot_once() {
    let mut s = Session::new(KernelConfig::default()).unwrap();
    let ctx = s.context();
    let params = TaxiParams::default();
    taxi::initialize(&ctx.state, &params);
    ctx.state.set(Scalar::Velocity, 5.0);
    ctx.state.set_flight_mode(FlightMode::Auto);

    // No model: velocity only moves when the test moves it.
    let scenario = Scenario::new(taxi::events(&params).unwrap())
        .with_controllers(standard_controllers(&ctx).unwrap());
    s.start(scenario).unwrap();

    assert!(wait_until(TIMEOUT, || s
        .events()
        .unwrap()
        .trigger_state(START_THROTTLE)
        .is_some_and(|t| t.acted)));
    s.manager()
        .unwrap()
        .dispatch(&[ControllerAction::StartBrake])
        .unwrap();
    assert!(wait_until(TIMEOUT, || running(&s).len() == 2));
    assert!(running(&s).iter().any(|n| n == names::BRAKE));

    ctx.state.set(Scalar::Velocity, 0.05);
    assert!(wait_until(TIMEOUT, || running(&s).is_empty()
        && ctx.state.flight_mode() == FlightMode::Manual));

    // Give control back, then cross the threshold again.
    ctx.state.set_flight_mode(FlightMode::Auto);
    ctx.state.set(Scalar::Velocity, 3.0);
    wait_ticks(&s, 20);
    ctx.state.set(Scalar::Velocity, 0.05);
    wait_ticks(&s, 20);
    assert_eq!(ctx.state.flight_mode(), FlightMode::Auto);

    let report = s.stop();
    assert_eq!(report.bus[FINAL_STOP].published, 1);
    assert_eq!(report.dispatch.events_acted, 2);
    assert_eq!(report.dispatch.permission_denials, 0);
}

#[test]
fn full_taxi_run_brakes_to_a_stop() {
    let sink = MemorySink::new();
    let mut s = Session::new(KernelConfig::default()).unwrap();
    s.state().set_flight_mode(FlightMode::Auto);
    let params = TaxiParams {
        arm_final_stop_after_brake: true,
        stop_position: 100_000.0,
        ..TaxiParams::default()
    };
    let scenario = taxi::scenario(&s.context(), &params)
        .unwrap()
        .with_sink(sink.clone());
    s.start(scenario).unwrap();
    assert!(s.wait(Duration::from_secs(120)));
    let report = s.stop();

    let state = s.state();
    assert!(state.flag(ControlFlag::FinalStopEnabled));
    assert!(state.velocity() <= params.zero_velocity_threshold);
    assert!(state.position() >= params.brake_position);
    assert!(state.simulation_time() < params.stop_time);
    assert_eq!(state.flight_mode(), FlightMode::Manual);
    assert_eq!(report.dispatch.events_acted, 3);
    assert_eq!(report.dispatch.failures, 0);

    let rows = sink.rows();
    assert!(rows.len() > 100);
    let peak = rows.iter().map(|r| r.velocity).fold(0.0, f64::max);
    assert!(peak > 10.0);
    assert!(rows.windows(2).all(|w| w[1].position >= w[0].position));
}

#[test]
fn unarmed_final_stop_fires_at_the_start() {
    let mut s = Session::new(KernelConfig::default()).unwrap();
    s.state().set_flight_mode(FlightMode::Auto);
    let scenario = taxi::scenario(&s.context(), &TaxiParams::default()).unwrap();
    s.start(scenario).unwrap();
    assert!(s.wait(TIMEOUT));
    s.stop();
    assert!(s.state().flag(ControlFlag::FinalStopEnabled));
    assert_eq!(s.state().position(), 0.0);
    assert_eq!(s.state().flight_mode(), FlightMode::Manual);
}
