//! Session shutdown is bounded and reports what it did.

use std::time::{Duration, Instant};

use runway::prelude::*;
use runway_test_utils::{wait_until, MockController, RecordingModel};

const TIMEOUT: Duration = Duration::from_secs(10);

/// A model that takes a while over every tick.
struct SlowModel;

impl Model for SlowModel {
    fn name(&self) -> &str {
        "slow"
    }

    fn step(&mut self, _state: &SharedState, _updates: &StateUpdateQueue, _clock: ClockReading) {
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn unbounded_run_stops_promptly() {
    let model = RecordingModel::new();
    let sink = MemorySink::new();
    let mut s = Session::new(KernelConfig::default()).unwrap();
    s.start(
        Scenario::new(EventTable::new())
            .with_model(model.clone())
            .with_sink(sink.clone()),
    )
    .unwrap();
    assert!(wait_until(TIMEOUT, || model.steps() >= 100));

    let started = Instant::now();
    let report = s.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(report.total_ms >= report.drain_ms);
    assert_eq!(report.participants_panicked, 0);
    // state manager, monitor, model, recorder
    assert_eq!(report.participants_joined, 4);
    let ticks = report.clock.unwrap().unwrap().ticks;
    assert!(ticks >= 100);
    assert!(!sink.rows().is_empty());
    assert!(!s.state().flag(ControlFlag::SimulationRunning));
    assert_eq!(s.clock().registered(), 0);
}

#[test]
fn slow_participant_does_not_hold_up_shutdown() {
    let mut s = Session::new(KernelConfig::default()).unwrap();
    s.start(Scenario::new(EventTable::new()).with_model(SlowModel))
        .unwrap();
    assert!(wait_until(TIMEOUT, || s.clock().tick_count() >= 3));
    let started = Instant::now();
    let report = s.stop();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(report.clock.unwrap().is_ok());
}

#[test]
fn running_controllers_are_stopped() {
    let throttle = MockController::new("throttle_increase").with_authority(Actuator::Throttle);
    let mut set = ControllerSet::new();
    set.insert(Box::new(throttle.clone())).unwrap();
    let events = EventTable::from_definitions([EventDefinition::new("GO", |_| true)
        .actions([ControllerAction::StartThrottleIncrease])])
    .unwrap();

    let mut s = Session::new(KernelConfig::default()).unwrap();
    s.state().set_flight_mode(FlightMode::Auto);
    s.start(Scenario::new(events).with_controllers(set)).unwrap();
    assert!(wait_until(TIMEOUT, || throttle.is_enabled()));

    s.stop();
    assert!(!throttle.is_enabled());
    assert_eq!(throttle.stops(), 1);
}

#[test]
fn second_stop_is_empty() {
    let mut s = Session::new(KernelConfig::default()).unwrap();
    s.start(Scenario::default()).unwrap();
    let first = s.stop();
    assert!(first.clock.is_some());
    let second = s.stop();
    assert!(second.clock.is_none());
    assert_eq!(second.total_ms, 0);
}
