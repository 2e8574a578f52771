//! Event dispatch through a running session: the acted ledger, the
//! authority gate and flight-mode consistency.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use runway::engine::action::names;
use runway::prelude::*;
use runway_test_utils::{wait_until, MockController};

const TIMEOUT: Duration = Duration::from_secs(10);

fn session(max_ticks: Option<u64>) -> Session {
    Session::new(KernelConfig {
        clock: ClockConfig {
            max_ticks,
            ..ClockConfig::default()
        },
        ..KernelConfig::default()
    })
    .unwrap()
}

fn always(name: &str, action: ControllerAction) -> EventTable {
    EventTable::from_definitions([EventDefinition::new(name, |_| true).actions([action])]).unwrap()
}

fn scenario_with(events: EventTable, controller: &MockController) -> Scenario {
    let mut set = ControllerSet::new();
    set.insert(Box::new(controller.clone())).unwrap();
    Scenario::new(events).with_controllers(set)
}

#[test]
fn a_held_trigger_is_acted_on_once() {
    let throttle = MockController::new(names::THROTTLE_INCREASE).with_authority(Actuator::Throttle);
    let mut s = session(Some(10));
    s.state().set_flight_mode(FlightMode::Auto);
    s.start(scenario_with(
        always("HELD", ControllerAction::StartThrottleIncrease),
        &throttle,
    ))
    .unwrap();
    assert!(s.wait(TIMEOUT));
    assert!(wait_until(TIMEOUT, || throttle.starts() == 1));

    // Re-publishing an acted event reaches the ledger and stops there.
    for _ in 0..3 {
        s.bus().publish("HELD");
    }
    assert!(wait_until(TIMEOUT, || s.bus().stats_for("HELD").processed == 4));

    let report = s.stop();
    assert_eq!(report.clock.unwrap().unwrap().ticks, 10);
    assert_eq!(report.bus["HELD"].published, 4);
    assert_eq!(report.dispatch.events_acted, 1);
    assert_eq!(report.dispatch.duplicates_skipped, 3);
    assert_eq!(throttle.starts(), 1);
}

#[test]
fn manual_mode_denies_automatic_brake() {
    let brake = MockController::new(names::BRAKE).with_authority(Actuator::Brake);
    let mut s = session(Some(20));
    assert_eq!(s.state().flight_mode(), FlightMode::Manual);
    s.start(scenario_with(always("BRAKE_NOW", ControllerAction::StartBrake), &brake))
        .unwrap();
    assert!(s.wait(TIMEOUT));
    assert!(wait_until(TIMEOUT, || s
        .manager()
        .unwrap()
        .stats()
        .permission_denials
        == 1));
    let report = s.stop();
    assert_eq!(brake.starts(), 0);
    assert!(!brake.is_enabled());
    assert_eq!(report.dispatch.failures, 0);
}

#[test]
fn mode_switch_action_gates_later_starts() {
    let throttle = MockController::new(names::THROTTLE_INCREASE).with_authority(Actuator::Throttle);
    let events = EventTable::from_definitions([
        EventDefinition::new("GO_AUTO", |_| true).actions([
            ControllerAction::SwitchToAutoMode,
            ControllerAction::StartThrottleIncrease,
        ]),
    ])
    .unwrap();
    let mut s = session(Some(20));
    s.start(scenario_with(events, &throttle)).unwrap();
    assert!(wait_until(TIMEOUT, || throttle.starts() == 1));
    assert_eq!(s.state().flight_mode(), FlightMode::Auto);
    let report = s.stop();
    assert_eq!(report.dispatch.permission_denials, 0);
}

#[test]
fn mode_and_authority_are_read_together() {
    let state = Arc::new(SharedState::new());
    let stop = Arc::new(AtomicBool::new(false));
    let mismatches = Arc::new(AtomicU64::new(0));

    let writer = {
        let state = Arc::clone(&state);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let modes = [FlightMode::Manual, FlightMode::Auto, FlightMode::SemiAuto];
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                state.set_flight_mode(modes[i % modes.len()]);
                i += 1;
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let state = Arc::clone(&state);
            let mismatches = Arc::clone(&mismatches);
            thread::spawn(move || {
                for _ in 0..50_000 {
                    let (mode, authority) = state.mode_and_authority();
                    if authority != mode.authority() {
                        mismatches.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();
    for r in readers {
        r.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();
    assert_eq!(mismatches.load(Ordering::Relaxed), 0);
}
