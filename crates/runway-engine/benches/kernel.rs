//! Criterion micro-benchmarks for bus publish throughput and barrier tick rate.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use runway_core::SharedState;
use runway_engine::{BusConfig, ClockConfig, EventBus, ParticipantThread, SimClock};

fn bench_bus_publish(c: &mut Criterion) {
    let bus = EventBus::new(BusConfig {
        capacity: 100_000,
        workers: 4,
    })
    .unwrap();
    bus.subscribe("TICK", |_| Ok(()));
    c.bench_function("bus_publish", |b| {
        b.iter(|| black_box(bus.publish(black_box("TICK"))));
    });
}

/// 1000 ticks with N no-op participants.
fn bench_barrier_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("barrier_1000_ticks");
    group.sample_size(20);
    for participants in [1usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(participants),
            &participants,
            |b, &n| {
                b.iter(|| {
                    let clock = Arc::new(
                        SimClock::new(ClockConfig {
                            max_ticks: Some(1000),
                            ..ClockConfig::default()
                        })
                        .unwrap(),
                    );
                    let threads: Vec<_> = (0..n)
                        .map(|i| {
                            ParticipantThread::spawn(&clock, &format!("bench-{i}"), |r| {
                                black_box(r.tick);
                            })
                            .unwrap()
                        })
                        .collect();
                    let report = clock.start().unwrap();
                    drop(threads);
                    black_box(report)
                });
            },
        );
    }
    group.finish();
}

fn bench_snapshot_publish(c: &mut Criterion) {
    let state = SharedState::new();
    c.bench_function("state_publish_snapshot", |b| {
        b.iter(|| black_box(state.publish_snapshot()));
    });
}

criterion_group!(
    benches,
    bench_bus_publish,
    bench_barrier_ticks,
    bench_snapshot_publish
);
criterion_main!(benches);
