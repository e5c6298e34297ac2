/*
Measures the cost of one control period in isolation: the PI recurrence, the
clamp, the scaling to degrees and the servo pulse write. A second case runs a
full `run_period` (update drain, step, telemetry hand-off, metrics and snapshot)
to compare against the sample period budget.
*/

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use crossbeam::channel::bounded;
use parking_lot::RwLock;
use std::{hint::black_box, sync::Arc, time::Duration};

use valve_pi_control::{
    comm::{link::LinkStatus, publisher::TelemetrySender},
    config::ControllerConfig,
    control::{
        actuator::{ServoDriver, SimulatedPwm},
        law::{ControlLaw, Controller},
        state::{ControlState, ControlUpdate},
    },
    scheduler::ControlActivity,
    utils::metrics::{EventRecorder, SharedMetrics},
};

fn bench_control_law(c: &mut Criterion) {
    let cfg = ControllerConfig::default();
    let mut group = c.benchmark_group("control_step");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function(BenchmarkId::new("law", "servo"), |b| {
        let mut state = ControlState::from_config(&cfg).unwrap();
        state.apply(ControlUpdate::ProcessVariable(10.0));
        let servo = ServoDriver::new(SimulatedPwm::new(), cfg.servo.clone());
        let mut controller = Controller::new(ControlLaw::from_config(&cfg), servo);

        b.iter(|| {
            black_box(controller.step(black_box(&mut state)));
        });
    });

    group.bench_function(BenchmarkId::new("run_period", "link_up"), |b| {
        let (update_tx, update_rx) = bounded(cfg.update_capacity);
        let (telemetry_tx, telemetry_rx) = bounded(1);
        let metrics = SharedMetrics::default();
        let link = LinkStatus::new(true);
        let snapshot = Arc::new(RwLock::new(ControlState::from_config(&cfg).unwrap().snapshot()));
        let mut activity = ControlActivity::new(
            &cfg,
            ServoDriver::new(SimulatedPwm::new(), cfg.servo.clone()),
            update_rx,
            TelemetrySender::new(telemetry_tx, metrics.clone()),
            link,
            snapshot,
            metrics,
            Arc::new(EventRecorder::new()),
        )
        .unwrap();

        b.iter(|| {
            let _ = update_tx.try_send(ControlUpdate::ProcessVariable(24.5));
            let outcome = activity.run_period();
            // keep the telemetry channel from filling up
            while telemetry_rx.try_recv().is_ok() {}
            black_box(outcome);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_control_law);
criterion_main!(benches);
