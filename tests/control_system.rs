//! End-to-end runs of both activities on real threads against the loopback broker.

use std::{
    thread,
    time::{Duration, Instant},
};

use valve_pi_control::{
    comm::loopback::{BrokerHandle, loopback},
    config::ControllerConfig,
    control::{
        actuator::{ServoDriver, SimulatedPwm},
        state::ControllerPhase,
    },
    scheduler::ControlSystem,
    utils::metrics::lock_metrics,
};

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        sample_period_ms: 5,
        comm_poll_ms: 1,
        ..Default::default()
    }
}

fn start(cfg: &ControllerConfig) -> (ControlSystem, BrokerHandle, SimulatedPwm) {
    let (link, broker) = loopback();
    let pwm = SimulatedPwm::new();
    let servo = ServoDriver::new(pwm.clone(), cfg.servo.clone());
    let system = ControlSystem::start(cfg, link, servo).unwrap();
    (system, broker, pwm)
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn publishes_retained_position_and_output() {
    let cfg = fast_config();
    let (system, broker, pwm) = start(&cfg);

    assert!(wait_until(|| broker.retained_text(&cfg.topics.output).is_some()));
    assert!(wait_until(|| broker.retained_text(&cfg.topics.position).is_some()));

    let output = broker.retained_text(&cfg.topics.output).unwrap();
    let position = broker.retained_text(&cfg.topics.position).unwrap();
    // text with fixed decimals
    assert_eq!(output.split('.').nth(1).map(str::len), Some(3));
    assert_eq!(position.split('.').nth(1).map(str::len), Some(1));
    assert!(pwm.writes() > 0);

    system.stop();
}

#[test]
fn warm_start_reaches_steady_phase() {
    let cfg = fast_config();
    let (system, _broker, _pwm) = start(&cfg);

    assert!(wait_until(|| system.snapshot().memory.sample_index >= cfg.warm_start_sample));
    let snap = system.snapshot();
    assert_eq!(snap.memory.phase, ControllerPhase::SteadyStart);
    assert!((0.0..=100.0).contains(&snap.memory.current_output));

    system.stop();
}

#[test]
fn steps_freeze_while_link_is_down() {
    let cfg = fast_config();
    let (system, broker, _pwm) = start(&cfg);

    assert!(wait_until(|| system.snapshot().memory.sample_index >= 3));

    broker.set_connected(false);
    assert!(wait_until(|| !system.snapshot().link_up));
    let frozen = system.snapshot();
    thread::sleep(Duration::from_millis(60));
    let later = system.snapshot();
    assert_eq!(later.memory, frozen.memory);
    assert!(lock_metrics(&system.metrics()).steps_skipped > 0);

    broker.set_connected(true);
    assert!(wait_until(|| system.snapshot().memory.sample_index > frozen.memory.sample_index));

    system.stop();
}

#[test]
fn invalid_tuning_is_rejected_and_valid_tuning_applies() {
    let cfg = fast_config();
    let (system, broker, _pwm) = start(&cfg);

    broker.inject(&cfg.topics.gain, "-1");
    assert!(wait_until(|| lock_metrics(&system.metrics()).messages_rejected >= 1));
    assert_eq!(system.snapshot().tuning.proportional_gain, cfg.default_gain);

    broker.inject(&cfg.topics.integral_time, 2.0f64.to_le_bytes().to_vec());
    assert!(wait_until(|| system.snapshot().tuning.integral_time_s == 2.0));
    let snap = system.snapshot();
    let factor = cfg.sample_period_s() / (2.0 * 2.0);
    assert!((snap.coefficients.b0 - cfg.default_gain * (1.0 + factor)).abs() < 1e-5);
    assert!((snap.coefficients.b1 + cfg.default_gain * (1.0 - factor)).abs() < 1e-5);

    system.stop();
}

#[test]
fn setpoint_and_measurement_reach_the_controller() {
    let cfg = fast_config();
    let (system, broker, _pwm) = start(&cfg);

    broker.inject(&cfg.topics.setpoint, "30.5");
    broker.inject(&cfg.topics.process_variable, 21.25f32.to_le_bytes().to_vec());
    assert!(wait_until(|| {
        let s = system.snapshot().signals;
        s.setpoint == 30.5 && s.process_variable == 21.25
    }));

    broker.inject("valve/unknown", "1.0");
    assert!(wait_until(|| lock_metrics(&system.metrics()).messages_rejected >= 1));

    system.stop();
}
