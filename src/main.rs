//! # Valve PI Controller Entry Point
//!
//! Runs the controller against the in-process broker with a simulated thermal
//! plant on the other side, and a simulated PWM channel for the servo.
//!
//! Usage: `valve_pi_control [config.toml]`
//!
//! The loop runs until the process is killed. A status line is logged every
//! `status_interval_s` seconds (set `RUST_LOG=info`).

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use log::{error, info, warn};

use valve_pi_control::{
    comm::loopback::loopback,
    config::{ControllerConfig, load_config},
    control::actuator::{ServoDriver, SimulatedPwm},
    scheduler::ControlSystem,
    sim::plant::{PeerConfig, ThermalPlant, spawn_plant_peer},
    utils::{metrics::lock_metrics, report::log_status},
};

const PLANT_AMBIENT: f32 = 18.0;
const PLANT_MAX_RISE: f32 = 20.0;
const PLANT_TIME_CONSTANT_S: f32 = 120.0;
const PLANT_NOISE: f32 = 0.05;

fn main() {
    env_logger::init();
    info!("=== VALVE PI CONTROLLER START ===");

    let cfg = match std::env::args().nth(1) {
        Some(path) => match load_config(&path) {
            Ok(cfg) => {
                info!("Loaded configuration from {}", path);
                cfg
            }
            Err(e) => {
                warn!("Ignoring config '{}': {}. Using defaults.", path, e);
                ControllerConfig::default()
            }
        },
        None => ControllerConfig::default(),
    };

    let (link, broker) = loopback();
    let pwm = SimulatedPwm::new();
    let servo = ServoDriver::new(pwm.clone(), cfg.servo.clone());

    let system = match ControlSystem::start(&cfg, link, servo) {
        Ok(system) => system,
        Err(e) => {
            error!("Failed to start controller: {}", e);
            std::process::exit(1);
        }
    };

    let peer_running = Arc::new(AtomicBool::new(true));
    let peer = PeerConfig {
        period: cfg.sample_period(),
        setpoint: cfg.default_setpoint,
        noise: PLANT_NOISE,
    };
    let plant = ThermalPlant::new(PLANT_AMBIENT, PLANT_MAX_RISE, PLANT_TIME_CONSTANT_S);
    if let Err(e) = spawn_plant_peer(broker, cfg.topics.clone(), plant, peer, peer_running.clone()) {
        error!("Failed to start plant peer: {}", e);
        peer_running.store(false, Ordering::Release);
    }

    let interval = Duration::from_secs(cfg.status_interval_s.max(1));
    loop {
        thread::sleep(interval);
        let snap = system.snapshot();
        let metrics = system.metrics();
        let m = lock_metrics(&metrics);
        log_status(&m, &snap);
        info!("[Status] servo pulse={} us ({} writes)", pwm.last_pulse_us(), pwm.writes());
    }
}
