//! plant.rs
//! Remote peer for running without a network: a first-order thermal plant
//! that reads the retained valve output and reports the temperature back.
//!
//! Opening the valve raises the equilibrium temperature linearly from
//! `ambient` to `ambient + max_rise`; the temperature approaches it with
//! time constant `time_constant_s`.

use rand::random_range;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::debug;

use crate::comm::loopback::BrokerHandle;
use crate::config::TopicConfig;

#[derive(Debug, Clone, Copy)]
pub struct ThermalPlant {
    pub temperature: f32,
    pub ambient: f32,
    pub max_rise: f32,
    pub time_constant_s: f32,
}

impl ThermalPlant {
    pub fn new(ambient: f32, max_rise: f32, time_constant_s: f32) -> Self {
        Self { temperature: ambient, ambient, max_rise, time_constant_s }
    }

    pub fn equilibrium(&self, valve_percent: f32) -> f32 {
        self.ambient + self.max_rise * valve_percent.clamp(0.0, 100.0) / 100.0
    }

    /// Integrate `dt_s` seconds (explicit Euler) and return the new temperature.
    pub fn advance(&mut self, valve_percent: f32, dt_s: f32) -> f32 {
        let target = self.equilibrium(valve_percent);
        let alpha = (dt_s / self.time_constant_s).min(1.0);
        self.temperature += (target - self.temperature) * alpha;
        self.temperature
    }
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub period: Duration,
    pub setpoint: f32,
    pub noise: f32,
}

/// Spawn the peer thread: publishes the setpoint once, then the measured
/// temperature every period as text, driven by the controller's retained output.
pub fn spawn_plant_peer(
    broker: BrokerHandle,
    topics: TopicConfig,
    mut plant: ThermalPlant,
    peer: PeerConfig,
    running: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name("plant-peer".into()).spawn(move || {
        broker.inject(&topics.setpoint, format!("{:.2}", peer.setpoint));
        let dt_s = peer.period.as_secs_f32();

        while running.load(Ordering::Acquire) {
            let valve = broker
                .retained_text(&topics.output)
                .and_then(|s| s.trim().parse::<f32>().ok())
                .unwrap_or(0.0);
            let temp = plant.advance(valve, dt_s);
            let noise = if peer.noise > 0.0 { random_range(-peer.noise..peer.noise) } else { 0.0 };
            let reading = temp + noise;

            if broker.is_connected() {
                broker.inject(&topics.process_variable, format!("{:.2}", reading));
            }
            debug!("[PlantPeer] valve={:.1}% temp={:.2}", valve, reading);
            thread::sleep(peer.period);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plant_settles_at_equilibrium() {
        let mut plant = ThermalPlant::new(20.0, 30.0, 5.0);
        for _ in 0..500 {
            plant.advance(50.0, 0.5);
        }
        assert!((plant.temperature - 35.0).abs() < 1e-3);
    }

    #[test]
    fn closed_valve_cools_to_ambient() {
        let mut plant = ThermalPlant::new(20.0, 30.0, 2.0);
        plant.temperature = 45.0;
        for _ in 0..200 {
            plant.advance(0.0, 1.0);
        }
        assert!((plant.temperature - 20.0).abs() < 1e-3);
    }
}
