//! actuator.rs
//! Servo driver: logical angle -> physical orientation -> PWM pulse width.
//!
//! The orientation inversion lives only here. Everything upstream (control
//! state, telemetry) works with the logical angle.

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicU64, Ordering},
};

use log::trace;

use crate::config::ServoConfig;

/// Anything that can be commanded to a logical angle in degrees.
pub trait Actuator: Send {
    fn drive(&mut self, degrees: f32);
}

/// Hardware PWM output, pulse width in microseconds.
pub trait PwmChannel: Send {
    fn set_pulse_us(&mut self, pulse_us: u32);
}

pub struct ServoDriver<P: PwmChannel> {
    pwm: P,
    cfg: ServoConfig,
}

impl<P: PwmChannel> ServoDriver<P> {
    pub fn new(pwm: P, cfg: ServoConfig) -> Self {
        Self { pwm, cfg }
    }

    /// Physical angle for a logical one, with the mounting inversion applied.
    pub fn physical_degrees(&self, degrees: f32) -> f32 {
        let d = degrees.clamp(self.cfg.min_deg, self.cfg.max_deg);
        if self.cfg.inverted {
            self.cfg.max_deg + self.cfg.min_deg - d
        } else {
            d
        }
    }

    pub fn pulse_for(&self, degrees: f32) -> u32 {
        let physical = self.physical_degrees(degrees);
        let span_deg = self.cfg.max_deg - self.cfg.min_deg;
        let span_us = (self.cfg.max_pulse_us - self.cfg.min_pulse_us) as f32;
        let frac = (physical - self.cfg.min_deg) / span_deg;
        self.cfg.min_pulse_us + (frac * span_us).round() as u32
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }
}

impl<P: PwmChannel> Actuator for ServoDriver<P> {
    fn drive(&mut self, degrees: f32) {
        let pulse = self.pulse_for(degrees);
        trace!("[ServoDriver] {:.1} deg -> {} us", degrees, pulse);
        self.pwm.set_pulse_us(pulse);
    }
}

/// PWM channel without hardware behind it; the last pulse is readable from clones.
#[derive(Clone, Default)]
pub struct SimulatedPwm {
    last_pulse_us: Arc<AtomicU32>,
    writes: Arc<AtomicU64>,
}

impl SimulatedPwm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_pulse_us(&self) -> u32 {
        self.last_pulse_us.load(Ordering::Acquire)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl PwmChannel for SimulatedPwm {
    fn set_pulse_us(&mut self, pulse_us: u32) {
        self.last_pulse_us.store(pulse_us, Ordering::Release);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Records every commanded logical angle.
#[derive(Debug, Default, Clone)]
pub struct RecordingActuator {
    pub commands: Vec<f32>,
}

impl RecordingActuator {
    pub fn last(&self) -> Option<f32> {
        self.commands.last().copied()
    }
}

impl Actuator for RecordingActuator {
    fn drive(&mut self, degrees: f32) {
        self.commands.push(degrees);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inversion_only_at_physical_boundary() {
        let driver = ServoDriver::new(SimulatedPwm::new(), ServoConfig::default());
        assert_eq!(driver.physical_degrees(0.0), 180.0);
        assert_eq!(driver.physical_degrees(135.0), 45.0);
        assert_eq!(driver.physical_degrees(90.0), 90.0);
    }

    #[test]
    fn pulse_width_follows_physical_angle() {
        let cfg = ServoConfig { inverted: false, ..ServoConfig::default() };
        let mut driver = ServoDriver::new(SimulatedPwm::new(), cfg);
        driver.drive(0.0);
        assert_eq!(driver.pwm().last_pulse_us(), 500);
        driver.drive(180.0);
        assert_eq!(driver.pwm().last_pulse_us(), 2_400);
        driver.drive(90.0);
        assert_eq!(driver.pwm().last_pulse_us(), 1_450);
        assert_eq!(driver.pwm().writes(), 3);
    }

    #[test]
    fn inverted_servo_gets_mirrored_pulse() {
        let mut driver = ServoDriver::new(SimulatedPwm::new(), ServoConfig::default());
        driver.drive(0.0);
        assert_eq!(driver.pwm().last_pulse_us(), 2_400);
        driver.drive(400.0);
        assert_eq!(driver.pwm().last_pulse_us(), 500);
    }
}
