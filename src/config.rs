//! config.rs
//! Runtime configuration: compiled-in defaults, optionally overridden from a TOML file.
//!
//! Every field has a default so a partial file (or no file at all) is valid.
//! Topic names are configuration; the role each topic plays is fixed.

use serde::Deserialize;
use std::{path::Path, time::Duration};

use crate::error::ConfigError;

/// Sample at which the warm start forces the controller to a clean steady state.
pub const WARM_START_SAMPLE: u64 = 5;
/// Output forced by the warm start (and preloaded at startup).
pub const STEADY_OUTPUT: f32 = 50.0;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Control period (Tm) in milliseconds.
    pub sample_period_ms: u64,
    pub default_gain: f32,
    pub default_integral_time_s: f32,
    pub default_setpoint: f32,
    pub default_process_variable: f32,
    /// Output loaded into controller memory at startup, avoids a jump from 0.
    pub initial_output: f32,
    pub warm_start_sample: u64,
    pub servo: ServoConfig,
    pub topics: TopicConfig,
    pub update_capacity: usize,
    pub telemetry_capacity: usize,
    /// Pause between two communication service iterations.
    pub comm_poll_ms: u64,
    /// Pin the control thread to this core id when set.
    pub control_core: Option<usize>,
    /// Write the control event log to this CSV file when set.
    pub event_log: Option<String>,
    pub status_interval_s: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub min_deg: f32,
    pub max_deg: f32,
    pub min_pulse_us: u32,
    pub max_pulse_us: u32,
    /// Servo is mounted mirrored: physical angle = max + min - logical angle.
    pub inverted: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    pub gain: String,
    pub integral_time: String,
    pub setpoint: String,
    pub process_variable: String,
    pub position: String,
    pub output: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 1_000,
            default_gain: 5.0,
            default_integral_time_s: 250.0,
            default_setpoint: 25.0,
            default_process_variable: 25.0,
            initial_output: STEADY_OUTPUT,
            warm_start_sample: WARM_START_SAMPLE,
            servo: ServoConfig::default(),
            topics: TopicConfig::default(),
            update_capacity: 64,
            telemetry_capacity: 16,
            comm_poll_ms: 10,
            control_core: None,
            event_log: None,
            status_interval_s: 10,
        }
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            min_deg: 0.0,
            max_deg: 180.0,
            min_pulse_us: 500,
            max_pulse_us: 2_400,
            inverted: true,
        }
    }
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            gain: "valve/pi/kp".into(),
            integral_time: "valve/pi/ti".into(),
            setpoint: "valve/temperature/setpoint".into(),
            process_variable: "valve/temperature/measured".into(),
            position: "valve/servo/position".into(),
            output: "valve/pi/output".into(),
        }
    }
}

impl ControllerConfig {
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    /// Tm in seconds, as used by the Tustin discretization.
    pub fn sample_period_s(&self) -> f32 {
        self.sample_period_ms as f32 / 1_000.0
    }

    pub fn comm_poll_interval(&self) -> Duration {
        Duration::from_millis(self.comm_poll_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_period_ms == 0 {
            return Err(ConfigError::Invalid("sample_period_ms must be > 0"));
        }
        // the first check runs after sample 1
        if self.warm_start_sample == 0 {
            return Err(ConfigError::Invalid("warm_start_sample must be >= 1"));
        }
        if !(self.default_gain > 0.0 && self.default_gain.is_finite()) {
            return Err(ConfigError::Invalid("default_gain must be > 0"));
        }
        if !(self.default_integral_time_s > 0.0 && self.default_integral_time_s.is_finite()) {
            return Err(ConfigError::Invalid("default_integral_time_s must be > 0"));
        }
        if !(self.servo.max_deg > self.servo.min_deg) {
            return Err(ConfigError::Invalid("servo.max_deg must exceed servo.min_deg"));
        }
        if self.servo.max_pulse_us <= self.servo.min_pulse_us {
            return Err(ConfigError::Invalid("servo.max_pulse_us must exceed servo.min_pulse_us"));
        }
        if self.update_capacity == 0 || self.telemetry_capacity == 0 {
            return Err(ConfigError::Invalid("channel capacities must be > 0"));
        }
        Ok(())
    }
}

/// Load and validate a config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<ControllerConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    let cfg: ControllerConfig = toml::from_str(&text)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = ControllerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sample_period_s(), 1.0);
        assert_eq!(cfg.warm_start_sample, 5);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: ControllerConfig = toml::from_str(
            r#"
            sample_period_ms = 250
            [topics]
            setpoint = "lab/sp"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sample_period_ms, 250);
        assert_eq!(cfg.topics.setpoint, "lab/sp");
        assert_eq!(cfg.topics.gain, TopicConfig::default().gain);
        assert_eq!(cfg.servo.max_deg, 180.0);
    }

    #[test]
    fn zero_period_rejected() {
        let cfg = ControllerConfig { sample_period_ms: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn warm_start_at_sample_zero_rejected() {
        let cfg = ControllerConfig { warm_start_sample: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
        let cfg = ControllerConfig { warm_start_sample: 1, ..Default::default() };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config("/nonexistent/valve.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
