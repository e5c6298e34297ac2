//! state.rs
//! Control state owned by the control activity, and the updates that feed it.
//!
//! The communication activity never touches this state directly. It sends
//! whole, already validated `ControlUpdate`s over a channel; tuning updates
//! carry both parameters and both coefficients, so a half-applied tuning
//! change cannot be observed by the control law.

use crate::config::ControllerConfig;
use crate::control::coefficients::{CoefficientEngine, DiscreteCoefficients, TuningParameters};
use crate::control::law::scale_to_degrees;
use crate::error::ControlError;

/// A validated change produced by the message path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlUpdate {
    Tuning {
        tuning: TuningParameters,
        coefficients: DiscreteCoefficients,
    },
    Setpoint(f32),
    ProcessVariable(f32),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSignals {
    pub setpoint: f32,
    pub process_variable: f32,
}

/// Controller lifecycle. `Priming` -> `SteadyStart` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Priming,
    SteadyStart,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerMemory {
    pub previous_error: f32,
    /// Integrator state, always within [0, 100].
    pub current_output: f32,
    pub sample_index: u64,
    pub phase: ControllerPhase,
}

impl ControllerMemory {
    #[inline]
    pub fn warm_start_done(&self) -> bool {
        self.phase == ControllerPhase::SteadyStart
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorPosition {
    pub degrees: f32,
}

#[derive(Debug, Clone)]
pub struct ControlState {
    pub tuning: TuningParameters,
    pub coefficients: DiscreteCoefficients,
    pub signals: ProcessSignals,
    pub memory: ControllerMemory,
    pub position: ActuatorPosition,
}

impl ControlState {
    /// Startup state: defaults, coefficients computed once, output preloaded.
    pub fn from_config(cfg: &ControllerConfig) -> Result<Self, ControlError> {
        let tuning = TuningParameters::new(cfg.default_gain, cfg.default_integral_time_s)?;
        let engine = CoefficientEngine::new(tuning, cfg.sample_period_s())?;
        let current_output = cfg.initial_output.clamp(0.0, 100.0);

        Ok(Self {
            tuning,
            coefficients: engine.coefficients(),
            signals: ProcessSignals {
                setpoint: cfg.default_setpoint,
                process_variable: cfg.default_process_variable,
            },
            memory: ControllerMemory {
                previous_error: 0.0,
                current_output,
                sample_index: 0,
                phase: ControllerPhase::Priming,
            },
            position: ActuatorPosition {
                degrees: scale_to_degrees(current_output, cfg.servo.min_deg, cfg.servo.max_deg),
            },
        })
    }

    /// Apply one update from the message path. Controller memory is never touched here.
    pub fn apply(&mut self, update: ControlUpdate) {
        match update {
            ControlUpdate::Tuning { tuning, coefficients } => {
                self.tuning = tuning;
                self.coefficients = coefficients;
            }
            ControlUpdate::Setpoint(v) => self.signals.setpoint = v,
            ControlUpdate::ProcessVariable(v) => self.signals.process_variable = v,
        }
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            tuning: self.tuning,
            coefficients: self.coefficients,
            signals: self.signals,
            memory: self.memory,
            degrees: self.position.degrees,
            link_up: false,
        }
    }
}

/// Read-only copy of the control state published once per period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlSnapshot {
    pub tuning: TuningParameters,
    pub coefficients: DiscreteCoefficients,
    pub signals: ProcessSignals,
    pub memory: ControllerMemory,
    pub degrees: f32,
    pub link_up: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_state_from_defaults() {
        let state = ControlState::from_config(&ControllerConfig::default()).unwrap();
        assert_eq!(state.memory.current_output, 50.0);
        assert_eq!(state.memory.sample_index, 0);
        assert_eq!(state.memory.phase, ControllerPhase::Priming);
        assert!(!state.memory.warm_start_done());
        assert_eq!(state.position.degrees, 90.0);
        assert!((state.coefficients.b0 - 5.01).abs() < 1e-4);
    }

    #[test]
    fn updates_replace_single_fields() {
        let mut state = ControlState::from_config(&ControllerConfig::default()).unwrap();
        let memory = state.memory;

        state.apply(ControlUpdate::Setpoint(-1.0e6));
        state.apply(ControlUpdate::ProcessVariable(31.5));

        assert_eq!(state.signals.setpoint, -1.0e6);
        assert_eq!(state.signals.process_variable, 31.5);
        assert_eq!(state.memory, memory);
    }

    #[test]
    fn tuning_update_replaces_pair() {
        let mut state = ControlState::from_config(&ControllerConfig::default()).unwrap();
        let tuning = TuningParameters::new(2.0, 10.0).unwrap();
        let coefficients = DiscreteCoefficients { b0: 2.1, b1: -1.9 };

        state.apply(ControlUpdate::Tuning { tuning, coefficients });

        assert_eq!(state.tuning, tuning);
        assert_eq!(state.coefficients, coefficients);
    }
}
