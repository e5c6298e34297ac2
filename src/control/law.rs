//! law.rs
//! Discrete PI control law with clamped anti-windup and a one-shot warm start.
//!
//! The law itself is pure with respect to the outside world: it reads and
//! writes `ControlState` and returns the new actuator angle. Driving the
//! servo and deciding whether a step runs at all (link health) happen in the
//! caller.

use log::info;

use crate::config::{ControllerConfig, STEADY_OUTPUT};
use crate::control::actuator::Actuator;
use crate::control::state::{ControlState, ControllerPhase};

pub const OUTPUT_MIN: f32 = 0.0;
pub const OUTPUT_MAX: f32 = 100.0;

/// Map a logical output (percent) onto the servo range.
/// Total and monotonic: input is clamped to [0, 100] first.
#[inline]
pub fn scale_to_degrees(output: f32, min_deg: f32, max_deg: f32) -> f32 {
    let u = if output.is_nan() { OUTPUT_MIN } else { output.clamp(OUTPUT_MIN, OUTPUT_MAX) };
    min_deg + (u / OUTPUT_MAX) * (max_deg - min_deg)
}

/// Result of one executed control step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    pub error: f32,
    pub raw_output: f32,
    pub output: f32,
    pub degrees: f32,
    pub sample_index: u64,
    pub saturated: bool,
    pub warm_started: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ControlLaw {
    warm_start_sample: u64,
    min_deg: f32,
    max_deg: f32,
}

impl ControlLaw {
    pub fn new(warm_start_sample: u64, min_deg: f32, max_deg: f32) -> Self {
        Self { warm_start_sample, min_deg, max_deg }
    }

    pub fn from_config(cfg: &ControllerConfig) -> Self {
        Self::new(cfg.warm_start_sample, cfg.servo.min_deg, cfg.servo.max_deg)
    }

    #[inline]
    pub fn scale(&self, output: f32) -> f32 {
        scale_to_degrees(output, self.min_deg, self.max_deg)
    }

    /// One discrete step: u[k] = clamp(u[k-1] + b0 e[k] + b1 e[k-1], 0, 100).
    pub fn step(&self, state: &mut ControlState) -> StepOutcome {
        let b = state.coefficients;
        let mem = &mut state.memory;

        let error = state.signals.setpoint - state.signals.process_variable;
        let raw_output = mem.current_output + b.b0 * error + b.b1 * mem.previous_error;
        // A NaN here could only come from overflowing inputs; hold the last output
        let output = if raw_output.is_nan() {
            mem.current_output
        } else {
            raw_output.clamp(OUTPUT_MIN, OUTPUT_MAX)
        };
        let saturated = output != raw_output;

        mem.current_output = output;
        mem.previous_error = error;
        mem.sample_index += 1;

        let warm_started = self.try_warm_start(state);

        let degrees = self.scale(state.memory.current_output);
        state.position.degrees = degrees;

        StepOutcome {
            error,
            raw_output,
            output: state.memory.current_output,
            degrees,
            sample_index: state.memory.sample_index,
            saturated,
            warm_started,
        }
    }

    /// Fires once, when the sample counter reaches the threshold while priming.
    /// The phase guard holds on its own even if the counter were to revisit it.
    pub fn try_warm_start(&self, state: &mut ControlState) -> bool {
        if state.memory.phase != ControllerPhase::Priming
            || state.memory.sample_index != self.warm_start_sample
        {
            return false;
        }

        state.memory.current_output = STEADY_OUTPUT;
        state.memory.previous_error = 0.0;
        state.signals.process_variable = state.signals.setpoint;
        state.memory.phase = ControllerPhase::SteadyStart;

        info!(
            "[ControlLaw] warm start at sample {}: output={} pv:=sp={}",
            state.memory.sample_index, STEADY_OUTPUT, state.signals.setpoint
        );
        true
    }
}

/// Control law bound to a physical actuator.
pub struct Controller<A: Actuator> {
    law: ControlLaw,
    actuator: A,
}

impl<A: Actuator> Controller<A> {
    pub fn new(law: ControlLaw, actuator: A) -> Self {
        Self { law, actuator }
    }

    /// Compute one step and drive the actuator with the resulting angle.
    pub fn step(&mut self, state: &mut ControlState) -> StepOutcome {
        let outcome = self.law.step(state);
        self.actuator.drive(outcome.degrees);
        outcome
    }

    /// Drive the actuator to the current (preloaded) output without stepping.
    pub fn hold(&mut self, state: &ControlState) {
        self.actuator.drive(state.position.degrees);
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }
}
