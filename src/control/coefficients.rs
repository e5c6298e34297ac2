//! coefficients.rs
//! Coefficient engine: Tustin (bilinear) discretization of a continuous PI law.
//!
//! C(s) = Kp * (1 + 1 / (Ti * s)) sampled at Tm becomes the recurrence
//! u[k] = u[k-1] + b0 * e[k] + b1 * e[k-1] with
//!   b0 =  Kp * (1 + Tm / (2 Ti))
//!   b1 = -Kp * (1 - Tm / (2 Ti))

use log::{debug, warn};

use crate::error::{ControlError, TuningParam};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuningParameters {
    pub proportional_gain: f32,
    pub integral_time_s: f32,
}

impl TuningParameters {
    /// Validated constructor; both values must be strictly positive and finite.
    pub fn new(proportional_gain: f32, integral_time_s: f32) -> Result<Self, ControlError> {
        check_positive(TuningParam::ProportionalGain, proportional_gain)?;
        check_positive(TuningParam::IntegralTime, integral_time_s)?;
        Ok(Self { proportional_gain, integral_time_s })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscreteCoefficients {
    pub b0: f32,
    pub b1: f32,
}

fn check_positive(param: TuningParam, value: f32) -> Result<(), ControlError> {
    // NaN fails the comparison and is rejected with the rest
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ControlError::InvalidTuning { param, value })
    }
}

/// Pure coefficient computation. Identical inputs give bit-identical outputs.
pub fn recompute(
    gain: f32,
    integral_time_s: f32,
    sample_period_s: f32,
) -> Result<DiscreteCoefficients, ControlError> {
    check_positive(TuningParam::ProportionalGain, gain)?;
    check_positive(TuningParam::IntegralTime, integral_time_s)?;

    let factor = sample_period_s / (2.0 * integral_time_s);
    Ok(DiscreteCoefficients {
        b0: gain * (1.0 + factor),
        b1: -gain * (1.0 - factor),
    })
}

/// Owns the last validated tuning and the coefficients derived from it.
///
/// A setter either commits the new tuning value together with both freshly
/// computed coefficients, or changes nothing.
#[derive(Debug, Clone)]
pub struct CoefficientEngine {
    tuning: TuningParameters,
    coefficients: DiscreteCoefficients,
    sample_period_s: f32,
}

impl CoefficientEngine {
    pub fn new(tuning: TuningParameters, sample_period_s: f32) -> Result<Self, ControlError> {
        let coefficients =
            recompute(tuning.proportional_gain, tuning.integral_time_s, sample_period_s)?;
        Ok(Self { tuning, coefficients, sample_period_s })
    }

    #[inline]
    pub fn tuning(&self) -> TuningParameters {
        self.tuning
    }

    #[inline]
    pub fn coefficients(&self) -> DiscreteCoefficients {
        self.coefficients
    }

    pub fn set_gain(&mut self, gain: f32) -> Result<DiscreteCoefficients, ControlError> {
        self.commit(TuningParameters { proportional_gain: gain, ..self.tuning })
    }

    pub fn set_integral_time(&mut self, integral_time_s: f32) -> Result<DiscreteCoefficients, ControlError> {
        self.commit(TuningParameters { integral_time_s, ..self.tuning })
    }

    fn commit(&mut self, candidate: TuningParameters) -> Result<DiscreteCoefficients, ControlError> {
        match recompute(candidate.proportional_gain, candidate.integral_time_s, self.sample_period_s) {
            Ok(coefficients) => {
                self.tuning = candidate;
                self.coefficients = coefficients;
                debug!(
                    "[CoefficientEngine] Kp={} Ti={}s -> b0={} b1={}",
                    candidate.proportional_gain, candidate.integral_time_s, coefficients.b0, coefficients.b1
                );
                Ok(coefficients)
            }
            Err(e) => {
                warn!("[CoefficientEngine] {}; keeping b0={} b1={}", e, self.coefficients.b0, self.coefficients.b1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn reference_scenario_coefficients() {
        let c = recompute(5.0, 250.0, 1.0).unwrap();
        assert!(close(c.b0, 5.01), "b0 = {}", c.b0);
        assert!(close(c.b1, -4.99), "b1 = {}", c.b1);
    }

    #[test]
    fn recompute_is_deterministic() {
        for &(kp, ti, tm) in &[(5.0, 250.0, 1.0), (0.3, 1.7, 0.01), (120.0, 0.05, 2.0)] {
            let a = recompute(kp, ti, tm).unwrap();
            let b = recompute(kp, ti, tm).unwrap();
            assert_eq!(a.b0.to_bits(), b.b0.to_bits());
            assert_eq!(a.b1.to_bits(), b.b1.to_bits());
        }
    }

    #[test]
    fn non_positive_tuning_is_rejected() {
        assert!(matches!(
            recompute(0.0, 10.0, 1.0),
            Err(ControlError::InvalidTuning { param: TuningParam::ProportionalGain, .. })
        ));
        assert!(matches!(
            recompute(1.0, -3.0, 1.0),
            Err(ControlError::InvalidTuning { param: TuningParam::IntegralTime, .. })
        ));
        assert!(recompute(f32::NAN, 1.0, 1.0).is_err());
    }

    #[test]
    fn engine_keeps_coefficients_on_rejection() {
        let mut engine = CoefficientEngine::new(TuningParameters::new(5.0, 250.0).unwrap(), 1.0).unwrap();
        let before = engine.coefficients();
        let tuning_before = engine.tuning();

        assert!(engine.set_gain(-2.0).is_err());
        assert!(engine.set_integral_time(0.0).is_err());

        assert_eq!(engine.coefficients(), before);
        assert_eq!(engine.tuning(), tuning_before);
    }

    #[test]
    fn engine_recomputes_both_on_change() {
        let mut engine = CoefficientEngine::new(TuningParameters::new(5.0, 250.0).unwrap(), 1.0).unwrap();
        let c = engine.set_integral_time(0.5).unwrap();
        // factor = 1.0 / (2 * 0.5) = 1 -> b0 = 2 Kp, b1 = 0
        assert!(close(c.b0, 10.0));
        assert!(close(c.b1, 0.0));
        assert_eq!(engine.tuning().integral_time_s, 0.5);
        assert_eq!(engine.tuning().proportional_gain, 5.0);
    }
}
