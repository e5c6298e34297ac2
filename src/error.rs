//! error.rs
//! Error taxonomy for the controller.
//!
//! None of these are fatal: every variant is logged and the controller keeps
//! its last good state. Loss of the telemetry link is not an error at all, it
//! is a scheduling condition (see `scheduler::PeriodOutcome::Skipped`).

use thiserror::Error;

/// Tuning parameter that failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningParam {
    ProportionalGain,
    IntegralTime,
}

impl std::fmt::Display for TuningParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TuningParam::ProportionalGain => write!(f, "proportional gain"),
            TuningParam::IntegralTime => write!(f, "integral time"),
        }
    }
}

/// Why a payload could not be turned into a number.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum DecodeError {
    #[error("payload too short ({0} bytes)")]
    TooShort(usize),
    #[error("payload decodes to a non-finite value ({0})")]
    NonFinite(f32),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error("invalid tuning: {param} must be > 0, got {value}")]
    InvalidTuning { param: TuningParam, value: f32 },
    #[error("undecodable message on '{topic}': {source}")]
    UndecodableMessage {
        topic: String,
        #[source]
        source: DecodeError,
    },
    #[error("unrecognized topic '{0}'")]
    UnrecognizedTopic(String),
}

/// Failure reported by the telemetry link collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("link is not connected")]
    NotConnected,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Failure while bringing the two activities up.
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("failed to spawn activity thread: {0}")]
    Spawn(#[from] std::io::Error),
}
