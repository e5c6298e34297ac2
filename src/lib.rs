//! Temperature valve PI controller.
//!
//! A fixed-period control activity runs a discrete PI law and drives a servo
//! valve. A communication activity decodes tuning, setpoint and measurement
//! messages from a telemetry link and publishes the valve position and output.

pub mod comm;
pub mod config;
pub mod control;
pub mod error;
pub mod scheduler;
pub mod sim;
pub mod utils;
