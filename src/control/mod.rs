//! Control side: runs once per period on the control activity.
//! Coefficient engine, control state, PI law and the servo driver.
pub mod actuator;
pub mod coefficients;
pub mod law;
pub mod state;
