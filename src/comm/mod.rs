// Communication side: everything the communication activity runs.
// Decodes inbound telemetry into validated updates and publishes controller state.
pub mod decoder;
pub mod dispatcher;
pub mod link;
pub mod loopback;
pub mod publisher;
