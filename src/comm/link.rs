//! link.rs
//! Contract with the publish/subscribe transport.
//!
//! Session setup, reconnects and broker discovery belong to whoever implements
//! `TelemetryLink`. The controller only asks whether the link is up, polls for
//! inbound messages and hands over outbound payloads.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crate::error::LinkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self { topic: topic.into(), payload: payload.into() }
    }
}

pub trait TelemetryLink: Send {
    fn is_connected(&self) -> bool;

    /// Next inbound message, waiting at most `timeout`.
    fn poll(&mut self, timeout: Duration) -> Option<InboundMessage>;

    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), LinkError>;
}

/// Link health as seen by the control activity.
/// Written by the communication activity after each health check.
#[derive(Clone, Default)]
pub struct LinkStatus {
    up: Arc<AtomicBool>,
}

impl LinkStatus {
    pub fn new(up: bool) -> Self {
        Self { up: Arc::new(AtomicBool::new(up)) }
    }

    #[inline]
    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }

    /// Returns the previous value.
    #[inline]
    pub fn set(&self, up: bool) -> bool {
        self.up.swap(up, Ordering::AcqRel)
    }
}
