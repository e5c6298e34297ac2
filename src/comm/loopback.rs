//! loopback.rs
//! In-process broker standing in for the network transport.
//!
//! `LoopbackLink` is the controller's end (implements `TelemetryLink`).
//! `BrokerHandle` is the peer's end: inject inbound messages, read retained
//! values, drop or restore the connection.

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::comm::link::{InboundMessage, TelemetryLink};
use crate::error::LinkError;

struct BrokerShared {
    connected: AtomicBool,
    retained: Mutex<HashMap<String, Vec<u8>>>,
    published: AtomicU64,
}

pub struct LoopbackLink {
    shared: Arc<BrokerShared>,
    rx: Receiver<InboundMessage>,
}

#[derive(Clone)]
pub struct BrokerHandle {
    shared: Arc<BrokerShared>,
    tx: Sender<InboundMessage>,
}

/// Create a connected broker pair.
pub fn loopback() -> (LoopbackLink, BrokerHandle) {
    let shared = Arc::new(BrokerShared {
        connected: AtomicBool::new(true),
        retained: Mutex::new(HashMap::new()),
        published: AtomicU64::new(0),
    });
    let (tx, rx) = unbounded();
    (
        LoopbackLink { shared: shared.clone(), rx },
        BrokerHandle { shared, tx },
    )
}

impl TelemetryLink for LoopbackLink {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    fn poll(&mut self, timeout: Duration) -> Option<InboundMessage> {
        if !self.is_connected() {
            return None;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retained: bool) -> Result<(), LinkError> {
        if !self.is_connected() {
            return Err(LinkError::NotConnected);
        }
        if retained {
            self.shared.retained.lock().insert(topic.to_string(), payload.to_vec());
        }
        self.shared.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl BrokerHandle {
    /// Queue a message for the controller. Messages sent while disconnected
    /// are held and delivered after reconnect.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        let _ = self.tx.send(InboundMessage::new(topic, payload));
    }

    pub fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn retained(&self, topic: &str) -> Option<Vec<u8>> {
        self.shared.retained.lock().get(topic).cloned()
    }

    /// Retained payload as text, for the numeric text topics.
    pub fn retained_text(&self, topic: &str) -> Option<String> {
        self.retained(topic).and_then(|b| String::from_utf8(b).ok())
    }

    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }
}
