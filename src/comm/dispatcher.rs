//! dispatcher.rs
//! Inbound message path: topic → input tag → decoded value → validated update.
//!
//! Runs on the communication activity. Tuning values go through the
//! coefficient engine here, synchronously, so what reaches the control
//! activity is always a consistent (tuning, coefficients) pair.
//!
//! The update queue is bounded. An update that does not fit is held in a
//! latest-value slot for its kind (tuning, setpoint, process variable) and
//! re-offered every service iteration; a newer value of the same kind
//! replaces it. The last validated value of each input always arrives.

use crossbeam::channel::{Sender, TrySendError};
use log::{debug, warn};
use std::{collections::HashMap, sync::Arc};

use crate::comm::decoder::{self, InputTag};
use crate::config::{ControllerConfig, TopicConfig};
use crate::control::coefficients::{CoefficientEngine, TuningParameters};
use crate::control::state::ControlUpdate;
use crate::error::ControlError;
use crate::utils::metrics::{Event, EventRecorder, SharedMetrics, lock_metrics};

/// Topic name → logical input.
#[derive(Debug, Clone)]
pub struct TopicMap {
    inputs: HashMap<String, InputTag>,
}

impl TopicMap {
    pub fn from_config(topics: &TopicConfig) -> Self {
        let inputs = [
            (topics.gain.clone(), InputTag::ProportionalGain),
            (topics.integral_time.clone(), InputTag::IntegralTime),
            (topics.setpoint.clone(), InputTag::Setpoint),
            (topics.process_variable.clone(), InputTag::ProcessVariable),
        ]
        .into_iter()
        .collect();
        Self { inputs }
    }

    pub fn lookup(&self, topic: &str) -> Option<InputTag> {
        self.inputs.get(topic).copied()
    }
}

/// Updates that did not fit in the queue, newest per kind.
#[derive(Debug, Default)]
struct HeldUpdates {
    tuning: Option<ControlUpdate>,
    setpoint: Option<ControlUpdate>,
    process_variable: Option<ControlUpdate>,
}

impl HeldUpdates {
    fn slot(&mut self, update: &ControlUpdate) -> &mut Option<ControlUpdate> {
        match update {
            ControlUpdate::Tuning { .. } => &mut self.tuning,
            ControlUpdate::Setpoint(_) => &mut self.setpoint,
            ControlUpdate::ProcessVariable(_) => &mut self.process_variable,
        }
    }

    fn is_empty(&self) -> bool {
        self.tuning.is_none() && self.setpoint.is_none() && self.process_variable.is_none()
    }
}

pub struct MessageDispatcher {
    topics: TopicMap,
    engine: CoefficientEngine,
    tx: Sender<ControlUpdate>,
    held: HeldUpdates,
    metrics: SharedMetrics,
    event_recorder: Arc<EventRecorder>,
}

impl MessageDispatcher {
    pub fn new(
        cfg: &ControllerConfig,
        tx: Sender<ControlUpdate>,
        metrics: SharedMetrics,
        event_recorder: Arc<EventRecorder>,
    ) -> Result<Self, ControlError> {
        let tuning = TuningParameters::new(cfg.default_gain, cfg.default_integral_time_s)?;
        Ok(Self {
            topics: TopicMap::from_config(&cfg.topics),
            engine: CoefficientEngine::new(tuning, cfg.sample_period_s())?,
            tx,
            held: HeldUpdates::default(),
            metrics,
            event_recorder,
        })
    }

    pub fn engine(&self) -> &CoefficientEngine {
        &self.engine
    }

    /// Handle one inbound message. On error nothing downstream changes.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) -> Result<(InputTag, f32), ControlError> {
        let result = self.route(topic, payload);
        if let Err(e) = &result {
            warn!("[Dispatcher] {}", e);
            lock_metrics(&self.metrics).messages_rejected += 1;
            self.event_recorder.record(Event::MessageRejected {
                ts_ns: self.event_recorder.now_ns(),
                reason: e.to_string(),
            });
        }
        result
    }

    fn route(&mut self, topic: &str, payload: &[u8]) -> Result<(InputTag, f32), ControlError> {
        let tag = self
            .topics
            .lookup(topic)
            .ok_or_else(|| ControlError::UnrecognizedTopic(topic.to_string()))?;

        let (value, encoding) = decoder::decode(payload).map_err(|source| ControlError::UndecodableMessage {
            topic: topic.to_string(),
            source,
        })?;
        debug!("[Dispatcher] {} = {} ({:?})", tag.name(), value, encoding);

        let update = match tag {
            InputTag::ProportionalGain => {
                let coefficients = self.engine.set_gain(value)?;
                ControlUpdate::Tuning { tuning: self.engine.tuning(), coefficients }
            }
            InputTag::IntegralTime => {
                let coefficients = self.engine.set_integral_time(value)?;
                ControlUpdate::Tuning { tuning: self.engine.tuning(), coefficients }
            }
            InputTag::Setpoint => ControlUpdate::Setpoint(value),
            InputTag::ProcessVariable => ControlUpdate::ProcessVariable(value),
        };

        self.enqueue(update);
        Ok((tag, value))
    }

    fn enqueue(&mut self, update: ControlUpdate) {
        // a newer value supersedes whatever of the same kind is still held
        *self.held.slot(&update) = None;
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                lock_metrics(&self.metrics).updates_deferred += 1;
                debug!("[Dispatcher] update queue full, holding {:?}", update);
                *self.held.slot(&update) = Some(update);
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("[Dispatcher] control activity gone, update discarded");
            }
        }
    }

    /// Re-offer held updates. Called once per service iteration.
    pub fn flush_pending(&mut self) {
        let HeldUpdates { tuning, setpoint, process_variable } = &mut self.held;
        for slot in [tuning, setpoint, process_variable] {
            let Some(update) = slot.take() else { continue };
            match self.tx.try_send(update) {
                Ok(()) => debug!("[Dispatcher] held {:?} delivered", update),
                Err(TrySendError::Full(update)) => {
                    *slot = Some(update);
                    break;
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.held.is_empty()
    }
}
