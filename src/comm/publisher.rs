//! publisher.rs
//! Outbound telemetry: control activity → communication activity → link.
//!
//! The control side hands over one sample per executed period with a
//! non-blocking `try_send`; a full queue drops the sample. The communication
//! side serializes it as retained numeric text. Publish failures are counted
//! and forgotten, there is no retry.

use crossbeam::channel::{Receiver, Sender};
use log::debug;

use crate::comm::link::TelemetryLink;
use crate::config::TopicConfig;
use crate::utils::metrics::{SharedMetrics, lock_metrics};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    pub sample_index: u64,
    pub degrees: f32,
    pub output: f32,
}

/// Control-side handle.
#[derive(Clone)]
pub struct TelemetrySender {
    tx: Sender<TelemetrySample>,
    metrics: SharedMetrics,
}

impl TelemetrySender {
    pub fn new(tx: Sender<TelemetrySample>, metrics: SharedMetrics) -> Self {
        Self { tx, metrics }
    }

    /// Never blocks the control step.
    pub fn send(&self, sample: TelemetrySample) {
        if let Err(err) = self.tx.try_send(sample) {
            lock_metrics(&self.metrics).telemetry_dropped += 1;
            debug!("[TelemetrySender] try_send failed: {:?}", err);
        }
    }
}

/// Position with one decimal, e.g. `135.1`.
pub fn format_position(degrees: f32) -> String {
    format!("{:.1}", degrees)
}

/// Output percentage with three decimals, e.g. `75.050`.
pub fn format_output(output: f32) -> String {
    format!("{:.3}", output)
}

/// Communication-side publisher.
pub struct TelemetryPublisher {
    rx: Receiver<TelemetrySample>,
    position_topic: String,
    output_topic: String,
    metrics: SharedMetrics,
}

impl TelemetryPublisher {
    pub fn new(rx: Receiver<TelemetrySample>, topics: &TopicConfig, metrics: SharedMetrics) -> Self {
        Self {
            rx,
            position_topic: topics.position.clone(),
            output_topic: topics.output.clone(),
            metrics,
        }
    }

    /// Publish one sample as two retained text messages.
    pub fn publish<L: TelemetryLink + ?Sized>(&self, link: &mut L, sample: &TelemetrySample) {
        let position = format_position(sample.degrees);
        let output = format_output(sample.output);

        for (topic, payload) in [(&self.position_topic, position), (&self.output_topic, output)] {
            if let Err(e) = link.publish(topic, payload.as_bytes(), true) {
                lock_metrics(&self.metrics).publish_failures += 1;
                debug!("[TelemetryPublisher] {} dropped: {}", topic, e);
            }
        }
    }

    /// Publish every queued sample. Returns how many were handled.
    pub fn flush<L: TelemetryLink + ?Sized>(&self, link: &mut L) -> usize {
        let mut n = 0;
        while let Ok(sample) = self.rx.try_recv() {
            self.publish(link, &sample);
            n += 1;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::loopback::loopback;
    use crossbeam::channel::bounded;

    #[test]
    fn formats() {
        assert_eq!(format_position(135.09), "135.1");
        assert_eq!(format_output(75.05), "75.050");
        assert_eq!(format_output(0.0), "0.000");
    }

    #[test]
    fn flush_publishes_retained_text() {
        let (tx, rx) = bounded(4);
        let metrics = SharedMetrics::default();
        let topics = TopicConfig::default();
        let sender = TelemetrySender::new(tx, metrics.clone());
        let publisher = TelemetryPublisher::new(rx, &topics, metrics);
        let (mut link, broker) = loopback();

        sender.send(TelemetrySample { sample_index: 1, degrees: 135.09, output: 75.05 });
        assert_eq!(publisher.flush(&mut link), 1);

        assert_eq!(broker.retained_text(&topics.position).as_deref(), Some("135.1"));
        assert_eq!(broker.retained_text(&topics.output).as_deref(), Some("75.050"));
    }

    #[test]
    fn failures_and_drops_are_absorbed() {
        let (tx, rx) = bounded(1);
        let metrics = SharedMetrics::default();
        let sender = TelemetrySender::new(tx, metrics.clone());
        let publisher = TelemetryPublisher::new(rx, &TopicConfig::default(), metrics.clone());
        let (mut link, broker) = loopback();

        let sample = TelemetrySample { sample_index: 1, degrees: 90.0, output: 50.0 };
        sender.send(sample);
        sender.send(sample);
        broker.set_connected(false);
        publisher.flush(&mut link);

        let m = lock_metrics(&metrics);
        assert_eq!(m.telemetry_dropped, 1);
        assert_eq!(m.publish_failures, 2);
    }
}
