//! Metrics collection and event recording for the controller.
//!
//! Two independent paths:
//! - **EventRecorder:** lock-free queue (16K capacity) → optional background CSV export.
//! - **Metrics:** shared counters plus capped histories (1000 points) for status reporting.
//!
//! Event trace per period: updates applied → step complete / skipped → telemetry sent.

use std::{
    collections::VecDeque,
    fs::File,
    io::BufWriter,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use serde::Serialize;

/// Control lifecycle events. Every variant carries a nanosecond timestamp.
#[derive(Debug, Clone)]
pub enum Event {
    /// Control step executed and actuator driven.
    StepComplete {
        seq: u64,
        ts_ns: u64,
        output: f32,
        degrees: f32,
        exec_us: u64,
    },
    /// Period skipped because the link was down.
    StepSkipped { seq: u64, ts_ns: u64 },
    /// One-shot warm start fired.
    WarmStart { seq: u64, ts_ns: u64 },
    /// Validated update taken from the message path.
    UpdateApplied { ts_ns: u64, input: &'static str, value: f32 },
    /// Inbound message dropped (bad payload, bad tuning, unknown topic).
    MessageRejected { ts_ns: u64, reason: String },
    /// Period started after its scheduled release.
    DeadlineMiss { seq: u64, ts_ns: u64, late_us: u64 },
}

#[derive(Debug, Serialize)]
struct EventRow<'a> {
    seq: u64,
    ts_ns: u64,
    event: &'a str,
    value: f64,
    detail: String,
}

impl Event {
    fn to_row(&self) -> EventRow<'_> {
        match self {
            Event::StepComplete { seq, ts_ns, output, degrees, exec_us } => EventRow {
                seq: *seq,
                ts_ns: *ts_ns,
                event: "StepComplete",
                value: *output as f64,
                detail: format!("degrees={:.2};exec_us={}", degrees, exec_us),
            },
            Event::StepSkipped { seq, ts_ns } => EventRow {
                seq: *seq,
                ts_ns: *ts_ns,
                event: "StepSkipped",
                value: 0.0,
                detail: String::new(),
            },
            Event::WarmStart { seq, ts_ns } => EventRow {
                seq: *seq,
                ts_ns: *ts_ns,
                event: "WarmStart",
                value: 0.0,
                detail: String::new(),
            },
            Event::UpdateApplied { ts_ns, input, value } => EventRow {
                seq: 0,
                ts_ns: *ts_ns,
                event: "UpdateApplied",
                value: *value as f64,
                detail: input.to_string(),
            },
            Event::MessageRejected { ts_ns, reason } => EventRow {
                seq: 0,
                ts_ns: *ts_ns,
                event: "MessageRejected",
                value: 0.0,
                detail: reason.clone(),
            },
            Event::DeadlineMiss { seq, ts_ns, late_us } => EventRow {
                seq: *seq,
                ts_ns: *ts_ns,
                event: "DeadlineMiss",
                value: *late_us as f64,
                detail: String::new(),
            },
        }
    }
}

const EVENT_QUEUE_CAPACITY: usize = 16_384;
const EXPORT_POLL_MS: u64 = 10;
const FLUSH_BATCHES: usize = 8;

/// Non-blocking event recorder.
///
/// `record()` pushes onto a lock-free queue and returns immediately; if the
/// queue is full the event is dropped. `start_exporter()` drains it to CSV.
#[derive(Clone)]
pub struct EventRecorder {
    queue: Arc<ArrayQueue<Event>>,
    run_start: Instant,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(EVENT_QUEUE_CAPACITY)),
            run_start: Instant::now(),
        }
    }

    #[inline]
    pub fn record(&self, event: Event) {
        let _ = self.queue.push(event);
    }

    /// Nanoseconds since recorder creation.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.run_start.elapsed().as_nanos() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Take everything currently queued (used when no exporter is running).
    pub fn drain(&self) -> Vec<Event> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(e) = self.queue.pop() {
            out.push(e);
        }
        out
    }

    /// Background thread draining the queue into a CSV file while `running` holds.
    pub fn start_exporter(
        &self,
        output_csv: String,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<thread::JoinHandle<()>> {
        let queue = self.queue.clone();

        thread::Builder::new().name("event-export".into()).spawn(move || {
            let file = match File::create(&output_csv) {
                Ok(f) => f,
                Err(e) => {
                    error!("Failed to create event CSV {}: {}", output_csv, e);
                    return;
                }
            };
            let mut wtr = Writer::from_writer(BufWriter::new(file));
            let mut flush_counter = 0usize;

            while running.load(Ordering::Acquire) {
                let mut any = false;
                while let Some(event) = queue.pop() {
                    any = true;
                    if let Err(e) = wtr.serialize(event.to_row()) {
                        debug!("[EventRecorder] row dropped: {}", e);
                    }
                }
                if any {
                    flush_counter += 1;
                    if flush_counter >= FLUSH_BATCHES {
                        let _ = wtr.flush();
                        flush_counter = 0;
                    }
                } else {
                    thread::sleep(Duration::from_millis(EXPORT_POLL_MS));
                }
            }

            while let Some(event) = queue.pop() {
                let _ = wtr.serialize(event.to_row());
            }
            let _ = wtr.flush();
        })
    }
}

/// Counters and recent history of the control loop.
#[derive(Default, Clone, Debug)]
pub struct Metrics {
    /// Logical output and servo angle (last 1000 steps)
    pub output: VecDeque<f64>,
    pub degrees: VecDeque<f64>,
    /// Release jitter of the control activity (microseconds)
    pub jitter_us: VecDeque<u64>,

    pub periods: u64,
    pub steps_run: u64,
    pub steps_skipped: u64,
    pub deadline_miss: u64,

    pub updates_applied: u64,
    pub messages_rejected: u64,
    /// Updates parked in a latest-value slot because the queue was full.
    pub updates_deferred: u64,
    pub telemetry_dropped: u64,
    pub publish_failures: u64,
}

pub type SharedMetrics = Arc<Mutex<Metrics>>;

/// Lock metrics, recovering from a poisoned mutex.
#[inline]
pub fn lock_metrics(metrics: &SharedMetrics) -> std::sync::MutexGuard<'_, Metrics> {
    match metrics.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub const MAX_POINTS: usize = 1_000;

/// Appends value; drops the oldest when at capacity.
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Clone)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

pub fn calculate_stats(data: &VecDeque<f64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_buffer_keeps_latest() {
        let mut buf = VecDeque::new();
        for i in 0..(MAX_POINTS + 10) {
            push_capped(&mut buf, i as f64);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(buf.front().copied(), Some(10.0));
    }

    #[test]
    fn stats_of_history() {
        let data: VecDeque<f64> = [1.0, 2.0, 6.0].into_iter().collect();
        let s = calculate_stats(&data).unwrap();
        assert_eq!((s.min, s.max, s.mean, s.count), (1.0, 6.0, 3.0, 3));
        assert!(calculate_stats_u64(&VecDeque::new()).is_none());
    }

    #[test]
    fn recorder_drains_in_order() {
        let rec = EventRecorder::new();
        rec.record(Event::StepSkipped { seq: 1, ts_ns: rec.now_ns() });
        rec.record(Event::WarmStart { seq: 5, ts_ns: rec.now_ns() });
        let events = rec.drain();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::StepSkipped { seq: 1, .. }));
        assert!(rec.is_empty());
    }

    #[test]
    fn exporter_writes_csv() {
        let path = std::env::temp_dir().join(format!("valve_events_{}.csv", std::process::id()));
        let rec = EventRecorder::new();
        let running = Arc::new(AtomicBool::new(true));
        rec.record(Event::StepComplete { seq: 1, ts_ns: 10, output: 75.05, degrees: 135.09, exec_us: 3 });

        let handle = rec
            .start_exporter(path.to_string_lossy().into_owned(), running.clone())
            .unwrap();
        running.store(false, Ordering::Release);
        handle.join().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("seq,ts_ns,event,value,detail"));
        assert!(text.contains("StepComplete"));
        let _ = std::fs::remove_file(&path);
    }
}
