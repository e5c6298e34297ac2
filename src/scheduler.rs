//! scheduler.rs
//! The two activities and the harness that starts them.
//!
//! - **Control activity:** fixed period, absolute-time releases (`next += period`),
//!   so an overrun never shifts the schedule. Each period it drains validated
//!   updates, then steps the law only if the link is up. With the link down the
//!   controller freezes: no step, no actuator write, no telemetry.
//! - **Communication activity:** loops forever; health check, inbound service,
//!   outbound telemetry, short sleep.
//!
//! The activities share no mutable state except the link flag. Updates flow
//! one way over a bounded channel, telemetry the other way.

use crossbeam::channel::{Receiver, bounded};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::comm::{
    dispatcher::MessageDispatcher,
    link::{LinkStatus, TelemetryLink},
    publisher::{TelemetryPublisher, TelemetrySample, TelemetrySender},
};
use crate::config::ControllerConfig;
use crate::control::{
    actuator::Actuator,
    law::{ControlLaw, Controller, StepOutcome},
    state::{ControlSnapshot, ControlState, ControlUpdate},
};
use crate::error::{ControlError, StartError};
use crate::utils::metrics::{
    Event, EventRecorder, SharedMetrics, lock_metrics, push_capped, push_capped_u64,
};

/// Inbound messages handled per service iteration before yielding.
const MAX_MESSAGES_PER_ITERATION: usize = 64;

pub type SharedSnapshot = Arc<RwLock<ControlSnapshot>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PeriodOutcome {
    Stepped(StepOutcome),
    /// Link down: state held as it was.
    Skipped,
}

pub struct ControlActivity<A: Actuator> {
    state: ControlState,
    controller: Controller<A>,
    updates: Receiver<ControlUpdate>,
    telemetry: TelemetrySender,
    link: LinkStatus,
    snapshot: SharedSnapshot,
    metrics: SharedMetrics,
    event_recorder: Arc<EventRecorder>,
    period: Duration,
    period_seq: u64,
}

impl<A: Actuator> ControlActivity<A> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &ControllerConfig,
        actuator: A,
        updates: Receiver<ControlUpdate>,
        telemetry: TelemetrySender,
        link: LinkStatus,
        snapshot: SharedSnapshot,
        metrics: SharedMetrics,
        event_recorder: Arc<EventRecorder>,
    ) -> Result<Self, ControlError> {
        let state = ControlState::from_config(cfg)?;
        let mut controller = Controller::new(ControlLaw::from_config(cfg), actuator);
        // park the servo at the preloaded output before the first period
        controller.hold(&state);
        *snapshot.write() = state.snapshot();

        Ok(Self {
            state,
            controller,
            updates,
            telemetry,
            link,
            snapshot,
            metrics,
            event_recorder,
            period: cfg.sample_period(),
            period_seq: 0,
        })
    }

    pub fn state(&self) -> &ControlState {
        &self.state
    }

    pub fn actuator(&self) -> &A {
        self.controller.actuator()
    }

    /// Apply every update queued since the last period.
    pub fn apply_pending_updates(&mut self) -> usize {
        let mut n = 0;
        while let Ok(update) = self.updates.try_recv() {
            let (input, value) = match update {
                // a tuning update changes one parameter; report that one
                ControlUpdate::Tuning { tuning, .. }
                    if tuning.integral_time_s != self.state.tuning.integral_time_s =>
                {
                    ("integral_time", tuning.integral_time_s)
                }
                ControlUpdate::Tuning { tuning, .. } => ("gain", tuning.proportional_gain),
                ControlUpdate::Setpoint(v) => ("setpoint", v),
                ControlUpdate::ProcessVariable(v) => ("process_variable", v),
            };
            self.state.apply(update);
            self.event_recorder.record(Event::UpdateApplied {
                ts_ns: self.event_recorder.now_ns(),
                input,
                value,
            });
            n += 1;
        }
        if n > 0 {
            lock_metrics(&self.metrics).updates_applied += n as u64;
        }
        n
    }

    /// Everything one period does, without the waiting.
    pub fn run_period(&mut self) -> PeriodOutcome {
        let start = Instant::now();
        self.period_seq += 1;
        self.apply_pending_updates();

        let link_up = self.link.is_up();
        let outcome = if link_up {
            let step = self.controller.step(&mut self.state);
            self.telemetry.send(TelemetrySample {
                sample_index: step.sample_index,
                degrees: step.degrees,
                output: step.output,
            });

            let ts_ns = self.event_recorder.now_ns();
            if step.warm_started {
                self.event_recorder.record(Event::WarmStart { seq: step.sample_index, ts_ns });
            }
            self.event_recorder.record(Event::StepComplete {
                seq: step.sample_index,
                ts_ns,
                output: step.output,
                degrees: step.degrees,
                exec_us: start.elapsed().as_micros() as u64,
            });
            PeriodOutcome::Stepped(step)
        } else {
            debug!("[ControlActivity] link down, holding output {:.3}", self.state.memory.current_output);
            self.event_recorder.record(Event::StepSkipped {
                seq: self.period_seq,
                ts_ns: self.event_recorder.now_ns(),
            });
            PeriodOutcome::Skipped
        };

        {
            let mut m = lock_metrics(&self.metrics);
            m.periods += 1;
            match &outcome {
                PeriodOutcome::Stepped(step) => {
                    m.steps_run += 1;
                    push_capped(&mut m.output, step.output as f64);
                    push_capped(&mut m.degrees, step.degrees as f64);
                }
                PeriodOutcome::Skipped => m.steps_skipped += 1,
            }
        }

        let mut snap = self.state.snapshot();
        snap.link_up = link_up;
        *self.snapshot.write() = snap;

        outcome
    }

    fn record_deadline_miss(&mut self, late: Duration) {
        let late_us = late.as_micros() as u64;
        warn!("[ControlActivity] release {} late by {} us", self.period_seq + 1, late_us);
        lock_metrics(&self.metrics).deadline_miss += 1;
        self.event_recorder.record(Event::DeadlineMiss {
            seq: self.period_seq + 1,
            ts_ns: self.event_recorder.now_ns(),
            late_us,
        });
    }

    /// Periodic loop. Releases are computed from the start time, not from wake-ups.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let period_us = self.period.as_micros() as u64;

        let mut schedule = ReleaseSchedule::new(Instant::now(), self.period);
        let mut last_release = Instant::now();

        while running.load(Ordering::Acquire) {
            match schedule.check(Instant::now()) {
                Release::Wait(d) => sleeper.sleep(d),
                // previous period overran
                Release::Late(late) => self.record_deadline_miss(late),
            }

            let release = Instant::now();
            let actual_us = release.duration_since(last_release).as_micros() as u64;
            last_release = release;
            push_capped_u64(&mut lock_metrics(&self.metrics).jitter_us, actual_us.abs_diff(period_us));

            self.run_period();

            schedule.advance();
        }

        debug!("[ControlActivity] stopped after {} periods.", self.period_seq);
    }
}

/// Where a wake-up sits relative to the pending release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Release still ahead: sleep this long.
    Wait(Duration),
    /// Release already passed by this much: a deadline miss.
    Late(Duration),
}

/// Absolute release grid `start + k * period`, k = 1, 2, ...
///
/// Releases only ever move by `advance`, never relative to when the loop
/// woke up, so an overrun does not shift later releases.
#[derive(Debug, Clone, Copy)]
pub struct ReleaseSchedule {
    next: Instant,
    period: Duration,
}

impl ReleaseSchedule {
    pub fn new(start: Instant, period: Duration) -> Self {
        Self { next: start + period, period }
    }

    pub fn next_release(&self) -> Instant {
        self.next
    }

    pub fn check(&self, now: Instant) -> Release {
        if now <= self.next {
            Release::Wait(self.next - now)
        } else {
            Release::Late(now - self.next)
        }
    }

    pub fn advance(&mut self) {
        self.next += self.period;
    }
}

pub struct CommunicationActivity<L: TelemetryLink> {
    link: L,
    dispatcher: MessageDispatcher,
    publisher: TelemetryPublisher,
    link_status: LinkStatus,
    poll_interval: Duration,
}

impl<L: TelemetryLink> CommunicationActivity<L> {
    pub fn new(
        link: L,
        dispatcher: MessageDispatcher,
        publisher: TelemetryPublisher,
        link_status: LinkStatus,
        poll_interval: Duration,
    ) -> Self {
        Self { link, dispatcher, publisher, link_status, poll_interval }
    }

    /// One iteration: health check, inbound, outbound. Returns inbound messages handled.
    pub fn service_once(&mut self) -> usize {
        let up = self.link.is_connected();
        let was_up = self.link_status.set(up);
        if up != was_up {
            if up {
                info!("[CommunicationActivity] link established");
            } else {
                warn!("[CommunicationActivity] link lost, control steps suspended");
            }
        }
        if !up {
            return 0;
        }

        self.dispatcher.flush_pending();

        let mut handled = 0;
        while handled < MAX_MESSAGES_PER_ITERATION {
            let Some(msg) = self.link.poll(Duration::ZERO) else { break };
            // rejections are logged and counted by the dispatcher
            let _ = self.dispatcher.on_message(&msg.topic, &msg.payload);
            handled += 1;
        }

        self.publisher.flush(&mut self.link);
        handled
    }

    pub fn run(mut self, running: Arc<AtomicBool>) {
        while running.load(Ordering::Acquire) {
            self.service_once();
            thread::sleep(self.poll_interval);
        }
        debug!("[CommunicationActivity] stopped.");
    }
}

/// Both activities running on their own threads.
pub struct ControlSystem {
    running: Arc<AtomicBool>,
    control: JoinHandle<()>,
    comm: JoinHandle<()>,
    exporter: Option<JoinHandle<()>>,
    snapshot: SharedSnapshot,
    metrics: SharedMetrics,
}

impl ControlSystem {
    pub fn start<L, A>(cfg: &ControllerConfig, link: L, actuator: A) -> Result<Self, StartError>
    where
        L: TelemetryLink + 'static,
        A: Actuator + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let metrics = SharedMetrics::default();
        let event_recorder = Arc::new(EventRecorder::new());
        let link_status = LinkStatus::new(false);

        let (update_tx, update_rx) = bounded::<ControlUpdate>(cfg.update_capacity);
        let (telemetry_tx, telemetry_rx) = bounded::<TelemetrySample>(cfg.telemetry_capacity);

        let initial = ControlState::from_config(cfg)?.snapshot();
        let snapshot: SharedSnapshot = Arc::new(RwLock::new(initial));

        let control = ControlActivity::new(
            cfg,
            actuator,
            update_rx,
            TelemetrySender::new(telemetry_tx, metrics.clone()),
            link_status.clone(),
            snapshot.clone(),
            metrics.clone(),
            event_recorder.clone(),
        )?;
        let dispatcher = MessageDispatcher::new(cfg, update_tx, metrics.clone(), event_recorder.clone())?;
        let publisher = TelemetryPublisher::new(telemetry_rx, &cfg.topics, metrics.clone());
        let comm = CommunicationActivity::new(
            link,
            dispatcher,
            publisher,
            link_status.clone(),
            cfg.comm_poll_interval(),
        );

        let exporter = match &cfg.event_log {
            Some(path) => Some(event_recorder.start_exporter(path.clone(), running.clone())?),
            None => None,
        };

        let comm_running = running.clone();
        let comm = stop_on_spawn_error(
            &running,
            thread::Builder::new()
                .name("comm".into())
                .spawn(move || comm.run(comm_running)),
        )?;

        let control_running = running.clone();
        let control_core = cfg.control_core;
        let spawned = thread::Builder::new()
            .name("control".into())
            .spawn_with_priority(ThreadPriority::Max, move |prio| {
                if let Err(e) = prio {
                    debug!("[ControlSystem] running control thread at default priority: {:?}", e);
                }
                if let Some(core) = control_core {
                    pin_to_core(core);
                }
                control.run(control_running);
            });
        let control = stop_on_spawn_error(&running, spawned)?;

        info!(
            "[ControlSystem] started: Tm={} ms, Kp={}, Ti={} s",
            cfg.sample_period_ms, cfg.default_gain, cfg.default_integral_time_s
        );

        Ok(Self {
            running,
            control,
            comm,
            exporter,
            snapshot,
            metrics,
        })
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        *self.snapshot.read()
    }

    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Block on the activities. They never finish in production.
    pub fn join(self) {
        let _ = self.control.join();
        let _ = self.comm.join();
        if let Some(h) = self.exporter {
            let _ = h.join();
        }
    }

    /// Stop both activities and wait for them. Test and tooling harnesses only.
    pub fn stop(self) {
        self.running.store(false, Ordering::Release);
        self.join();
    }
}

/// Threads started before a failed spawn see `running == false` and exit.
fn stop_on_spawn_error<T>(running: &AtomicBool, spawned: std::io::Result<T>) -> std::io::Result<T> {
    if let Err(e) = &spawned {
        error!("[ControlSystem] failed to spawn activity thread: {}", e);
        running.store(false, Ordering::Release);
    }
    spawned
}

fn pin_to_core(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(id) if core_affinity::set_for_current(*id) => info!("control thread pinned to core {}", core),
        Some(_) => error!("Failed to pin control thread to core {}", core),
        None => error!("Core {} not found among available cores", core),
    }
}
