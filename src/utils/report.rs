//! Periodic status summary built from the shared metrics and the latest snapshot.

use log::info;

use crate::control::state::ControlSnapshot;
use crate::utils::metrics::{Metrics, calculate_stats, calculate_stats_u64};

/// One-line summary of the loop, suitable for the log.
pub fn status_line(m: &Metrics, snap: &ControlSnapshot) -> String {
    let mut line = format!(
        "link={} sp={:.2} pv={:.2} out={:.3}% pos={:.1}deg k={} phase={:?} | periods={} run={} skipped={} misses={} updates={} rejected={} deferred={} tx_drop={} pub_fail={}",
        if snap.link_up { "up" } else { "down" },
        snap.signals.setpoint,
        snap.signals.process_variable,
        snap.memory.current_output,
        snap.degrees,
        snap.memory.sample_index,
        snap.memory.phase,
        m.periods,
        m.steps_run,
        m.steps_skipped,
        m.deadline_miss,
        m.updates_applied,
        m.messages_rejected,
        m.updates_deferred,
        m.telemetry_dropped,
        m.publish_failures,
    );

    if let Some(s) = calculate_stats(&m.output) {
        line.push_str(&format!(" | out[min={:.2} avg={:.2} max={:.2} n={}]", s.min, s.mean, s.max, s.count));
    }
    if let Some(s) = calculate_stats_u64(&m.jitter_us) {
        line.push_str(&format!(" | jitter_us[avg={:.0} max={:.0}]", s.mean, s.max));
    }
    line
}

pub fn log_status(m: &Metrics, snap: &ControlSnapshot) {
    info!("[Status] {}", status_line(m, snap));
}
