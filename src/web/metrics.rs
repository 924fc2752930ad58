use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::PendingCounts;

static EVENTS_RECEIVED: AtomicU64 = AtomicU64::new(0);
static EVENTS_RECORDED: AtomicU64 = AtomicU64::new(0);
static EVENTS_DISCARDED: AtomicU64 = AtomicU64::new(0);
static EVENTS_FAILED: AtomicU64 = AtomicU64::new(0);
static FLUSHES_SUCCEEDED: AtomicU64 = AtomicU64::new(0);
static FLUSHES_FAILED: AtomicU64 = AtomicU64::new(0);
static FLUSHES_SKIPPED: AtomicU64 = AtomicU64::new(0);
static FLUSHES_EMPTY: AtomicU64 = AtomicU64::new(0);
static ROWS_FLUSHED: AtomicU64 = AtomicU64::new(0);

/// Process-wide counters exported on `/metrics`.
pub struct Metrics;

impl Metrics {
    pub fn event_received() {
        EVENTS_RECEIVED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_recorded() {
        EVENTS_RECORDED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_discarded() {
        EVENTS_DISCARDED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_failed() {
        EVENTS_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush_succeeded(rows: usize) {
        FLUSHES_SUCCEEDED.fetch_add(1, Ordering::Relaxed);
        ROWS_FLUSHED.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn flush_failed() {
        FLUSHES_FAILED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush_skipped() {
        FLUSHES_SKIPPED.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush_empty() {
        FLUSHES_EMPTY.fetch_add(1, Ordering::Relaxed);
    }
}

fn write_metric(out: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
    let _ = writeln!(out, "{name} {value}\n");
}

pub fn format_prometheus(uptime_seconds: u64, pending: Option<PendingCounts>) -> String {
    let mut out = String::new();
    write_metric(
        &mut out,
        "collector_uptime_seconds",
        "gauge",
        "Number of seconds the collector has been running",
        uptime_seconds,
    );

    let counters = [
        ("events_received_total", "Gateway events received", &EVENTS_RECEIVED),
        ("events_recorded_total", "Events that produced buffer rows", &EVENTS_RECORDED),
        ("events_discarded_total", "Events dropped by filtering rules", &EVENTS_DISCARDED),
        ("events_failed_total", "Events that failed classification", &EVENTS_FAILED),
        ("flushes_succeeded_total", "Flushes written to the warehouse", &FLUSHES_SUCCEEDED),
        ("flushes_failed_total", "Flushes rejected by the warehouse", &FLUSHES_FAILED),
        ("flushes_skipped_total", "Ticks skipped while a flush was running", &FLUSHES_SKIPPED),
        ("flushes_empty_total", "Ticks with nothing to flush", &FLUSHES_EMPTY),
        ("rows_flushed_total", "Rows written to the warehouse", &ROWS_FLUSHED),
    ];
    for (name, help, counter) in counters {
        write_metric(&mut out, name, "counter", help, counter.load(Ordering::Relaxed));
    }

    if let Some(pending) = pending {
        let _ = writeln!(out, "# HELP pending_rows Rows buffered and not yet flushed");
        let _ = writeln!(out, "# TYPE pending_rows gauge");
        for (category, rows) in [
            ("members", pending.members),
            ("member_updates", pending.member_updates),
            ("message_counts", pending.message_counts),
            ("message_details", pending.message_details),
            ("voice_activity", pending.voice_activity),
            ("threads", pending.threads),
            ("presence_logins", pending.presence_logins),
        ] {
            let _ = writeln!(out, "pending_rows{{category=\"{category}\"}} {rows}");
        }
    }

    out
}
