use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::buffer::FlushGroup;
use crate::config::ScheduleConfig;
use crate::utils::formatting::{format_count, format_duration, format_uptime};

pub mod flush;

pub use self::flush::{FlushOutcome, Flusher};

/// Drives one flush timer per group plus the heartbeat.
///
/// Group timers start staggered; the heartbeat is independent of them.
pub struct FlushScheduler {
    flusher: Arc<Flusher>,
    schedule: ScheduleConfig,
}

impl FlushScheduler {
    pub fn new(flusher: Arc<Flusher>, schedule: ScheduleConfig) -> Self {
        Self { flusher, schedule }
    }

    /// Runs until `shutdown` flips to `true` (or its sender is dropped), then
    /// waits for in-flight flushes and returns. No tick fires after that.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let mut timers = JoinSet::new();

        for group in FlushGroup::ALL {
            let first = self.schedule.first_flush_delay(group);
            let period = self.schedule.interval(group);
            info!(
                "scheduling {} flush every {} minutes, first in {}",
                group.as_str(),
                self.schedule.interval_minutes(group),
                format_duration(first)
            );
            timers.spawn(run_group(
                self.flusher.clone(),
                group,
                first,
                period,
                shutdown.clone(),
            ));
        }
        timers.spawn(heartbeat(
            self.flusher.clone(),
            self.schedule.heartbeat(),
            shutdown,
        ));

        while timers.join_next().await.is_some() {}
        info!("flush scheduler stopped");
    }
}

async fn run_group(
    flusher: Arc<Flusher>,
    group: FlushGroup,
    first: Duration,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(Instant::now() + first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight = JoinSet::new();
    let mut failures = 0;

    while !*shutdown.borrow() {
        tokio::select! {
            _ = ticker.tick() => {
                // Spawned so a slow sink cannot delay the next tick; the
                // flusher itself skips a tick that overlaps a running flush.
                let flusher = flusher.clone();
                in_flight.spawn(async move { flusher.flush(group).await });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => match joined {
                Ok(outcome) => track_failures(group, &mut failures, &outcome),
                Err(err) => error!("{} flush task ended abnormally: {err}", group.as_str()),
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    if !in_flight.is_empty() {
        info!(
            "waiting for {} in-flight {} flushes",
            in_flight.len(),
            group.as_str()
        );
    }
    while in_flight.join_next().await.is_some() {}
}

/// Counts consecutive failed flushes of `group`, warning while the streak
/// lasts and noting when it ends.
fn track_failures(group: FlushGroup, failures: &mut u32, outcome: &FlushOutcome) {
    match outcome {
        FlushOutcome::Flushed { rows, elapsed } => {
            if *failures > 0 {
                info!(
                    "{} flush recovered after {} failed attempts, {} rows in {}",
                    group.as_str(),
                    failures,
                    format_count(*rows),
                    format_duration(*elapsed)
                );
            }
            *failures = 0;
        }
        FlushOutcome::Failed { elapsed, error } => {
            *failures += 1;
            if *failures > 1 {
                warn!(
                    "{} flush has failed {} times in a row, last after {}: {error}",
                    group.as_str(),
                    failures,
                    format_duration(*elapsed)
                );
            }
        }
        FlushOutcome::Skipped | FlushOutcome::Empty => {}
    }
}

async fn heartbeat(flusher: Arc<Flusher>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let started = Instant::now();
    let mut ticker = time::interval_at(started + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !*shutdown.borrow() {
        tokio::select! {
            _ = ticker.tick() => {
                let pending = flusher.buffer().pending();
                debug!(
                    "heartbeat: up {}, {} rows pending (members={} updates={} counts={} details={} voice={} threads={} logins={})",
                    format_uptime(started.elapsed()),
                    format_count(pending.total()),
                    pending.members,
                    pending.member_updates,
                    pending.message_counts,
                    pending.message_details,
                    pending.voice_activity,
                    pending.threads,
                    pending.presence_logins,
                );
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
