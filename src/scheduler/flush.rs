use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::buffer::{AggregationBuffer, FlushGroup, Snapshot, dedup_presence_logins};
use crate::utils::formatting::format_duration;
use crate::warehouse::{AppendRows, MergeRows, Table, TableNames, WarehouseError, WarehouseSink};
use crate::web::metrics::Metrics;

#[derive(Debug)]
pub enum FlushOutcome {
    /// A flush for the same group was still running.
    Skipped,
    /// Nothing buffered; the sink was not called.
    Empty,
    Flushed { rows: usize, elapsed: Duration },
    /// Buffer left untouched for the next tick.
    Failed {
        elapsed: Duration,
        error: WarehouseError,
    },
}

/// Awaits `fut` and reports how long it took.
pub async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let started = Instant::now();
    let output = fut.await;
    (output, started.elapsed())
}

/// Marks a group as running until dropped.
struct RunGuard<'a> {
    running: &'a Mutex<HashSet<FlushGroup>>,
    group: FlushGroup,
}

impl<'a> RunGuard<'a> {
    fn try_begin(running: &'a Mutex<HashSet<FlushGroup>>, group: FlushGroup) -> Option<Self> {
        if running.lock().insert(group) {
            Some(RunGuard { running, group })
        } else {
            None
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.lock().remove(&self.group);
    }
}

/// Moves one group at a time from the buffer into the warehouse.
pub struct Flusher {
    buffer: Arc<AggregationBuffer>,
    sink: Arc<dyn WarehouseSink>,
    tables: TableNames,
    running: Mutex<HashSet<FlushGroup>>,
}

impl Flusher {
    pub fn new(
        buffer: Arc<AggregationBuffer>,
        sink: Arc<dyn WarehouseSink>,
        tables: TableNames,
    ) -> Self {
        Self {
            buffer,
            sink,
            tables,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn buffer(&self) -> &Arc<AggregationBuffer> {
        &self.buffer
    }

    #[cfg(test)]
    pub fn is_running(&self, group: FlushGroup) -> bool {
        self.running.lock().contains(&group)
    }

    /// Snapshot, write, and on success release exactly what was written.
    ///
    /// Never holds the buffer lock across the sink call and never returns an
    /// error: failures are logged and the rows stay buffered.
    pub async fn flush(&self, group: FlushGroup) -> FlushOutcome {
        let Some(_guard) = RunGuard::try_begin(&self.running, group) else {
            debug!("{} flush still in progress, skipping tick", group.as_str());
            Metrics::flush_skipped();
            return FlushOutcome::Skipped;
        };

        let snapshot = self.buffer.snapshot(group);
        if snapshot.is_empty() {
            debug!("no {} data to flush", group.as_str());
            Metrics::flush_empty();
            return FlushOutcome::Empty;
        }

        let (result, elapsed) = timed(self.write(&snapshot)).await;
        match result {
            Ok(rows) => {
                self.buffer.release(&snapshot);
                info!(
                    "{} flush completed in {}: {rows} rows written",
                    group.as_str(),
                    format_duration(elapsed)
                );
                Metrics::flush_succeeded(rows);
                FlushOutcome::Flushed { rows, elapsed }
            }
            Err(error) => {
                error!(
                    "{} flush failed after {}, keeping {} rows for retry: {error}",
                    group.as_str(),
                    format_duration(elapsed),
                    snapshot.row_count()
                );
                Metrics::flush_failed();
                FlushOutcome::Failed { elapsed, error }
            }
        }
    }

    async fn write(&self, snapshot: &Snapshot) -> Result<usize, WarehouseError> {
        match snapshot {
            Snapshot::Members {
                identities,
                updates,
            } => {
                let table = self.tables.name(Table::Members);
                let mut written = 0;
                // Identities go first so updates can patch rows created in the same cycle.
                if !identities.is_empty() {
                    written += self
                        .sink
                        .merge(&table, MergeRows::Members(identities.clone()))
                        .await?;
                }
                if !updates.is_empty() {
                    written += self.sink.update_fields(&table, updates.clone()).await?;
                }
                Ok(written)
            }
            Snapshot::Messages { counts, details } => {
                let mut written = 0;
                if !counts.is_empty() {
                    written += self
                        .sink
                        .merge(
                            &self.tables.name(Table::MessageCounts),
                            MergeRows::MessageCounts(counts.clone()),
                        )
                        .await?;
                }
                if !details.is_empty() {
                    written += self
                        .sink
                        .append(
                            &self.tables.name(Table::MessageDetails),
                            AppendRows::MessageDetails(details.clone()),
                        )
                        .await?;
                }
                Ok(written)
            }
            Snapshot::Voice(rows) => {
                self.sink
                    .merge(
                        &self.tables.name(Table::VoiceActivity),
                        MergeRows::VoiceActivity(rows.clone()),
                    )
                    .await
            }
            Snapshot::Threads(rows) => {
                self.sink
                    .append(
                        &self.tables.name(Table::Threads),
                        AppendRows::Threads(rows.clone()),
                    )
                    .await
            }
            Snapshot::Presence(rows) => {
                let logins = dedup_presence_logins(rows);
                self.sink
                    .append(
                        &self.tables.name(Table::PresenceLogins),
                        AppendRows::PresenceLogins(logins),
                    )
                    .await
            }
        }
    }
}
