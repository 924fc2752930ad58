use parking_lot::Mutex;
use serde::Serialize;

pub mod rows;

pub use self::rows::{
    MemberFieldUpdate, MemberRow, MessageCountRow, MessageDetailRow, PresenceLoginRow, ThreadRow,
    VoiceActivityRow, dedup_presence_logins,
};

use self::rows::{merge_additive, subtract_additive};

/// Set of categories flushed (and cleared) together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlushGroup {
    /// Member identities and member field updates.
    Members,
    /// Message counts and message details.
    Messages,
    Voice,
    Threads,
    Presence,
}

impl FlushGroup {
    /// Fixed ordering, also used to stagger the first flush of each group.
    pub const ALL: [FlushGroup; 5] = [
        FlushGroup::Members,
        FlushGroup::Messages,
        FlushGroup::Voice,
        FlushGroup::Threads,
        FlushGroup::Presence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FlushGroup::Members => "members",
            FlushGroup::Messages => "messages",
            FlushGroup::Voice => "voice_activity",
            FlushGroup::Threads => "threads",
            FlushGroup::Presence => "presence_logs",
        }
    }
}

/// A row for one of the append-only categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Member(MemberRow),
    MemberUpdate(MemberFieldUpdate),
    MessageDetail(MessageDetailRow),
    Thread(ThreadRow),
    PresenceLogin(PresenceLoginRow),
}

/// A row for one of the additive categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdditiveRecord {
    MessageCount(MessageCountRow),
    VoiceActivity(VoiceActivityRow),
}

/// Copy of a flush group's rows, detached from the buffer lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Members {
        identities: Vec<MemberRow>,
        updates: Vec<MemberFieldUpdate>,
    },
    Messages {
        counts: Vec<MessageCountRow>,
        details: Vec<MessageDetailRow>,
    },
    Voice(Vec<VoiceActivityRow>),
    Threads(Vec<ThreadRow>),
    Presence(Vec<PresenceLoginRow>),
}

impl Snapshot {
    pub fn row_count(&self) -> usize {
        match self {
            Snapshot::Members {
                identities,
                updates,
            } => identities.len() + updates.len(),
            Snapshot::Messages { counts, details } => counts.len() + details.len(),
            Snapshot::Voice(rows) => rows.len(),
            Snapshot::Threads(rows) => rows.len(),
            Snapshot::Presence(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

/// Rows waiting in each category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingCounts {
    pub members: usize,
    pub member_updates: usize,
    pub message_counts: usize,
    pub message_details: usize,
    pub voice_activity: usize,
    pub threads: usize,
    pub presence_logins: usize,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.members
            + self.member_updates
            + self.message_counts
            + self.message_details
            + self.voice_activity
            + self.threads
            + self.presence_logins
    }
}

/// Write side of the buffer as seen by the event classifiers.
pub trait EventRecorder: Send + Sync {
    fn append(&self, record: Record);
    fn record_or_increment(&self, record: AdditiveRecord);
}

#[derive(Debug, Default)]
struct Categories {
    members: Vec<MemberRow>,
    member_updates: Vec<MemberFieldUpdate>,
    message_counts: Vec<MessageCountRow>,
    message_details: Vec<MessageDetailRow>,
    voice_activity: Vec<VoiceActivityRow>,
    threads: Vec<ThreadRow>,
    presence_logins: Vec<PresenceLoginRow>,
}

/// In-memory holding area for every category, behind a single lock.
///
/// The lock is never held across an `.await`; callers flushing to the
/// warehouse take a [`Snapshot`] first and [`release`](Self::release) it once
/// the warehouse accepted the rows.
#[derive(Debug, Default)]
pub struct AggregationBuffer {
    inner: Mutex<Categories>,
}

impl AggregationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, group: FlushGroup) -> Snapshot {
        let inner = self.inner.lock();
        match group {
            FlushGroup::Members => Snapshot::Members {
                identities: inner.members.clone(),
                updates: inner.member_updates.clone(),
            },
            FlushGroup::Messages => Snapshot::Messages {
                counts: inner.message_counts.clone(),
                details: inner.message_details.clone(),
            },
            FlushGroup::Voice => Snapshot::Voice(inner.voice_activity.clone()),
            FlushGroup::Threads => Snapshot::Threads(inner.threads.clone()),
            FlushGroup::Presence => Snapshot::Presence(inner.presence_logins.clone()),
        }
    }

    /// Removes what `snapshot` carried to the warehouse.
    ///
    /// Append-only categories only ever grow at the tail, so the snapshot is a
    /// prefix of the current rows. Additive categories may have been bumped in
    /// place since the snapshot; only the flushed amounts are subtracted.
    pub fn release(&self, snapshot: &Snapshot) {
        let mut inner = self.inner.lock();
        match snapshot {
            Snapshot::Members {
                identities,
                updates,
            } => {
                drain_prefix(&mut inner.members, identities.len());
                drain_prefix(&mut inner.member_updates, updates.len());
            }
            Snapshot::Messages { counts, details } => {
                subtract_additive(&mut inner.message_counts, counts);
                drain_prefix(&mut inner.message_details, details.len());
            }
            Snapshot::Voice(rows) => subtract_additive(&mut inner.voice_activity, rows),
            Snapshot::Threads(rows) => drain_prefix(&mut inner.threads, rows.len()),
            Snapshot::Presence(rows) => drain_prefix(&mut inner.presence_logins, rows.len()),
        }
    }

    /// Empties every category of `group`, returning how many rows were dropped.
    pub fn clear(&self, group: FlushGroup) -> usize {
        let mut inner = self.inner.lock();
        match group {
            FlushGroup::Members => {
                std::mem::take(&mut inner.members).len()
                    + std::mem::take(&mut inner.member_updates).len()
            }
            FlushGroup::Messages => {
                std::mem::take(&mut inner.message_counts).len()
                    + std::mem::take(&mut inner.message_details).len()
            }
            FlushGroup::Voice => std::mem::take(&mut inner.voice_activity).len(),
            FlushGroup::Threads => std::mem::take(&mut inner.threads).len(),
            FlushGroup::Presence => std::mem::take(&mut inner.presence_logins).len(),
        }
    }

    pub fn pending(&self) -> PendingCounts {
        let inner = self.inner.lock();
        PendingCounts {
            members: inner.members.len(),
            member_updates: inner.member_updates.len(),
            message_counts: inner.message_counts.len(),
            message_details: inner.message_details.len(),
            voice_activity: inner.voice_activity.len(),
            threads: inner.threads.len(),
            presence_logins: inner.presence_logins.len(),
        }
    }
}

impl EventRecorder for AggregationBuffer {
    fn append(&self, record: Record) {
        let mut inner = self.inner.lock();
        match record {
            Record::Member(row) => inner.members.push(row),
            Record::MemberUpdate(row) => inner.member_updates.push(row),
            Record::MessageDetail(row) => inner.message_details.push(row),
            Record::Thread(row) => inner.threads.push(row),
            Record::PresenceLogin(row) => inner.presence_logins.push(row),
        }
    }

    fn record_or_increment(&self, record: AdditiveRecord) {
        let mut inner = self.inner.lock();
        match record {
            AdditiveRecord::MessageCount(row) => merge_additive(&mut inner.message_counts, row),
            AdditiveRecord::VoiceActivity(row) => merge_additive(&mut inner.voice_activity, row),
        }
    }
}

fn drain_prefix<T>(rows: &mut Vec<T>, len: usize) {
    rows.drain(..len.min(rows.len()));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
    }

    fn message_count(user: &str, channel: &str) -> AdditiveRecord {
        AdditiveRecord::MessageCount(MessageCountRow {
            date: day(),
            user_id: user.to_string(),
            channel_id: channel.to_string(),
            message_count: 1,
        })
    }

    fn voice(user: &str, seconds: i64) -> AdditiveRecord {
        AdditiveRecord::VoiceActivity(VoiceActivityRow {
            date: day(),
            user_id: user.to_string(),
            channel_id: "vc".to_string(),
            duration_seconds: seconds,
        })
    }

    fn thread(id: &str) -> Record {
        Record::Thread(ThreadRow {
            thread_id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            user_id: "owner".to_string(),
            name: format!("thread {id}"),
            parent_channel_id: "parent".to_string(),
        })
    }

    fn presence(user: &str) -> Record {
        Record::PresenceLogin(PresenceLoginRow {
            user_id: user.to_string(),
            logged_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            user_name: user.to_string(),
        })
    }

    #[test]
    fn repeated_message_key_collapses_into_one_row() {
        let buffer = AggregationBuffer::new();
        for _ in 0..7 {
            buffer.record_or_increment(message_count("a", "c"));
        }

        let Snapshot::Messages { counts, details } = buffer.snapshot(FlushGroup::Messages) else {
            panic!("unexpected snapshot shape");
        };
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].message_count, 7);
        assert!(details.is_empty());
    }

    #[test]
    fn voice_durations_add_up_per_key() {
        let buffer = AggregationBuffer::new();
        buffer.record_or_increment(voice("a", 30));
        buffer.record_or_increment(voice("a", 12));
        buffer.record_or_increment(voice("b", 5));

        let Snapshot::Voice(rows) = buffer.snapshot(FlushGroup::Voice) else {
            panic!("unexpected snapshot shape");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].duration_seconds, 42);
        assert_eq!(rows[1].duration_seconds, 5);
    }

    #[test]
    fn snapshot_is_a_detached_copy() {
        let buffer = AggregationBuffer::new();
        buffer.append(thread("1"));
        let snapshot = buffer.snapshot(FlushGroup::Threads);
        buffer.append(thread("2"));

        assert_eq!(snapshot.row_count(), 1);
        assert_eq!(buffer.pending().threads, 2);
    }

    #[test]
    fn release_keeps_rows_recorded_after_snapshot() {
        let buffer = AggregationBuffer::new();
        buffer.append(thread("1"));
        buffer.record_or_increment(message_count("a", "c"));
        let threads = buffer.snapshot(FlushGroup::Threads);
        let messages = buffer.snapshot(FlushGroup::Messages);

        buffer.append(thread("2"));
        buffer.record_or_increment(message_count("a", "c"));
        buffer.release(&threads);
        buffer.release(&messages);

        let Snapshot::Threads(rows) = buffer.snapshot(FlushGroup::Threads) else {
            panic!("unexpected snapshot shape");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].thread_id, "2");

        let Snapshot::Messages { counts, .. } = buffer.snapshot(FlushGroup::Messages) else {
            panic!("unexpected snapshot shape");
        };
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].message_count, 1);
    }

    #[test]
    fn release_only_touches_its_own_group() {
        let buffer = AggregationBuffer::new();
        buffer.append(thread("1"));
        buffer.append(presence("a"));
        buffer.record_or_increment(voice("a", 10));

        let snapshot = buffer.snapshot(FlushGroup::Threads);
        buffer.release(&snapshot);

        let pending = buffer.pending();
        assert_eq!(pending.threads, 0);
        assert_eq!(pending.presence_logins, 1);
        assert_eq!(pending.voice_activity, 1);
    }

    #[test]
    fn clear_empties_message_pair_together() {
        let buffer = AggregationBuffer::new();
        buffer.record_or_increment(message_count("a", "c"));
        buffer.append(Record::MessageDetail(MessageDetailRow {
            message_id: "m1".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            user_id: "a".to_string(),
            channel_id: "c".to_string(),
            thread_id: None,
            content: "hi".to_string(),
        }));
        buffer.append(presence("a"));

        assert_eq!(buffer.clear(FlushGroup::Messages), 2);

        let pending = buffer.pending();
        assert_eq!(pending.message_counts, 0);
        assert_eq!(pending.message_details, 0);
        assert_eq!(pending.presence_logins, 1);
        assert_eq!(pending.total(), 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let buffer = Arc::new(AggregationBuffer::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let buffer = buffer.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        buffer.record_or_increment(message_count("a", "c"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let Snapshot::Messages { counts, .. } = buffer.snapshot(FlushGroup::Messages) else {
            panic!("unexpected snapshot shape");
        };
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].message_count, 2000);
    }
}
