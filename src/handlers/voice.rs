use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::{ClassifyError, DiscardReason, Disposition};
use crate::buffer::{AdditiveRecord, EventRecorder, VoiceActivityRow};
use crate::events::VoiceStateChanged;

#[derive(Debug, Clone, PartialEq, Eq)]
struct OpenSession {
    channel_id: String,
    entered_at: DateTime<Utc>,
}

/// Turns join/leave pairs into voice durations.
///
/// Holds at most one open session per user. A session is keyed to the day it
/// started on, even when it ends after midnight.
pub struct VoiceClassifier {
    recorder: Arc<dyn EventRecorder>,
    sessions: Mutex<HashMap<String, OpenSession>>,
}

impl VoiceClassifier {
    pub fn new(recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            recorder,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn on_voice_state(&self, event: &VoiceStateChanged) -> Result<Disposition, ClassifyError> {
        if event.user_id.is_empty() {
            return Err(ClassifyError::MissingAttribute {
                kind: "voice_state",
                field: "user_id",
            });
        }

        match (&event.before_channel, &event.after_channel) {
            (None, Some(to)) => Ok(self.join(&event.user_id, to, event.at)),
            (Some(_), None) => Ok(if self.leave(&event.user_id, event.at) {
                Disposition::Recorded
            } else {
                Disposition::Discarded(DiscardReason::NoOpenSession)
            }),
            (Some(from), Some(to)) if from != to => {
                // Old session must close before the new one opens.
                let closed = self.leave(&event.user_id, event.at);
                let opened = self.join(&event.user_id, to, event.at);
                Ok(if closed { Disposition::Recorded } else { opened })
            }
            _ => Ok(Disposition::Discarded(DiscardReason::Unchanged)),
        }
    }

    fn join(&self, user_id: &str, channel_id: &str, at: DateTime<Utc>) -> Disposition {
        let previous = self.sessions.lock().insert(
            user_id.to_string(),
            OpenSession {
                channel_id: channel_id.to_string(),
                entered_at: at,
            },
        );
        debug!("user {user_id} joined voice channel {channel_id}");

        // A join while a session is open means the leave never reached us.
        match previous {
            Some(stale) => {
                self.record(user_id, stale, at);
                Disposition::Recorded
            }
            None => Disposition::SessionOpened,
        }
    }

    fn leave(&self, user_id: &str, at: DateTime<Utc>) -> bool {
        let Some(session) = self.sessions.lock().remove(user_id) else {
            return false;
        };
        self.record(user_id, session, at);
        true
    }

    fn record(&self, user_id: &str, session: OpenSession, left_at: DateTime<Utc>) {
        let duration_seconds = (left_at - session.entered_at).num_seconds().max(0);
        debug!(
            "user {user_id} left voice channel {} after {duration_seconds} seconds",
            session.channel_id
        );
        self.recorder
            .record_or_increment(AdditiveRecord::VoiceActivity(VoiceActivityRow {
                date: session.entered_at.date_naive(),
                user_id: user_id.to_string(),
                channel_id: session.channel_id,
                duration_seconds,
            }));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::buffer::{AggregationBuffer, FlushGroup, Snapshot};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap()
    }

    fn change(before: Option<&str>, after: Option<&str>, at: DateTime<Utc>) -> VoiceStateChanged {
        VoiceStateChanged {
            guild_id: Some(1),
            user_id: "u1".to_string(),
            before_channel: before.map(str::to_string),
            after_channel: after.map(str::to_string),
            at,
        }
    }

    fn voice_rows(buffer: &AggregationBuffer) -> Vec<VoiceActivityRow> {
        match buffer.snapshot(FlushGroup::Voice) {
            Snapshot::Voice(rows) => rows,
            other => panic!("unexpected snapshot {other:?}"),
        }
    }

    fn classifier() -> (VoiceClassifier, Arc<AggregationBuffer>) {
        let buffer = Arc::new(AggregationBuffer::new());
        (VoiceClassifier::new(buffer.clone()), buffer)
    }

    #[test]
    fn join_then_leave_records_whole_seconds() {
        let (voice, buffer) = classifier();

        assert_eq!(
            voice.on_voice_state(&change(None, Some("vc1"), t0())).unwrap(),
            Disposition::SessionOpened
        );
        let left = t0() + Duration::milliseconds(42_900);
        assert_eq!(
            voice.on_voice_state(&change(Some("vc1"), None, left)).unwrap(),
            Disposition::Recorded
        );

        let rows = voice_rows(&buffer);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].channel_id, "vc1");
        assert_eq!(rows[0].duration_seconds, 42);
        assert_eq!(voice.open_sessions(), 0);
    }

    #[test]
    fn leave_without_join_is_a_no_op() {
        let (voice, buffer) = classifier();

        let disposition = voice.on_voice_state(&change(Some("vc1"), None, t0())).unwrap();

        assert_eq!(
            disposition,
            Disposition::Discarded(DiscardReason::NoOpenSession)
        );
        assert!(voice_rows(&buffer).is_empty());
    }

    #[test]
    fn switch_closes_old_session_before_opening_new_one() {
        let (voice, buffer) = classifier();

        voice.on_voice_state(&change(None, Some("vc1"), t0())).unwrap();
        voice
            .on_voice_state(&change(Some("vc1"), Some("vc2"), t0() + Duration::seconds(30)))
            .unwrap();
        voice
            .on_voice_state(&change(Some("vc2"), None, t0() + Duration::seconds(100)))
            .unwrap();

        let rows = voice_rows(&buffer);
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].channel_id.as_str(), rows[0].duration_seconds), ("vc1", 30));
        assert_eq!((rows[1].channel_id.as_str(), rows[1].duration_seconds), ("vc2", 70));
    }

    #[test]
    fn clock_skew_never_yields_negative_duration() {
        let (voice, buffer) = classifier();

        voice.on_voice_state(&change(None, Some("vc1"), t0())).unwrap();
        voice
            .on_voice_state(&change(Some("vc1"), None, t0() - Duration::seconds(5)))
            .unwrap();

        assert_eq!(voice_rows(&buffer)[0].duration_seconds, 0);
    }

    #[test]
    fn repeated_join_closes_stale_session() {
        let (voice, buffer) = classifier();

        voice.on_voice_state(&change(None, Some("vc1"), t0())).unwrap();
        let disposition = voice
            .on_voice_state(&change(None, Some("vc2"), t0() + Duration::seconds(10)))
            .unwrap();

        assert_eq!(disposition, Disposition::Recorded);
        assert_eq!(voice.open_sessions(), 1);
        assert_eq!(voice_rows(&buffer)[0].duration_seconds, 10);
    }

    #[test]
    fn mute_in_same_channel_is_ignored() {
        let (voice, _buffer) = classifier();

        voice.on_voice_state(&change(None, Some("vc1"), t0())).unwrap();
        let disposition = voice
            .on_voice_state(&change(Some("vc1"), Some("vc1"), t0()))
            .unwrap();

        assert_eq!(disposition, Disposition::Discarded(DiscardReason::Unchanged));
        assert_eq!(voice.open_sessions(), 1);
    }

    #[test]
    fn session_is_dated_by_its_start() {
        let (voice, buffer) = classifier();
        let late = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 0).unwrap();

        voice.on_voice_state(&change(None, Some("vc1"), late)).unwrap();
        voice
            .on_voice_state(&change(Some("vc1"), None, late + Duration::minutes(5)))
            .unwrap();

        assert_eq!(voice_rows(&buffer)[0].date.to_string(), "2024-05-01");
    }
}
