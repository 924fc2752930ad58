use std::sync::Arc;

use tracing::debug;

use super::{ClassifyError, DiscardReason, Disposition};
use crate::buffer::{AdditiveRecord, EventRecorder, MessageCountRow, MessageDetailRow, Record};
use crate::events::MessageCreated;

pub struct MessageClassifier {
    recorder: Arc<dyn EventRecorder>,
}

impl MessageClassifier {
    pub fn new(recorder: Arc<dyn EventRecorder>) -> Self {
        Self { recorder }
    }

    /// Counts the message under its (day, author, channel) key and keeps its
    /// detail row. Bot authors and blank messages are skipped.
    pub fn on_message(&self, event: &MessageCreated) -> Result<Disposition, ClassifyError> {
        if event.author_is_bot {
            return Ok(Disposition::Discarded(DiscardReason::BotAuthor));
        }

        if event.content.trim().is_empty() {
            return Ok(Disposition::Discarded(DiscardReason::EmptyContent));
        }

        if event.channel_id.is_empty() {
            return Err(ClassifyError::MissingAttribute {
                kind: "message",
                field: "channel_id",
            });
        }

        self.recorder
            .record_or_increment(AdditiveRecord::MessageCount(MessageCountRow {
                date: event.created_at.date_naive(),
                user_id: event.author_id.clone(),
                channel_id: event.channel_id.clone(),
                message_count: 1,
            }));
        self.recorder.append(Record::MessageDetail(MessageDetailRow {
            message_id: event.message_id.clone(),
            created_at: event.created_at,
            user_id: event.author_id.clone(),
            channel_id: event.channel_id.clone(),
            thread_id: event.thread_id.clone(),
            content: event.content.clone(),
        }));

        debug!(
            "message recorded id={} channel={} thread={:?}",
            event.message_id, event.channel_id, event.thread_id
        );
        Ok(Disposition::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use test_case::test_case;

    use super::*;
    use crate::buffer::{AggregationBuffer, FlushGroup, Snapshot};

    fn event(content: &str, is_bot: bool) -> MessageCreated {
        MessageCreated {
            message_id: "m1".to_string(),
            guild_id: Some(1),
            author_id: "author".to_string(),
            author_is_bot: is_bot,
            channel_id: "parent".to_string(),
            thread_id: Some("thread".to_string()),
            content: content.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap(),
        }
    }

    #[test_case("", false, DiscardReason::EmptyContent ; "empty content")]
    #[test_case("  \n\t ", false, DiscardReason::EmptyContent ; "whitespace content")]
    #[test_case("beep", true, DiscardReason::BotAuthor ; "bot author")]
    fn filtered_messages_leave_buffer_untouched(content: &str, is_bot: bool, reason: DiscardReason) {
        let buffer = Arc::new(AggregationBuffer::new());
        let classifier = MessageClassifier::new(buffer.clone());

        let disposition = classifier.on_message(&event(content, is_bot)).unwrap();

        assert_eq!(disposition, Disposition::Discarded(reason));
        assert_eq!(buffer.pending().total(), 0);
    }

    #[test]
    fn thread_message_is_counted_against_parent_channel() {
        let buffer = Arc::new(AggregationBuffer::new());
        let classifier = MessageClassifier::new(buffer.clone());

        classifier.on_message(&event("hi there", false)).unwrap();

        let Snapshot::Messages { counts, details } = buffer.snapshot(FlushGroup::Messages) else {
            panic!("unexpected snapshot shape");
        };
        assert_eq!(counts[0].channel_id, "parent");
        assert_eq!(counts[0].date.to_string(), "2024-05-01");
        assert_eq!(details[0].thread_id.as_deref(), Some("thread"));
        assert_eq!(details[0].content, "hi there");
    }

    #[test]
    fn missing_channel_is_an_error() {
        let buffer = Arc::new(AggregationBuffer::new());
        let classifier = MessageClassifier::new(buffer.clone());
        let mut broken = event("hello", false);
        broken.channel_id.clear();

        assert!(classifier.on_message(&broken).is_err());
        assert_eq!(buffer.pending().total(), 0);
    }
}
