use std::sync::Arc;

use tracing::info;

use super::{ClassifyError, Disposition};
use crate::buffer::{EventRecorder, Record, ThreadRow};
use crate::events::ThreadCreated;

pub struct ThreadClassifier {
    recorder: Arc<dyn EventRecorder>,
}

impl ThreadClassifier {
    pub fn new(recorder: Arc<dyn EventRecorder>) -> Self {
        Self { recorder }
    }

    pub fn on_thread_create(&self, event: &ThreadCreated) -> Result<Disposition, ClassifyError> {
        let Some(owner_id) = &event.owner_id else {
            return Err(ClassifyError::MissingAttribute {
                kind: "thread_create",
                field: "owner_id",
            });
        };
        let Some(parent_channel_id) = &event.parent_channel_id else {
            return Err(ClassifyError::MissingAttribute {
                kind: "thread_create",
                field: "parent_channel_id",
            });
        };

        self.recorder.append(Record::Thread(ThreadRow {
            thread_id: event.thread_id.clone(),
            created_at: event.created_at.unwrap_or(event.at),
            user_id: owner_id.clone(),
            name: event.name.clone(),
            parent_channel_id: parent_channel_id.clone(),
        }));

        info!(
            "new thread created: '{}' in channel {}",
            event.name, parent_channel_id
        );
        Ok(Disposition::Recorded)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::buffer::{AggregationBuffer, FlushGroup, Snapshot};

    fn event() -> ThreadCreated {
        ThreadCreated {
            guild_id: 1,
            thread_id: "t1".to_string(),
            owner_id: Some("owner".to_string()),
            name: "release planning".to_string(),
            parent_channel_id: Some("general".to_string()),
            created_at: None,
            at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn thread_row_falls_back_to_event_time() {
        let buffer = Arc::new(AggregationBuffer::new());
        let classifier = ThreadClassifier::new(buffer.clone());

        classifier.on_thread_create(&event()).unwrap();

        let Snapshot::Threads(rows) = buffer.snapshot(FlushGroup::Threads) else {
            panic!("unexpected snapshot shape");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].created_at, event().at);
        assert_eq!(rows[0].parent_channel_id, "general");
        assert_eq!(rows[0].user_id, "owner");
    }

    #[test]
    fn thread_without_parent_is_rejected() {
        let buffer = Arc::new(AggregationBuffer::new());
        let classifier = ThreadClassifier::new(buffer.clone());
        let mut orphan = event();
        orphan.parent_channel_id = None;

        assert_eq!(
            classifier.on_thread_create(&orphan),
            Err(ClassifyError::MissingAttribute {
                kind: "thread_create",
                field: "parent_channel_id",
            })
        );
        assert_eq!(buffer.pending().threads, 0);
    }
}
