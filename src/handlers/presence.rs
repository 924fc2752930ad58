use std::sync::Arc;

use tracing::{debug, info};

use super::{ClassifyError, DiscardReason, Disposition};
use crate::buffer::{EventRecorder, PresenceLoginRow, Record};
use crate::events::{PresenceChanged, PresenceStatus};

pub struct PresenceClassifier {
    recorder: Arc<dyn EventRecorder>,
}

impl PresenceClassifier {
    pub fn new(recorder: Arc<dyn EventRecorder>) -> Self {
        Self { recorder }
    }

    /// Records a login when a user goes from offline to any active status.
    pub fn on_presence_update(
        &self,
        event: &PresenceChanged,
    ) -> Result<Disposition, ClassifyError> {
        if is_login(event.before, event.after) {
            self.recorder.append(Record::PresenceLogin(PresenceLoginRow {
                user_id: event.user_id.clone(),
                logged_at: event.at,
                user_name: event.user_name.clone(),
            }));
            info!(
                "user {} logged in, status: {}",
                event.user_id,
                event.after.as_str()
            );
            return Ok(Disposition::Recorded);
        }

        if event.before == event.after {
            return Ok(Disposition::Discarded(DiscardReason::Unchanged));
        }

        debug!(
            "user {} status changed from {} to {}",
            event.user_id,
            event.before.as_str(),
            event.after.as_str()
        );
        Ok(Disposition::Discarded(DiscardReason::NotALogin))
    }
}

fn is_login(before: PresenceStatus, after: PresenceStatus) -> bool {
    before == PresenceStatus::Offline && after.is_active()
}
