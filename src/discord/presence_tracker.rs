use std::collections::HashMap;

use parking_lot::Mutex;

use crate::events::PresenceStatus;

/// Last known status per user, since presence updates only carry the new one.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    statuses: Mutex<HashMap<String, PresenceStatus>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces everything known with a guild snapshot.
    pub fn seed<I>(&self, statuses: I)
    where
        I: IntoIterator<Item = (String, PresenceStatus)>,
    {
        let mut known = self.statuses.lock();
        known.clear();
        known.extend(statuses);
    }

    /// Stores `status` and returns the previous one. Users never seen before
    /// count as offline.
    pub fn observe(&self, user_id: &str, status: PresenceStatus) -> PresenceStatus {
        let previous = match status {
            // Offline users are dropped to keep the map at the online population.
            PresenceStatus::Offline => self.statuses.lock().remove(user_id),
            active => self.statuses.lock().insert(user_id.to_string(), active),
        };
        previous.unwrap_or(PresenceStatus::Offline)
    }

    pub fn current(&self, user_id: &str) -> PresenceStatus {
        self.statuses
            .lock()
            .get(user_id)
            .copied()
            .unwrap_or(PresenceStatus::Offline)
    }

    pub fn tracked(&self) -> usize {
        self.statuses.lock().len()
    }
}
