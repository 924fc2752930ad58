use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Current identity of a guild member, upserted by `user_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRow {
    pub user_id: String,
    pub user_name: String,
    pub display_name: String,
    pub is_bot: bool,
    pub is_booster: bool,
    /// Comma separated role names, `@everyone` excluded.
    pub roles: String,
    pub joined_at: DateTime<Utc>,
    pub status: String,
    pub updated_at: DateTime<Utc>,
}

/// Point patch of a single member column.
///
/// `column` stays a string until it reaches the warehouse, which checks it
/// against the mutable-column allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFieldUpdate {
    pub user_id: String,
    pub column: String,
    pub new_value: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCountRow {
    pub date: NaiveDate,
    pub user_id: String,
    pub channel_id: String,
    pub message_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDetailRow {
    pub message_id: String,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceActivityRow {
    pub date: NaiveDate,
    pub user_id: String,
    pub channel_id: String,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRow {
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub name: String,
    pub parent_channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceLoginRow {
    pub user_id: String,
    pub logged_at: DateTime<Utc>,
    pub user_name: String,
}

/// Rows whose numeric column is summed when their composite key collides.
pub trait AdditiveRow: Clone {
    fn same_key(&self, other: &Self) -> bool;
    fn amount(&self) -> i64;
    fn amount_mut(&mut self) -> &mut i64;
}

impl AdditiveRow for MessageCountRow {
    fn same_key(&self, other: &Self) -> bool {
        self.date == other.date
            && self.user_id == other.user_id
            && self.channel_id == other.channel_id
    }

    fn amount(&self) -> i64 {
        self.message_count
    }

    fn amount_mut(&mut self) -> &mut i64 {
        &mut self.message_count
    }
}

impl AdditiveRow for VoiceActivityRow {
    fn same_key(&self, other: &Self) -> bool {
        self.date == other.date
            && self.user_id == other.user_id
            && self.channel_id == other.channel_id
    }

    fn amount(&self) -> i64 {
        self.duration_seconds
    }

    fn amount_mut(&mut self) -> &mut i64 {
        &mut self.duration_seconds
    }
}

/// Adds `row` to the matching row in `rows`, or appends it when no row shares
/// its key. At most one row per key exists afterwards.
pub(crate) fn merge_additive<R: AdditiveRow>(rows: &mut Vec<R>, row: R) {
    match rows.iter_mut().find(|existing| existing.same_key(&row)) {
        Some(existing) => *existing.amount_mut() += row.amount(),
        None => rows.push(row),
    }
}

/// Removes the amounts carried by `flushed` from `rows`, dropping rows that
/// fall to zero. Amounts recorded after the snapshot was taken stay behind.
pub(crate) fn subtract_additive<R: AdditiveRow>(rows: &mut Vec<R>, flushed: &[R]) {
    for done in flushed {
        if let Some(existing) = rows.iter_mut().find(|existing| existing.same_key(done)) {
            *existing.amount_mut() -= done.amount();
        }
    }
    rows.retain(|row| row.amount() > 0);
}

/// Keeps one login per user: the one with the latest `logged_at`. Output is
/// ordered by first appearance of each user.
pub fn dedup_presence_logins(rows: &[PresenceLoginRow]) -> Vec<PresenceLoginRow> {
    let mut unique: Vec<PresenceLoginRow> = Vec::with_capacity(rows.len());
    for row in rows {
        match unique.iter_mut().find(|kept| kept.user_id == row.user_id) {
            Some(kept) if row.logged_at >= kept.logged_at => *kept = row.clone(),
            Some(_) => {}
            None => unique.push(row.clone()),
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;

    fn count(user: &str, channel: &str, n: i64) -> MessageCountRow {
        MessageCountRow {
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            user_id: user.to_string(),
            channel_id: channel.to_string(),
            message_count: n,
        }
    }

    fn login(user: &str, minute: u32) -> PresenceLoginRow {
        PresenceLoginRow {
            user_id: user.to_string(),
            logged_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap(),
            user_name: format!("name-{user}-{minute}"),
        }
    }

    #[test]
    fn merge_additive_sums_matching_keys() {
        let mut rows = Vec::new();
        merge_additive(&mut rows, count("a", "c", 1));
        merge_additive(&mut rows, count("a", "c", 1));
        merge_additive(&mut rows, count("a", "other", 1));

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].message_count, 2);
        assert_eq!(rows[1].message_count, 1);
    }

    #[test]
    fn subtract_additive_keeps_late_increments() {
        let mut rows = vec![count("a", "c", 5), count("b", "c", 2)];
        let flushed = vec![count("a", "c", 3), count("b", "c", 2)];

        subtract_additive(&mut rows, &flushed);

        assert_eq!(rows, vec![count("a", "c", 2)]);
    }

    #[test]
    fn dedup_presence_keeps_latest_login_per_user() {
        let rows = vec![login("a", 1), login("b", 2), login("a", 5), login("a", 3)];

        let unique = dedup_presence_logins(&rows);

        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0], login("a", 5));
        assert_eq!(unique[1], login("b", 2));
    }
}
