use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::{ClassifyError, DiscardReason, Disposition};
use crate::buffer::{EventRecorder, MemberFieldUpdate, MemberRow, Record};
use crate::events::{MemberJoined, MemberLeft, MemberProfile, MemberUpdated};
use crate::warehouse::MemberField;

const STATUS_LEFT: &str = "left";

pub struct MemberClassifier {
    recorder: Arc<dyn EventRecorder>,
}

impl MemberClassifier {
    pub fn new(recorder: Arc<dyn EventRecorder>) -> Self {
        Self { recorder }
    }

    pub fn on_member_join(&self, event: &MemberJoined) -> Result<Disposition, ClassifyError> {
        if event.user_id.is_empty() {
            return Err(ClassifyError::MissingAttribute {
                kind: "member_join",
                field: "user_id",
            });
        }

        let display_name = event
            .display_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| event.user_name.clone());

        self.recorder.append(Record::Member(MemberRow {
            user_id: event.user_id.clone(),
            user_name: event.user_name.clone(),
            display_name: display_name.clone(),
            is_bot: event.is_bot,
            is_booster: event.is_booster,
            roles: format_roles(&event.roles),
            joined_at: event.joined_at.unwrap_or(event.at),
            status: event.status.as_str().to_string(),
            updated_at: event.at,
        }));

        let bot_indicator = if event.is_bot { " [BOT]" } else { "" };
        info!("new member joined: {display_name}{bot_indicator}");
        Ok(Disposition::Recorded)
    }

    pub fn on_member_leave(&self, event: &MemberLeft) -> Result<Disposition, ClassifyError> {
        self.recorder.append(Record::MemberUpdate(field_update(
            &event.user_id,
            MemberField::Status,
            STATUS_LEFT.to_string(),
            event.at,
        )));

        info!("member left: {}", event.user_name);
        Ok(Disposition::Recorded)
    }

    /// Emits one field update per changed profile column.
    pub fn on_member_update(&self, event: &MemberUpdated) -> Result<Disposition, ClassifyError> {
        let Some(before) = &event.before else {
            return Ok(Disposition::Discarded(DiscardReason::NoPriorState));
        };

        let changes = profile_changes(before, &event.after);
        if changes.is_empty() {
            return Ok(Disposition::Discarded(DiscardReason::Unchanged));
        }

        for (field, value) in changes {
            info!(
                "user {} changed {}: {:?}",
                event.user_id,
                field.column(),
                value
            );
            self.recorder.append(Record::MemberUpdate(field_update(
                &event.user_id,
                field,
                value,
                event.at,
            )));
        }
        Ok(Disposition::Recorded)
    }
}

fn field_update(
    user_id: &str,
    field: MemberField,
    new_value: String,
    updated_at: DateTime<Utc>,
) -> MemberFieldUpdate {
    MemberFieldUpdate {
        user_id: user_id.to_string(),
        column: field.column().to_string(),
        new_value,
        updated_at,
    }
}

fn profile_changes(before: &MemberProfile, after: &MemberProfile) -> Vec<(MemberField, String)> {
    let mut changes = Vec::new();
    if before.user_name != after.user_name {
        changes.push((MemberField::UserName, after.user_name.clone()));
    }
    if before.display_name != after.display_name {
        changes.push((MemberField::DisplayName, after.display_name.clone()));
    }
    let roles = format_roles(&after.roles);
    if format_roles(&before.roles) != roles {
        changes.push((MemberField::Role, roles));
    }
    if before.is_booster != after.is_booster {
        changes.push((MemberField::IsBooster, after.is_booster.to_string()));
    }
    changes
}

pub(crate) fn format_roles(roles: &[String]) -> String {
    roles
        .iter()
        .map(String::as_str)
        .filter(|name| *name != "@everyone")
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::buffer::{AggregationBuffer, FlushGroup, Snapshot};
    use crate::events::PresenceStatus;

    fn profile(name: &str, roles: &[&str], booster: bool) -> MemberProfile {
        MemberProfile {
            user_name: name.to_string(),
            display_name: name.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            is_booster: booster,
        }
    }

    fn member_snapshot(buffer: &AggregationBuffer) -> (Vec<MemberRow>, Vec<MemberFieldUpdate>) {
        match buffer.snapshot(FlushGroup::Members) {
            Snapshot::Members {
                identities,
                updates,
            } => (identities, updates),
            other => panic!("unexpected snapshot {other:?}"),
        }
    }

    #[test]
    fn join_records_identity_with_fallbacks() {
        let buffer = Arc::new(AggregationBuffer::new());
        let classifier = MemberClassifier::new(buffer.clone());
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

        classifier
            .on_member_join(&MemberJoined {
                guild_id: 1,
                user_id: "u1".to_string(),
                user_name: "alice".to_string(),
                display_name: None,
                is_bot: false,
                is_booster: true,
                roles: vec!["@everyone".to_string(), "mod".to_string(), "dev".to_string()],
                joined_at: None,
                status: PresenceStatus::Online,
                at,
            })
            .unwrap();

        let (identities, updates) = member_snapshot(&buffer);
        assert!(updates.is_empty());
        let row = &identities[0];
        assert_eq!(row.display_name, "alice");
        assert_eq!(row.roles, "mod, dev");
        assert_eq!(row.joined_at, at);
        assert_eq!(row.status, "online");
        assert!(row.is_booster);
    }

    #[test]
    fn leave_marks_status_left() {
        let buffer = Arc::new(AggregationBuffer::new());
        let classifier = MemberClassifier::new(buffer.clone());

        classifier
            .on_member_leave(&MemberLeft {
                guild_id: 1,
                user_id: "u1".to_string(),
                user_name: "alice".to_string(),
                at: Utc::now(),
            })
            .unwrap();

        let (_, updates) = member_snapshot(&buffer);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].column, "status");
        assert_eq!(updates[0].new_value, "left");
    }

    #[test]
    fn update_emits_one_row_per_changed_field() {
        let buffer = Arc::new(AggregationBuffer::new());
        let classifier = MemberClassifier::new(buffer.clone());

        let disposition = classifier
            .on_member_update(&MemberUpdated {
                guild_id: 1,
                user_id: "u1".to_string(),
                before: Some(profile("alice", &["mod"], false)),
                after: profile("alicia", &["mod", "dev"], false),
                at: Utc::now(),
            })
            .unwrap();

        assert_eq!(disposition, Disposition::Recorded);
        let (_, updates) = member_snapshot(&buffer);
        let columns: Vec<_> = updates.iter().map(|u| u.column.as_str()).collect();
        assert_eq!(columns, vec!["user_name", "display_name", "role"]);
        assert_eq!(updates[2].new_value, "mod, dev");
    }

    #[test]
    fn update_without_prior_profile_is_discarded() {
        let buffer = Arc::new(AggregationBuffer::new());
        let classifier = MemberClassifier::new(buffer.clone());

        let disposition = classifier
            .on_member_update(&MemberUpdated {
                guild_id: 1,
                user_id: "u1".to_string(),
                before: None,
                after: profile("alice", &[], false),
                at: Utc::now(),
            })
            .unwrap();

        assert_eq!(
            disposition,
            Disposition::Discarded(DiscardReason::NoPriorState)
        );
        assert_eq!(buffer.pending().total(), 0);
    }

    #[test]
    fn identical_profiles_produce_no_update() {
        let buffer = Arc::new(AggregationBuffer::new());
        let classifier = MemberClassifier::new(buffer.clone());
        let same = profile("alice", &["mod"], true);

        let disposition = classifier
            .on_member_update(&MemberUpdated {
                guild_id: 1,
                user_id: "u1".to_string(),
                before: Some(same.clone()),
                after: same,
                at: Utc::now(),
            })
            .unwrap();

        assert_eq!(disposition, Disposition::Discarded(DiscardReason::Unchanged));
    }
}
