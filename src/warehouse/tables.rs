use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Members,
    MessageCounts,
    MessageDetails,
    VoiceActivity,
    Threads,
    PresenceLogins,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Members,
        Table::MessageCounts,
        Table::MessageDetails,
        Table::VoiceActivity,
        Table::Threads,
        Table::PresenceLogins,
    ];

    pub fn base_name(self) -> &'static str {
        match self {
            Table::Members => "dim_member",
            Table::MessageCounts => "message_count",
            Table::MessageDetails => "messages",
            Table::VoiceActivity => "voice_channel",
            Table::Threads => "thread",
            Table::PresenceLogins => "daily_user_logins",
        }
    }

    /// Column order used for inserts.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::Members => &[
                "user_id",
                "user_name",
                "display_name",
                "is_bot",
                "is_booster",
                "role",
                "joined_at",
                "status",
                "updated_at",
            ],
            Table::MessageCounts => &["date", "user_id", "channel_id", "message_count"],
            Table::MessageDetails => &[
                "message_id",
                "created_at",
                "user_id",
                "channel_id",
                "thread_id",
                "message_content",
            ],
            Table::VoiceActivity => &["date", "user_id", "channel_id", "duration_seconds"],
            Table::Threads => &[
                "created_at",
                "user_id",
                "thread_name",
                "channel_id",
                "thread_id",
            ],
            Table::PresenceLogins => &["logged_at", "user_id", "user_name"],
        }
    }
}

/// Table names with the configured prefix applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableNames {
    prefix: String,
}

impl TableNames {
    /// `prefix` must already be validated as identifier-safe.
    pub fn new(prefix: Option<&str>) -> Self {
        Self {
            prefix: prefix.unwrap_or_default().to_string(),
        }
    }

    pub fn name(&self, table: Table) -> String {
        format!("{}{}", self.prefix, table.base_name())
    }
}

/// Member columns that may be patched after the identity row exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberField {
    UserName,
    DisplayName,
    Status,
    Role,
    IsBooster,
}

impl MemberField {
    pub fn column(self) -> &'static str {
        match self {
            MemberField::UserName => "user_name",
            MemberField::DisplayName => "display_name",
            MemberField::Status => "status",
            MemberField::Role => "role",
            MemberField::IsBooster => "is_booster",
        }
    }
}

impl fmt::Display for MemberField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("column {0:?} is not an updatable member field")]
pub struct UnknownMemberField(pub String);

impl FromStr for MemberField {
    type Err = UnknownMemberField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user_name" => Ok(MemberField::UserName),
            "display_name" => Ok(MemberField::DisplayName),
            "status" => Ok(MemberField::Status),
            "role" => Ok(MemberField::Role),
            "is_booster" => Ok(MemberField::IsBooster),
            other => Err(UnknownMemberField(other.to_string())),
        }
    }
}
