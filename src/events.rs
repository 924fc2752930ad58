//! Platform-neutral view of the gateway events the collector consumes.
//!
//! The discord adapter builds these from serenity models; the classifiers in
//! [`crate::handlers`] only ever see these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Idle,
    DoNotDisturb,
    Offline,
}

impl PresenceStatus {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PresenceStatus::Online | PresenceStatus::Idle | PresenceStatus::DoNotDisturb
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Idle => "idle",
            PresenceStatus::DoNotDisturb => "dnd",
            PresenceStatus::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageCreated {
    pub message_id: String,
    pub guild_id: Option<u64>,
    pub author_id: String,
    pub author_is_bot: bool,
    /// Parent channel when the message was posted inside a thread.
    pub channel_id: String,
    pub thread_id: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberJoined {
    pub guild_id: u64,
    pub user_id: String,
    pub user_name: String,
    pub display_name: Option<String>,
    pub is_bot: bool,
    pub is_booster: bool,
    pub roles: Vec<String>,
    pub joined_at: Option<DateTime<Utc>>,
    pub status: PresenceStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberLeft {
    pub guild_id: u64,
    pub user_id: String,
    pub user_name: String,
    pub at: DateTime<Utc>,
}

/// The member columns a profile update can touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberProfile {
    pub user_name: String,
    pub display_name: String,
    pub roles: Vec<String>,
    pub is_booster: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUpdated {
    pub guild_id: u64,
    pub user_id: String,
    /// `None` when the gateway cache had no prior copy of the member.
    pub before: Option<MemberProfile>,
    pub after: MemberProfile,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceStateChanged {
    pub guild_id: Option<u64>,
    pub user_id: String,
    pub before_channel: Option<String>,
    pub after_channel: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadCreated {
    pub guild_id: u64,
    pub thread_id: String,
    pub owner_id: Option<String>,
    pub name: String,
    pub parent_channel_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChanged {
    pub guild_id: Option<u64>,
    pub user_id: String,
    pub user_name: String,
    pub before: PresenceStatus,
    pub after: PresenceStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommunityEvent {
    MessageCreated(MessageCreated),
    MemberJoined(MemberJoined),
    MemberLeft(MemberLeft),
    MemberUpdated(MemberUpdated),
    VoiceStateChanged(VoiceStateChanged),
    ThreadCreated(ThreadCreated),
    PresenceChanged(PresenceChanged),
}

impl CommunityEvent {
    pub fn guild_id(&self) -> Option<u64> {
        match self {
            CommunityEvent::MessageCreated(event) => event.guild_id,
            CommunityEvent::MemberJoined(event) => Some(event.guild_id),
            CommunityEvent::MemberLeft(event) => Some(event.guild_id),
            CommunityEvent::MemberUpdated(event) => Some(event.guild_id),
            CommunityEvent::VoiceStateChanged(event) => event.guild_id,
            CommunityEvent::ThreadCreated(event) => Some(event.guild_id),
            CommunityEvent::PresenceChanged(event) => event.guild_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CommunityEvent::MessageCreated(_) => "message_create",
            CommunityEvent::MemberJoined(_) => "member_join",
            CommunityEvent::MemberLeft(_) => "member_leave",
            CommunityEvent::MemberUpdated(_) => "member_update",
            CommunityEvent::VoiceStateChanged(_) => "voice_state",
            CommunityEvent::ThreadCreated(_) => "thread_create",
            CommunityEvent::PresenceChanged(_) => "presence_update",
        }
    }

    /// Identifier of the object the event is about, for log lines.
    pub fn source_id(&self) -> &str {
        match self {
            CommunityEvent::MessageCreated(event) => &event.message_id,
            CommunityEvent::MemberJoined(event) => &event.user_id,
            CommunityEvent::MemberLeft(event) => &event.user_id,
            CommunityEvent::MemberUpdated(event) => &event.user_id,
            CommunityEvent::VoiceStateChanged(event) => &event.user_id,
            CommunityEvent::ThreadCreated(event) => &event.thread_id,
            CommunityEvent::PresenceChanged(event) => &event.user_id,
        }
    }
}
