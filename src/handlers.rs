use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use crate::buffer::EventRecorder;
use crate::events::CommunityEvent;
use crate::web::metrics::Metrics;

pub mod member;
pub mod message;
pub mod presence;
pub mod thread;
pub mod voice;

pub use self::member::MemberClassifier;
pub use self::message::MessageClassifier;
pub use self::presence::PresenceClassifier;
pub use self::thread::ThreadClassifier;
pub use self::voice::VoiceClassifier;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("{kind} event is missing {field}")]
    MissingAttribute {
        kind: &'static str,
        field: &'static str,
    },
}

/// What a classifier did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// One or more rows went into the buffer.
    Recorded,
    /// A voice session was opened; rows follow when it closes.
    SessionOpened,
    Discarded(DiscardReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    OtherGuild,
    BotAuthor,
    EmptyContent,
    NoPriorState,
    Unchanged,
    NoOpenSession,
    NotALogin,
}

impl DiscardReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DiscardReason::OtherGuild => "other_guild",
            DiscardReason::BotAuthor => "bot_author",
            DiscardReason::EmptyContent => "empty_content",
            DiscardReason::NoPriorState => "no_prior_state",
            DiscardReason::Unchanged => "unchanged",
            DiscardReason::NoOpenSession => "no_open_session",
            DiscardReason::NotALogin => "not_a_login",
        }
    }
}

/// Routes gateway events of the target guild to their classifier.
pub struct EventRouter {
    target_guild_id: u64,
    messages: MessageClassifier,
    members: MemberClassifier,
    voice: VoiceClassifier,
    threads: ThreadClassifier,
    presence: PresenceClassifier,
}

impl EventRouter {
    pub fn new(target_guild_id: u64, recorder: Arc<dyn EventRecorder>) -> Self {
        Self {
            target_guild_id,
            messages: MessageClassifier::new(recorder.clone()),
            members: MemberClassifier::new(recorder.clone()),
            voice: VoiceClassifier::new(recorder.clone()),
            threads: ThreadClassifier::new(recorder.clone()),
            presence: PresenceClassifier::new(recorder),
        }
    }

    pub fn target_guild_id(&self) -> u64 {
        self.target_guild_id
    }

    pub fn open_voice_sessions(&self) -> usize {
        self.voice.open_sessions()
    }

    /// Classifies `event`, absorbing classifier failures so one malformed
    /// event never affects the rest of the stream.
    pub fn dispatch(&self, event: &CommunityEvent) -> Option<Disposition> {
        Metrics::event_received();
        match self.classify(event) {
            Ok(disposition) => {
                match disposition {
                    Disposition::Discarded(reason) => {
                        Metrics::event_discarded();
                        debug!(
                            "event discarded kind={} id={} reason={}",
                            event.kind(),
                            event.source_id(),
                            reason.as_str()
                        );
                    }
                    Disposition::Recorded | Disposition::SessionOpened => {
                        Metrics::event_recorded();
                    }
                }
                Some(disposition)
            }
            Err(err) => {
                Metrics::event_failed();
                error!(
                    "failed to classify event kind={} id={}: {err}",
                    event.kind(),
                    event.source_id()
                );
                None
            }
        }
    }

    pub fn classify(&self, event: &CommunityEvent) -> Result<Disposition, ClassifyError> {
        if event.guild_id() != Some(self.target_guild_id) {
            return Ok(Disposition::Discarded(DiscardReason::OtherGuild));
        }

        match event {
            CommunityEvent::MessageCreated(event) => self.messages.on_message(event),
            CommunityEvent::MemberJoined(event) => self.members.on_member_join(event),
            CommunityEvent::MemberLeft(event) => self.members.on_member_leave(event),
            CommunityEvent::MemberUpdated(event) => self.members.on_member_update(event),
            CommunityEvent::VoiceStateChanged(event) => self.voice.on_voice_state(event),
            CommunityEvent::ThreadCreated(event) => self.threads.on_thread_create(event),
            CommunityEvent::PresenceChanged(event) => self.presence.on_presence_update(event),
        }
    }
}
