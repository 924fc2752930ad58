use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serenity::Error as SerenityError;
use serenity::all::{
    ChannelId, Client as SerenityClient, Context as SerenityContext,
    EventHandler as SerenityEventHandler, GatewayIntents, Guild, GuildChannel, GuildId,
    GuildMemberUpdateEvent, Member, Message as SerenityMessage, OnlineStatus, Presence, Ready,
    RoleId, Timestamp, User, VoiceState,
};
use serenity::gateway::GatewayError;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::{debug, error, info};

use crate::config::DiscordConfig;
use crate::events::{
    CommunityEvent, MemberJoined, MemberLeft, MemberProfile, MemberUpdated, MessageCreated,
    PresenceChanged, PresenceStatus, ThreadCreated, VoiceStateChanged,
};
use crate::handlers::EventRouter;

pub mod presence_tracker;

use self::presence_tracker::PresenceTracker;

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;
const READY_TIMEOUT: Duration = Duration::from_secs(30);

pub fn presence_status(status: OnlineStatus) -> PresenceStatus {
    match status {
        OnlineStatus::Online => PresenceStatus::Online,
        OnlineStatus::Idle => PresenceStatus::Idle,
        OnlineStatus::DoNotDisturb => PresenceStatus::DoNotDisturb,
        OnlineStatus::Offline | OnlineStatus::Invisible => PresenceStatus::Offline,
        _ => PresenceStatus::Offline,
    }
}

fn to_datetime(timestamp: &Timestamp) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp.unix_timestamp(), 0)
}

fn role_names(ctx: &SerenityContext, guild_id: GuildId, roles: &[RoleId]) -> Vec<String> {
    let Some(guild) = ctx.cache.guild(guild_id) else {
        return roles.iter().map(ToString::to_string).collect();
    };
    roles
        .iter()
        .map(|role_id| {
            guild
                .roles
                .get(role_id)
                .map(|role| role.name.clone())
                .unwrap_or_else(|| role_id.to_string())
        })
        .collect()
}

fn member_profile(ctx: &SerenityContext, member: &Member) -> MemberProfile {
    MemberProfile {
        user_name: member.user.name.clone(),
        display_name: member.display_name().to_string(),
        roles: role_names(ctx, member.guild_id, &member.roles),
        is_booster: member.premium_since.is_some(),
    }
}

fn event_profile(ctx: &SerenityContext, event: &GuildMemberUpdateEvent) -> MemberProfile {
    let display_name = event
        .nick
        .clone()
        .or_else(|| event.user.global_name.clone())
        .unwrap_or_else(|| event.user.name.clone());
    MemberProfile {
        user_name: event.user.name.clone(),
        display_name,
        roles: role_names(ctx, event.guild_id, &event.roles),
        is_booster: event.premium_since.is_some(),
    }
}

/// Parent channel of `channel_id` when it is a cached thread.
fn thread_parent(
    ctx: &SerenityContext,
    guild_id: GuildId,
    channel_id: ChannelId,
) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .threads
        .iter()
        .find(|thread| thread.id == channel_id)
        .and_then(|thread| thread.parent_id)
}

/// Converts gateway events into [`CommunityEvent`]s and hands them to the router.
struct CollectorHandler {
    router: Arc<EventRouter>,
    presence: Arc<PresenceTracker>,
    ready_sender: Arc<AsyncMutex<Option<oneshot::Sender<()>>>>,
}

impl CollectorHandler {
    fn is_target(&self, guild_id: GuildId) -> bool {
        guild_id.get() == self.router.target_guild_id()
    }

    fn dispatch(&self, event: CommunityEvent) {
        self.router.dispatch(&event);
    }
}

#[serenity::async_trait]
impl SerenityEventHandler for CollectorHandler {
    async fn ready(&self, _ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({}), watching guild {}",
            ready.user.name,
            ready.user.id,
            self.router.target_guild_id()
        );
        if let Some(sender) = self.ready_sender.lock().await.take() {
            let _ = sender.send(());
        }
    }

    async fn guild_create(&self, _ctx: SerenityContext, guild: Guild, _is_new: Option<bool>) {
        if !self.is_target(guild.id) {
            return;
        }
        self.presence.seed(
            guild
                .presences
                .iter()
                .map(|(user_id, presence)| (user_id.to_string(), presence_status(presence.status))),
        );
        info!(
            "guild {} available: {} members, {} online",
            guild.name,
            guild.member_count,
            self.presence.tracked()
        );
    }

    async fn message(&self, ctx: SerenityContext, msg: SerenityMessage) {
        let (channel_id, thread_id) = match msg
            .guild_id
            .and_then(|guild_id| thread_parent(&ctx, guild_id, msg.channel_id))
        {
            Some(parent) => (parent.to_string(), Some(msg.channel_id.to_string())),
            None => (msg.channel_id.to_string(), None),
        };

        self.dispatch(CommunityEvent::MessageCreated(MessageCreated {
            message_id: msg.id.to_string(),
            guild_id: msg.guild_id.map(GuildId::get),
            author_id: msg.author.id.to_string(),
            author_is_bot: msg.author.bot,
            channel_id,
            thread_id,
            content: msg.content.clone(),
            created_at: to_datetime(&msg.timestamp).unwrap_or_else(Utc::now),
        }));
    }

    async fn guild_member_addition(&self, ctx: SerenityContext, member: Member) {
        let user_id = member.user.id.to_string();
        let status = self.presence.current(&user_id);
        self.dispatch(CommunityEvent::MemberJoined(MemberJoined {
            guild_id: member.guild_id.get(),
            user_id,
            user_name: member.user.name.clone(),
            display_name: Some(member.display_name().to_string()),
            is_bot: member.user.bot,
            is_booster: member.premium_since.is_some(),
            roles: role_names(&ctx, member.guild_id, &member.roles),
            joined_at: member.joined_at.as_ref().and_then(to_datetime),
            status,
            at: Utc::now(),
        }));
    }

    async fn guild_member_removal(
        &self,
        _ctx: SerenityContext,
        guild_id: GuildId,
        user: User,
        _member: Option<Member>,
    ) {
        self.dispatch(CommunityEvent::MemberLeft(MemberLeft {
            guild_id: guild_id.get(),
            user_id: user.id.to_string(),
            user_name: user.name.clone(),
            at: Utc::now(),
        }));
    }

    async fn guild_member_update(
        &self,
        ctx: SerenityContext,
        old: Option<Member>,
        new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        let after = match &new {
            Some(member) => member_profile(&ctx, member),
            None => event_profile(&ctx, &event),
        };
        self.dispatch(CommunityEvent::MemberUpdated(MemberUpdated {
            guild_id: event.guild_id.get(),
            user_id: event.user.id.to_string(),
            before: old.as_ref().map(|member| member_profile(&ctx, member)),
            after,
            at: Utc::now(),
        }));
    }

    async fn voice_state_update(
        &self,
        _ctx: SerenityContext,
        old: Option<VoiceState>,
        new: VoiceState,
    ) {
        self.dispatch(CommunityEvent::VoiceStateChanged(VoiceStateChanged {
            guild_id: new.guild_id.map(GuildId::get),
            user_id: new.user_id.to_string(),
            before_channel: old
                .and_then(|state| state.channel_id)
                .map(|channel| channel.to_string()),
            after_channel: new.channel_id.map(|channel| channel.to_string()),
            at: Utc::now(),
        }));
    }

    async fn thread_create(&self, _ctx: SerenityContext, thread: GuildChannel) {
        let created_at = thread
            .thread_metadata
            .as_ref()
            .and_then(|metadata| metadata.create_timestamp.as_ref())
            .and_then(to_datetime);
        self.dispatch(CommunityEvent::ThreadCreated(ThreadCreated {
            guild_id: thread.guild_id.get(),
            thread_id: thread.id.to_string(),
            owner_id: thread.owner_id.map(|owner| owner.to_string()),
            name: thread.name.clone(),
            parent_channel_id: thread.parent_id.map(|parent| parent.to_string()),
            created_at,
            at: Utc::now(),
        }));
    }

    async fn presence_update(&self, ctx: SerenityContext, new_data: Presence) {
        let user_id = new_data.user.id.to_string();
        let after = presence_status(new_data.status);
        let in_target = new_data.guild_id.is_none_or(|guild_id| self.is_target(guild_id));
        // Other guilds share user ids, so only the target guild feeds the tracker.
        let before = if in_target {
            self.presence.observe(&user_id, after)
        } else {
            self.presence.current(&user_id)
        };

        let user_name = new_data
            .user
            .name
            .clone()
            .or_else(|| ctx.cache.user(new_data.user.id).map(|user| user.name.clone()))
            .unwrap_or_else(|| user_id.clone());

        self.dispatch(CommunityEvent::PresenceChanged(PresenceChanged {
            guild_id: new_data.guild_id.map(GuildId::get),
            user_id,
            user_name,
            before,
            after,
            at: Utc::now(),
        }));
    }
}

#[derive(Debug)]
enum LoginError {
    Build(anyhow::Error),
    /// Discord refused the token or the requested intents; retrying cannot help.
    Rejected(anyhow::Error),
    Gateway(anyhow::Error),
}

impl LoginError {
    fn is_fatal(&self) -> bool {
        matches!(self, LoginError::Build(_) | LoginError::Rejected(_))
    }

    fn into_inner(self) -> anyhow::Error {
        match self {
            LoginError::Build(err) | LoginError::Rejected(err) | LoginError::Gateway(err) => err,
        }
    }
}

fn classify_gateway_error(err: SerenityError) -> LoginError {
    match err {
        SerenityError::Gateway(
            gateway_err @ (GatewayError::InvalidAuthentication
            | GatewayError::InvalidGatewayIntents
            | GatewayError::DisallowedGatewayIntents),
        ) => LoginError::Rejected(anyhow!("discord rejected the gateway login: {gateway_err}")),
        other => LoginError::Gateway(anyhow!("discord gateway stopped: {other}")),
    }
}

struct DiscordLoginState {
    is_logged_in: bool,
    gateway_task: Option<tokio::task::JoinHandle<()>>,
}

/// Gateway connection feeding the event router.
pub struct DiscordClient {
    token: SecretString,
    use_privileged_intents: bool,
    router: Arc<EventRouter>,
    presence: Arc<PresenceTracker>,
    login_state: AsyncMutex<DiscordLoginState>,
}

impl DiscordClient {
    pub fn new(config: &DiscordConfig, router: Arc<EventRouter>) -> Self {
        info!("initializing discord client");
        Self {
            token: SecretString::from(config.bot_token.clone()),
            use_privileged_intents: config.use_privileged_intents,
            router,
            presence: Arc::new(PresenceTracker::new()),
            login_state: AsyncMutex::new(DiscordLoginState {
                is_logged_in: false,
                gateway_task: None,
            }),
        }
    }

    fn intents(&self) -> GatewayIntents {
        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_VOICE_STATES;
        if self.use_privileged_intents {
            intents
                | GatewayIntents::GUILD_MEMBERS
                | GatewayIntents::GUILD_PRESENCES
                | GatewayIntents::MESSAGE_CONTENT
        } else {
            intents
        }
    }

    async fn login(&self) -> Result<(), LoginError> {
        let mut state = self.login_state.lock().await;
        if state.is_logged_in {
            return Ok(());
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let event_handler = CollectorHandler {
            router: self.router.clone(),
            presence: self.presence.clone(),
            ready_sender: Arc::new(AsyncMutex::new(Some(ready_tx))),
        };

        let mut gateway_client =
            SerenityClient::builder(self.token.expose_secret(), self.intents())
                .event_handler(event_handler)
                .await
                .map_err(|err| {
                    LoginError::Build(anyhow!("failed to build discord gateway client: {err}"))
                })?;

        let (exit_tx, exit_rx) = oneshot::channel();
        let gateway_task = tokio::spawn(async move {
            let result = gateway_client.start().await;
            if let Err(err) = &result {
                error!("discord gateway stopped: {err}");
            }
            let _ = exit_tx.send(result);
        });

        // Ready wins; otherwise the task's exit reason decides whether to retry.
        let startup = tokio::time::timeout(READY_TIMEOUT, async move {
            tokio::select! {
                Ok(()) = ready_rx => Ok(()),
                exit = exit_rx => Err(exit.ok().and_then(Result::err)),
            }
        })
        .await;

        match startup {
            Ok(Ok(())) => {
                state.is_logged_in = true;
                state.gateway_task = Some(gateway_task);
                info!("discord bot login succeeded and gateway is connected");
                Ok(())
            }
            Ok(Err(Some(err))) => {
                gateway_task.abort();
                Err(classify_gateway_error(err))
            }
            Ok(Err(None)) => {
                gateway_task.abort();
                Err(LoginError::Gateway(anyhow!(
                    "discord gateway exited before receiving Ready event"
                )))
            }
            Err(_) => {
                gateway_task.abort();
                Err(LoginError::Gateway(anyhow!(
                    "timed out waiting for discord Ready event"
                )))
            }
        }
    }

    /// Logs in, retrying gateway failures with exponential backoff. A client
    /// that cannot be built, or a token or intent set Discord rejects, is
    /// returned as an error.
    pub async fn start(&self) -> Result<()> {
        let mut retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;

        loop {
            match self.login().await {
                Ok(()) => {
                    info!("discord client is ready");
                    return Ok(());
                }
                Err(err) if err.is_fatal() => return Err(err.into_inner()),
                Err(err) => {
                    let err = err.into_inner();
                    error!("failed to start discord client: {err}. retrying in {retry_seconds} seconds");
                    tokio::time::sleep(Duration::from_secs(retry_seconds)).await;
                    retry_seconds = next_retry_seconds(retry_seconds);
                }
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if !state.is_logged_in {
            return Ok(());
        }

        if let Some(gateway_task) = state.gateway_task.take() {
            gateway_task.abort();
            match gateway_task.await {
                Ok(()) => info!("discord gateway task exited"),
                Err(join_err) if join_err.is_cancelled() => {
                    debug!("discord gateway task aborted")
                }
                Err(join_err) => {
                    error!("discord gateway task join error: {join_err}");
                }
            }
        }

        state.is_logged_in = false;
        info!(
            "discord client stopped with {} open voice sessions",
            self.router.open_voice_sessions()
        );
        Ok(())
    }
}

fn next_retry_seconds(current: u64) -> u64 {
    (current * 2).min(MAX_LOGIN_RETRY_SECONDS)
}
