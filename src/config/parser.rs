use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::buffer::FlushGroup;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub discord: DiscordConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(alias = "target_server_id")]
    pub target_guild_id: u64,
    #[serde(default = "default_use_privileged_intents")]
    pub use_privileged_intents: bool,
}

/// Flush intervals are in minutes, startup offsets in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_members_minutes")]
    pub members_minutes: u64,
    #[serde(default = "default_messages_minutes")]
    pub messages_minutes: u64,
    #[serde(default = "default_voice_minutes")]
    pub voice_minutes: u64,
    #[serde(default = "default_threads_minutes")]
    pub threads_minutes: u64,
    #[serde(default = "default_presence_minutes")]
    pub presence_minutes: u64,
    #[serde(default = "default_initial_delay_seconds")]
    pub initial_delay_seconds: u64,
    #[serde(default = "default_stagger_seconds")]
    pub stagger_seconds: u64,
    #[serde(default = "default_heartbeat_minutes")]
    pub heartbeat_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            members_minutes: default_members_minutes(),
            messages_minutes: default_messages_minutes(),
            voice_minutes: default_voice_minutes(),
            threads_minutes: default_threads_minutes(),
            presence_minutes: default_presence_minutes(),
            initial_delay_seconds: default_initial_delay_seconds(),
            stagger_seconds: default_stagger_seconds(),
            heartbeat_minutes: default_heartbeat_minutes(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval_minutes(&self, group: FlushGroup) -> u64 {
        match group {
            FlushGroup::Members => self.members_minutes,
            FlushGroup::Messages => self.messages_minutes,
            FlushGroup::Voice => self.voice_minutes,
            FlushGroup::Threads => self.threads_minutes,
            FlushGroup::Presence => self.presence_minutes,
        }
    }

    pub fn interval(&self, group: FlushGroup) -> Duration {
        Duration::from_secs(self.interval_minutes(group).saturating_mul(60))
    }

    /// Delay before the first flush of `group`, growing with its position in
    /// [`FlushGroup::ALL`] so no two groups hit the warehouse together.
    pub fn first_flush_delay(&self, group: FlushGroup) -> Duration {
        let position = FlushGroup::ALL
            .iter()
            .position(|candidate| *candidate == group)
            .unwrap_or_default() as u64;
        Duration::from_secs(
            self.initial_delay_seconds
                .saturating_add(position.saturating_mul(self.stagger_seconds)),
        )
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_minutes.max(1).saturating_mul(60))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarehouseConfig {
    pub path: String,
    #[serde(default)]
    pub table_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Self::from_yaml_with_env(content, |name| std::env::var(name).ok())
    }

    /// Parses and validates `content`, taking overrides from `env` instead of
    /// the process environment.
    pub fn from_yaml_with_env<F>(content: &str, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env_overrides(&env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env("DISCORD_BOT_TOKEN") {
            self.discord.bot_token = value;
        }
        if let Some(value) = env_u64(env, "TARGET_SERVER_ID")? {
            self.discord.target_guild_id = value;
        }
        if let Some(value) = env("WAREHOUSE_PATH") {
            self.warehouse.path = value;
        }
        if let Some(value) = env_u64(env, "MEMBER_UPDATE_INTERVAL")? {
            self.schedule.members_minutes = value;
        }
        if let Some(value) = env_u64(env, "MESSAGE_UPDATE_INTERVAL")? {
            self.schedule.messages_minutes = value;
        }
        if let Some(value) = env_u64(env, "VOICE_UPDATE_INTERVAL")? {
            self.schedule.voice_minutes = value;
        }
        if let Some(value) = env_u64(env, "THREAD_UPDATE_INTERVAL")? {
            self.schedule.threads_minutes = value;
        }
        if let Some(value) = env_u64(env, "PRESENCE_UPDATE_INTERVAL")? {
            self.schedule.presence_minutes = value;
        }
        Ok(())
    }
}

fn env_u64<F>(env: &F, name: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match env(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidConfig(format!("{name} must be an integer"))),
        None => Ok(None),
    }
}

fn default_use_privileged_intents() -> bool {
    true
}

fn default_members_minutes() -> u64 {
    60
}

fn default_messages_minutes() -> u64 {
    60
}

fn default_voice_minutes() -> u64 {
    60
}

fn default_threads_minutes() -> u64 {
    720
}

fn default_presence_minutes() -> u64 {
    1440
}

fn default_initial_delay_seconds() -> u64 {
    60
}

fn default_stagger_seconds() -> u64 {
    300
}

fn default_heartbeat_minutes() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9005
}
