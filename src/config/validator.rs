use thiserror::Error;

use super::Config;
use crate::buffer::FlushGroup;

/// One year.
pub(crate) const MAX_INTERVAL_MINUTES: u64 = 525_600;
/// One day.
pub(crate) const MAX_OFFSET_SECONDS: u64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.bot_token.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "discord.bot_token cannot be empty".to_string(),
            ));
        }

        if self.discord.target_guild_id == 0 {
            return Err(ConfigError::InvalidConfig(
                "discord.target_guild_id must be set".to_string(),
            ));
        }

        for group in FlushGroup::ALL {
            let minutes = self.schedule.interval_minutes(group);
            if minutes == 0 || minutes > MAX_INTERVAL_MINUTES {
                return Err(ConfigError::InvalidConfig(format!(
                    "schedule interval for {} must be between 1 and {MAX_INTERVAL_MINUTES} minutes",
                    group.as_str()
                )));
            }
        }

        if self.schedule.heartbeat_minutes > MAX_INTERVAL_MINUTES {
            return Err(ConfigError::InvalidConfig(format!(
                "schedule.heartbeat_minutes must be at most {MAX_INTERVAL_MINUTES}"
            )));
        }

        for (name, seconds) in [
            ("initial_delay_seconds", self.schedule.initial_delay_seconds),
            ("stagger_seconds", self.schedule.stagger_seconds),
        ] {
            if seconds > MAX_OFFSET_SECONDS {
                return Err(ConfigError::InvalidConfig(format!(
                    "schedule.{name} must be at most {MAX_OFFSET_SECONDS}"
                )));
            }
        }

        if self.warehouse.path.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "warehouse.path cannot be empty".to_string(),
            ));
        }

        if let Some(prefix) = &self.warehouse.table_prefix {
            if !is_valid_table_prefix(prefix) {
                return Err(ConfigError::InvalidConfig(format!(
                    "warehouse.table_prefix {prefix:?} may only contain ASCII letters, digits and '_'"
                )));
            }
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::InvalidConfig(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        if self.web.enabled && self.web.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "web.port must be between 1 and 65535".to_string(),
            ));
        }

        Ok(())
    }
}

/// Table names are interpolated into SQL, so the prefix is restricted to
/// identifier characters.
pub(crate) fn is_valid_table_prefix(prefix: &str) -> bool {
    prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::is_valid_table_prefix;

    #[test]
    fn table_prefix_accepts_identifier_characters() {
        assert!(is_valid_table_prefix(""));
        assert!(is_valid_table_prefix("staging_"));
        assert!(is_valid_table_prefix("Discord2024_"));
    }

    #[test]
    fn table_prefix_rejects_sql_punctuation() {
        assert!(!is_valid_table_prefix("a.b"));
        assert!(!is_valid_table_prefix("x`; DROP"));
        assert!(!is_valid_table_prefix("with space"));
    }
}
