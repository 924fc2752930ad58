pub use self::parser::{
    Config, DiscordConfig, LoggingConfig, ScheduleConfig, WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
