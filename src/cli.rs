use std::path::PathBuf;

use clap::Parser;

/// Collects Discord community activity into an analytics warehouse.
#[derive(Debug, Parser)]
#[command(name = "community-metrics-collector", version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,

    /// Overrides `logging.level` (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Load and validate the configuration, then exit
    #[arg(long)]
    pub check_config: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_flags() {
        let cli = Cli::try_parse_from([
            "community-metrics-collector",
            "--config",
            "/etc/collector.yaml",
            "-l",
            "debug",
            "--check-config",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/collector.yaml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.check_config);
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["community-metrics-collector", "--bogus"]).is_err());
    }
}
