//! Command line and logging
//!
//! Logging goes through `tracing-subscriber`. `RUST_LOG` takes precedence
//! over `--log-level`.

use crate::config::Config;
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Klians daemon command-line interface
#[derive(Parser, Debug)]
#[command(name = "klians-daemon")]
#[command(about = "Headless Klians client: feed, messages and announcements", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Set log level (error, warn, info, debug, trace)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    /// Show timestamps in logs (`--timestamps false` turns them off)
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, default_value_t = true)]
    pub timestamps: bool,

    /// Read configuration from this file instead of the default location
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// One-shot commands; without one the daemon runs until interrupted
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show current configuration
    DumpConfig {
        /// Show the account token
        #[arg(long)]
        show_sensitive: bool,
    },

    /// Load the feed once, print it and exit
    Feed,
}

/// Initialize logging based on CLI configuration
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(true)
        .with_line_number(true);

    match (cli.json_logs, cli.timestamps) {
        (true, true) => subscriber.json().init(),
        (true, false) => subscriber.without_time().json().init(),
        (false, true) => subscriber.init(),
        (false, false) => subscriber.without_time().init(),
    }

    info!(
        "Logging initialized: level={}, json={}, timestamps={}",
        log_level, cli.json_logs, cli.timestamps
    );

    Ok(())
}

/// Render the configuration as TOML, masking the token unless asked not to
pub fn dump_config(config: &Config, show_sensitive: bool) -> Result<String> {
    let mut shown = config.clone();
    if !show_sensitive && shown.account.token.is_some() {
        shown.account.token = Some("********".to_string());
    }
    toml::to_string_pretty(&shown).context("Failed to serialize config")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["klians-daemon"]);
        assert_eq!(cli.log_level, "info");
        assert!(!cli.json_logs);
        assert!(cli.timestamps);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_timestamps_can_be_disabled() {
        let cli = Cli::parse_from(["klians-daemon", "--timestamps", "false"]);
        assert!(!cli.timestamps);

        let cli = Cli::parse_from(["klians-daemon", "--timestamps=true"]);
        assert!(cli.timestamps);
    }

    #[test]
    fn test_cli_subcommand() {
        let cli = Cli::parse_from([
            "klians-daemon",
            "--json-logs",
            "dump-config",
            "--show-sensitive",
        ]);
        assert!(cli.json_logs);
        assert!(matches!(
            cli.command,
            Some(Command::DumpConfig {
                show_sensitive: true
            })
        ));
    }

    #[test]
    fn test_dump_config_masks_token() {
        let mut config = Config::default();
        config.account.token = Some("secret-token".to_string());

        let masked = dump_config(&config, false).unwrap();
        assert!(!masked.contains("secret-token"));
        assert!(masked.contains("********"));

        let shown = dump_config(&config, true).unwrap();
        assert!(shown.contains("secret-token"));
    }
}
