use std::path::PathBuf;

use tickreplay::{ReplayConfig, Time};
use tracing::level_filters::LevelFilter;

#[derive(clap::Parser, Clone)]
#[clap(name = "tickreplay development tool")]
#[clap(version)]
pub struct Config {
    #[clap(subcommand)]
    pub sub_command: SubCommand,
    #[clap(flatten)]
    pub additional: BaseConfig,
}

#[derive(clap::Parser, Clone)]
pub struct BaseConfig {
    /// Log level used when `RUST_LOG` is not set. Overrides the configuration file.
    #[arg(long, global = true, env = "TICKREPLAY_LOG_LEVEL")]
    pub(crate) log_level: Option<LevelFilter>,
}

#[derive(clap::Subcommand, Clone)]
pub enum SubCommand {
    Replay(ReplayCliConfig),
}

/// Replays a scenario file and prints every record as a JSON line.
#[derive(clap::Parser, Clone)]
pub struct ReplayCliConfig {
    /// Scenario file (`.toml` or `.json`) with the series and queries to replay.
    #[arg(long)]
    pub(crate) input: PathBuf,
    /// Replay configuration file (`.toml` or `.json`).
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    /// Default period for periodic operators. Overrides the configuration file.
    #[arg(long, env = "TICKREPLAY_PERIOD")]
    pub(crate) period: Option<Time>,
    /// Print records of all queries in global clock order instead of per query.
    #[arg(long)]
    pub(crate) merged: bool,
}

impl ReplayCliConfig {
    /// Loads the configuration file, if any, with command-line overrides applied.
    pub fn replay_config(&self) -> anyhow::Result<ReplayConfig> {
        let mut config = match &self.config {
            Some(path) => ReplayConfig::load(path)?,
            None => ReplayConfig::default(),
        };
        if let Some(period) = self.period {
            config.period = Some(period);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_replay_command() {
        let config = Config::parse_from([
            "tickreplay-dev",
            "replay",
            "--input",
            "scenario.toml",
            "--period",
            "5",
            "--merged",
            "--log-level",
            "warn",
        ]);
        assert_eq!(config.additional.log_level, Some(LevelFilter::WARN));
        let SubCommand::Replay(replay) = config.sub_command;
        assert_eq!(replay.input, PathBuf::from("scenario.toml"));
        assert!(replay.merged);
        assert_eq!(replay.replay_config().unwrap().period, Some(5));
    }
}
