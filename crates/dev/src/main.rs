use clap::Parser;

mod config;
mod replay;
mod scenario;

use crate::config::{Config, SubCommand};

fn main() -> Result<(), anyhow::Error> {
    let config = Config::parse();
    // stdout carries the replay output
    if std::env::var_os("TICKREPLAY_LOG_TO_STDERR").is_none() {
        std::env::set_var("TICKREPLAY_LOG_TO_STDERR", "1");
    }
    match config.sub_command {
        SubCommand::Replay(replay_config) => {
            let file_config = replay_config.replay_config()?;
            let level = match config.additional.log_level {
                Some(level) => Some(level),
                None => file_config.log_level()?,
            };
            tickreplay::set_logger(level)?;
            let stdout = std::io::stdout();
            replay::replay(&replay_config, &file_config, &mut stdout.lock())
        }
    }
}
