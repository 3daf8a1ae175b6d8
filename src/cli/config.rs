use crate::config::Config;
use anyhow::{Context, Result};

use super::args::{ConfigCliArgs, ConfigCommand};

const REDACTED: &str = "<redacted>";

pub fn handle_config_command(args: ConfigCliArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", Config::config_path()?.display());
        }
        ConfigCommand::Show => {
            let mut config = Config::load()?;
            if !config.discord.token.is_empty() {
                config.discord.token = REDACTED.to_string();
            }
            let rendered =
                toml::to_string_pretty(&config).context("Failed to serialize config")?;
            println!("{rendered}");

            if let Err(e) = config.validate() {
                eprintln!("Warning: configuration is incomplete: {e}");
            }
        }
    }
    Ok(())
}
