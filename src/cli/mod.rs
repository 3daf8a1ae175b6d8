mod args;
mod config;
mod sessions;

pub use args::{
    Cli, CliCommand, ConfigCliArgs, ConfigCommand, ServeCliArgs, SessionsCliArgs,
};
pub use config::handle_config_command;
pub use sessions::{handle_sessions_command, render_sessions_table, SessionsClient};
