use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "rallycall")]
#[command(about = "Party recruitment with temporary voice channels", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the recruitment service (default)
    Serve(ServeCliArgs),
    /// Print version information
    Version,
    /// Inspect the configuration file
    Config(ConfigCliArgs),
    /// List live recruitments of a running service
    Sessions(SessionsCliArgs),
}

#[derive(ClapArgs, Debug, Default)]
pub struct ServeCliArgs {
    /// Use the in-memory platform instead of talking to Discord
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigCliArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration (token redacted)
    Show,
    /// Print the configuration file location
    Path,
}

#[derive(ClapArgs, Debug)]
pub struct SessionsCliArgs {
    /// Base URL of the running service (default: from config)
    #[arg(long)]
    pub url: Option<String>,
}
