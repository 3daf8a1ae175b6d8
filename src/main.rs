use anyhow::Result;
use clap::Parser;
use rallycall::{
    app,
    cli::{handle_config_command, handle_sessions_command, Cli, CliCommand},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("rallycall {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(CliCommand::Config(args)) => handle_config_command(args),
        Some(CliCommand::Sessions(args)) => handle_sessions_command(args).await,
        Some(CliCommand::Serve(args)) => app::run_service(args.dry_run).await,
        None => app::run_service(false).await,
    }
}
