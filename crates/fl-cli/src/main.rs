use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fl_cli::commands::{alerts, report};
use fl_cli::{Cli, Commands, Config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing with verbose flag support
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = cli.command else {
        // No subcommand, show help
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async {
        match command {
            Commands::Report {
                frame,
                source,
                input,
                now,
                top,
                json,
            } => {
                let options = report::ReportOptions {
                    frame,
                    source,
                    input,
                    now,
                    top,
                    json,
                };
                report::run(&config, &options).await
            }
            Commands::Check { json } => alerts::check(&config, json).await,
            Commands::Watch => alerts::watch(&config).await,
            Commands::Snooze { id, minutes } => alerts::snooze(&config, &id, minutes).await,
        }
    })
}
