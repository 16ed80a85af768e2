//! Arbiter CLI entry point.

use clap::Parser;

use arbiter::cli::{commands, handle_error, runtime, Cli, Commands};
use arbiter::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // Classification needs neither configuration nor logging
    if let Commands::Classify(args) = &cli.command {
        if let Err(err) = commands::classify::execute(args, cli.json) {
            handle_error(&err, cli.json);
        }
        return;
    }

    let logging = match runtime::load_config(config_path) {
        Ok(config) => config.logging,
        // init must work before a valid configuration exists
        Err(_) if matches!(cli.command, Commands::Init(_)) => Default::default(),
        Err(err) => handle_error(&err, cli.json),
    };
    let _logger = match LoggerImpl::init(&logging) {
        Ok(logger) => logger,
        Err(err) => handle_error(&err, cli.json),
    };

    let result = match cli.command {
        Commands::Init(args) => commands::init::execute(args, cli.json).await,
        Commands::Query(args) => commands::query::execute(args, config_path, cli.json).await,
        Commands::Status => commands::status::execute(config_path, cli.json).await,
        Commands::Clone(args) => commands::clone::execute(args, config_path, cli.json).await,
        Commands::Classify(_) => Ok(()),
    };

    if let Err(err) = result {
        handle_error(&err, cli.json);
    }
}
