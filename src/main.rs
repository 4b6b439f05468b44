//! hubbard-scf CLI entry point.

use clap::Parser;

use hubbard_scf::cli::{handle_error, load_config, Cli, Commands};
use hubbard_scf::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Run(args) => hubbard_scf::cli::commands::run::execute(args, config, cli.json).await,
        Commands::History(args) => {
            hubbard_scf::cli::commands::history::execute(args, config, cli.json).await
        }
        Commands::Config(args) => hubbard_scf::cli::commands::config::execute(args, config, cli.json),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
