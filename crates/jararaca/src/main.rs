mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use jararaca_config::{Config, ConfigError};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A broken config is reported by the command that needs it.
    let loaded = jararaca_config::load_config(cli.global.config.as_deref());
    let filter = loaded.as_ref().map_or("warn", |config| config.logging.filter.as_str());
    init_tracing(cli.global.verbose, filter);

    if let Err(err) = run(cli, loaded).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, configured: &str) {
    let filter = match verbosity {
        0 => configured,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, loaded: Result<Config, ConfigError>) -> Result<(), CliError> {
    match cli.command {
        Command::Config(args) => commands::config_cmd::handle(args, loaded, &cli.global),

        Command::Key(args) => {
            let config = commands::effective_config(loaded?, &cli.global)?;
            commands::key::handle(&args, &config, &cli.global)
        }

        Command::Request(args) => {
            let config = commands::effective_config(loaded?, &cli.global)?;
            tracing::debug!(method = %args.method, path = %args.path, "dispatching request");
            commands::request::handle(args, &config, &cli.global).await
        }

        Command::Listen(args) => {
            let config = commands::effective_config(loaded?, &cli.global)?;
            commands::listen::handle(args, &config, &cli.global).await
        }
    }
}
