//! Coxy CLI binary entry point.

use clap::Parser;
use coxy::cli::{Cli, Commands};
use coxy::config::CoxyConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut config = CoxyConfig::from_env();
    let shutdown = coxy::server::shutdown_on_signal();

    let result: Result<(), Box<dyn std::error::Error>> = match cli.command {
        Commands::Gateway(args) => {
            args.apply_to_gateway(&mut config);
            coxy::gateway::run(&config, shutdown).await.map_err(Into::into)
        }
        Commands::Backend(args) => {
            args.apply_to_backend(&mut config);
            coxy::server::run(&config, shutdown).await.map_err(Into::into)
        }
        Commands::Login(args) => {
            coxy::cli::login::handle_login(&config, !args.no_verify, shutdown).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
