//! CLI entry point for Coxy.

pub mod login;

use clap::{Args, Parser, Subcommand};

use crate::config::CoxyConfig;

/// Coxy Copilot proxy
#[derive(Parser, Debug)]
#[command(name = "coxy", version, about = "Coxy: GitHub Copilot credential proxy")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the edge gateway (routes /api to the backend, the rest to the frontend)
    Gateway(ListenArgs),
    /// Run the backend API service
    Backend(ListenArgs),
    /// Log in with the GitHub device flow from the terminal
    Login(LoginArgs),
}

/// Listener overrides for the server subcommands.
#[derive(Args, Debug, Default)]
pub struct ListenArgs {
    /// Address to bind (overrides HOST / BACKEND_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind (overrides PORT / BACKEND_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl ListenArgs {
    pub fn apply_to_gateway(&self, config: &mut CoxyConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
    }

    pub fn apply_to_backend(&self, config: &mut CoxyConfig) {
        if let Some(host) = &self.host {
            config.backend_host = host.clone();
        }
        if let Some(port) = self.port {
            config.backend_port = port;
        }
    }
}

/// Arguments for `coxy login`.
#[derive(Args, Debug)]
pub struct LoginArgs {
    /// Skip exchanging the new token for a Copilot token
    #[arg(long)]
    pub no_verify: bool,
}
