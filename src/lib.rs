//! Coxy: credential-exchanging reverse proxy for the GitHub Copilot chat API.
//!
//! Callers authenticate with a long-lived GitHub token. The backend exchanges
//! it for a short-lived Copilot token (cached per caller), injects that token
//! into chat requests, and streams the upstream response back. A gateway in
//! front splits traffic between the backend and the web UI.
//!
//! # Quick Start
//!
//! ```no_run
//! use coxy::config::CoxyConfig;
//!
//! # async fn example() -> coxy::error::Result<()> {
//! let config = CoxyConfig::from_env();
//! let shutdown = coxy::server::shutdown_on_signal();
//! coxy::server::run(&config, shutdown).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod http;
pub mod prelude;
pub mod proxy;
pub mod server;

#[cfg(feature = "cli")]
pub mod cli;
