// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Workspace Gateway CLI
//!
//! The `wsgw` binary runs the gateway control plane and ships a few
//! operator tools around it.
//!
//! ## Commands
//!
//! - `wsgw serve` - Run the control plane with health probes and background tasks
//! - `wsgw config show|validate|generate` - Configuration management
//! - `wsgw token issue|inspect|keygen` - Capability token tooling for development

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use gateway_core::domain::gateway_config::{GatewayConfig, LoggingConfig};

mod commands;

use commands::{ConfigCommand, TokenCommand};

/// Workspace Gateway - security and reliability control plane
#[derive(Parser)]
#[command(name = "wsgw")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "WSGW_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to the config value.
    #[arg(long, global = true, env = "WSGW_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway control plane
    #[command(name = "serve")]
    Serve,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Capability token tooling
    #[command(name = "token")]
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config when it loads; a broken config is
    // reported by the command itself.
    let logging = GatewayConfig::load_or_default(cli.config.clone())
        .map(|config| config.spec.observability.logging)
        .unwrap_or_default();
    init_logging(cli.log_level.as_deref(), &logging)?;

    match cli.command {
        Some(Commands::Serve) => commands::serve::run(cli.config).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::Token { command }) => {
            commands::token::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging.
///
/// `RUST_LOG` wins, then `--log-level`, then the configured level.
fn init_logging(level_override: Option<&str>, logging: &LoggingConfig) -> Result<()> {
    let level = level_override.unwrap_or(&logging.level);
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
