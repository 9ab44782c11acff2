//! ServiceAtlas CLI

use anyhow::{Context, Result};
use atlas_config::{Config, LoggingConfig};
use atlas_runtime::{ServerBuilder, SignalHandler};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "atlas")]
#[command(about = "ServiceAtlas service registry and gateway", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the registry server
    Serve {
        /// Path to configuration file; defaults apply when omitted
        #[arg(short, long, env = "ATLAS_CONFIG")]
        config: Option<PathBuf>,

        /// Log level or filter directive; overrides the config file
        #[arg(short, long, env = "ATLAS_LOG_LEVEL")]
        log_level: Option<String>,

        /// Log output format; overrides the config file
        #[arg(long, value_enum)]
        log_format: Option<LogFormat>,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "atlas.yaml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => atlas_config::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            log_level,
            log_format,
        } => {
            let path = config;
            let loaded = load(path.as_deref());
            let logging = loaded
                .as_ref()
                .map(|c| c.logging.clone())
                .unwrap_or_default();
            init_tracing(&logging, log_level.as_deref(), log_format)?;
            let config = loaded?;

            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                config = ?path.as_ref().map(|p| p.display().to_string()),
                "Starting ServiceAtlas"
            );
            tracing::info!(
                listen = %config.server.listen,
                probing = config.health.enabled,
                interval = ?config.health.interval,
                "Configuration loaded"
            );

            let server = ServerBuilder::new().config(config).build().await?;

            let shutdown_signal = server.shutdown_signal();
            tokio::spawn(async move {
                SignalHandler::new(shutdown_signal).run().await;
            });

            server.run().await?;
            Ok(())
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match atlas_config::load(&config) {
                Ok(cfg) => {
                    tracing::info!("Configuration is valid");
                    tracing::info!("  Listen: {}", cfg.server.listen);
                    tracing::info!("  Storage: {:?}", cfg.storage);
                    tracing::info!("  Services: {}", cfg.services.len());
                    tracing::info!("  Dependencies: {}", cfg.dependencies.len());
                    tracing::info!("  Routes: {}", cfg.routes.len());
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("ServiceAtlas");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

/// `RUST_LOG` wins, then the CLI flag, then the config file
fn init_tracing(
    logging: &LoggingConfig,
    level: Option<&str>,
    format: Option<LogFormat>,
) -> Result<()> {
    let directive = level.unwrap_or(&logging.level);
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log level '{directive}'"))?,
    };

    let json = match format {
        Some(format) => format == LogFormat::Json,
        None => logging.format.eq_ignore_ascii_case("json"),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false).with_level(true))
            .init();
    }

    Ok(())
}
