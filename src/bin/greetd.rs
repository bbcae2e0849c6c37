use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use greetd::config::{Config, ConfigResolver, LogFormat, LogLevel, Overrides};
use greetd::engine::{message_from_words, MessageStore};
use greetd::server::{AppState, DirectorySource, Pages, Server};
use greetd::{logging, version};
use log::{error, info};
use serde::Serialize;
use tokio::signal;

/// A friendly greeting and message management CLI.
///
/// Serves a single persisted message over HTTP and lets it be changed from
/// the command line.
#[derive(Parser)]
#[command(name = "greetd", author, version, about)]
struct Cli {
    /// Config file path (default: <data path>/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// Directory holding config.json, message.json and app.log
    #[arg(long, global = true)]
    data_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API and web server
    Api {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Read page templates from this directory instead of the built-in ones
        #[arg(long)]
        templates_dir: Option<PathBuf>,
    },
    /// Print a friendly greeting
    Hello {
        #[arg(long)]
        name: Option<String>,
    },
    /// Print application health information
    Health,
    /// Print version information
    Version,
    /// Set application data
    Set {
        #[command(subcommand)]
        target: SetTarget,
    },
}

#[derive(Subcommand)]
enum SetTarget {
    /// Set the message that the API and web UI serve
    Message {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
}

#[derive(Serialize)]
struct HealthInfo {
    status: &'static str,
    version: version::Info,
    timestamp: DateTime<Utc>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut flags = Overrides {
        log_level: cli.log_level,
        log_format: cli.log_format,
        data_path: cli.data_path.clone(),
        ..Overrides::default()
    };

    match cli.command {
        Commands::Api {
            host,
            port,
            templates_dir,
        } => {
            flags.host = host;
            flags.port = port;
            let config = load_config(cli.config, &flags)?;
            run_api(config, templates_dir).await?;
        }
        Commands::Hello { name } => {
            let name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| "World".to_string());
            println!("Hello, {}!", name);
        }
        Commands::Health => {
            let health = HealthInfo {
                status: "ok",
                version: version::get(),
                timestamp: Utc::now(),
            };
            println!("{}", serde_json::to_string_pretty(&health)?);
        }
        Commands::Version => {
            println!("{}", version::get());
        }
        Commands::Set {
            target: SetTarget::Message { text },
        } => {
            let Some(message) = message_from_words(&text) else {
                bail!("message cannot be empty");
            };

            let config = load_config(cli.config, &flags)?;
            let store = MessageStore::new(&config.data_path)?;
            store.load().context("failed to load message store")?;
            store.set(&message).context("failed to set message")?;

            info!("Message updated from the command line");
            println!("Message set to: {}", message);
        }
    }

    Ok(())
}

/// Resolves the effective configuration and installs the logger.
fn load_config(explicit: Option<PathBuf>, flags: &Overrides) -> anyhow::Result<Config> {
    let config = ConfigResolver::new()
        .resolve(explicit.as_deref(), flags)
        .context("failed to load config")?;
    logging::init(&config.logging, &config.data_path).context("failed to set up logging")?;
    Ok(config)
}

async fn run_api(config: Config, templates_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let store = MessageStore::new(&config.data_path)?;
    store.load().context("failed to load message store")?;
    info!("Loaded message store from {}", store.path().display());

    let pages = match templates_dir {
        Some(dir) => {
            info!("Serving templates from {}", dir.display());
            Pages::new(DirectorySource::new(dir))
        }
        None => Pages::embedded(),
    };

    let state = AppState::new(Arc::new(store), pages, &config.data_path);
    let server = Server::new(config.bind_addr(), state);
    let listener = server
        .bind()
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))?;

    server.run(listener, shutdown_signal()).await?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
