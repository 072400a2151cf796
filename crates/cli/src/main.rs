//! Webistream CLI

mod commands;
mod logging;
mod router;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::{App, Commands};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info};
use webistream_core::ClientConfig;
use webistream_core::config::resolve_data_dir;

/// How long to wait for pending navigation after the command finished
const ROUTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "webistream")]
#[command(about = "Command-line client for the Webistream API")]
#[command(version)]
struct Cli {
    /// Set logging level
    #[arg(short = 'l', long, global = true, default_value = "info")]
    log_level: LogLevel,

    /// Data directory for credentials, config and logs
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (defaults to webistream.toml in the data directory)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Timeout for the whole command in seconds (0 = no timeout)
    #[arg(short = 't', long, global = true, default_value = "60")]
    timeout: u64,

    /// Disable file logging (only log to stderr)
    #[arg(long, global = true)]
    no_file_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let data_dir = resolve_data_dir(cli.data_dir.clone());
    commands::ensure_data_dir(&data_dir)?;
    logging::init_logging(cli.log_level.clone().into(), &data_dir, cli.no_file_log)?;

    let config = ClientConfig::load(cli.config.as_deref(), &data_dir)?;
    info!(api_url = %config.api_url, data_dir = %data_dir.display(), "Starting Webistream CLI");

    let app = App::open(config, data_dir)?;
    let store = Arc::clone(app.session.store());
    commands::show_persisted_toast(store.as_ref());

    let navigation = app
        .router
        .follow(app.session.subscribe(), app.config.login_path.clone());

    // Execute command with optional timeout
    let outcome = if cli.timeout == 0 {
        cli.command.execute(&app).await
    } else {
        let timeout_duration = Duration::from_secs(cli.timeout);
        match tokio::time::timeout(timeout_duration, cli.command.execute(&app)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "Command timed out after {} seconds",
                cli.timeout
            )),
        }
    };

    // closing the session ends the event stream the router follows
    let App { router, session, config, .. } = app;
    drop(session);
    let _ = tokio::time::timeout(ROUTER_DRAIN_TIMEOUT, navigation).await;

    if router.current() == config.login_path {
        commands::show_persisted_toast(store.as_ref());
        eprintln!("Run `webistream login` to sign in again.");
    }

    match outcome {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {e}");
            std::process::exit(1);
        }
    }
}

#[derive(Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        match log_level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}
