//! ServiceGPT CLI - terminal chat client

mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use commands::Commands;
use std::path::PathBuf;
use tracing::{Level, debug, error};

#[derive(Parser)]
#[command(name = "servicegpt")]
#[command(about = "Chat with ServiceGPT from the terminal")]
#[command(version)]
struct Cli {
    /// Set logging level
    #[arg(short = 'l', long, global = true, default_value = "warn")]
    log_level: LogLevel,

    /// Data directory for the session file, logs and default config
    #[arg(short = 'd', long, global = true)]
    data_dir: Option<PathBuf>,

    /// Configuration file (TOML, YAML or JSON)
    #[arg(short = 'c', long, global = true, env = "SERVICEGPT_CONFIG")]
    config: Option<PathBuf>,

    /// Request timeout in seconds (0 = no timeout)
    #[arg(short = 't', long, global = true)]
    timeout: Option<u64>,

    /// Disable file logging (only log to stderr)
    #[arg(long, global = true)]
    no_file_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = config::Settings::load(cli.config.as_deref())?;
    if let Some(timeout) = cli.timeout {
        settings.api.timeout_secs = timeout;
    }
    let data_dir = commands::data_dir(cli.data_dir.or_else(|| settings.data_dir.clone()));

    logging::init_logging(cli.log_level.into(), &data_dir, cli.no_file_log)?;

    debug!(base_url = %settings.api.base_url, data_dir = %data_dir.display(), "Starting ServiceGPT CLI");

    match cli.command.execute(settings, data_dir).await {
        Ok(()) => {
            debug!("Command completed successfully");
        }
        Err(e) => {
            error!("Command failed: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
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
