mod cli;
mod engine;
mod model;
mod orchestrator;
mod text_output;
#[cfg(feature = "tui")]
mod tui;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(&args)?;

    let is_text = args.is_text_mode();
    match cli::run(args).await {
        Ok(()) => {
            // Stdin readers can outlive the session in text mode; exit explicitly.
            if is_text {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Log to a file in TUI mode so output never lands on the alternate screen; text mode logs
/// warnings to stderr unless `--log-file` is given.
fn init_logging(args: &cli::Cli) -> Result<()> {
    let log_path = match (&args.log_file, args.is_text_mode()) {
        (Some(p), _) => Some(p.clone()),
        (None, false) => default_log_path(),
        (None, true) => None,
    };

    let Some(log_path) = log_path else {
        if !args.is_text_mode() {
            // No cache directory: drop logs rather than draw over the TUI.
            tracing_subscriber::fmt().with_writer(std::io::sink).init();
            return Ok(());
        }
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    };

    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create log directory {}", parent.display()))?;
        }
    }
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("open log file {}", log_path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();
    Ok(())
}

fn default_log_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("adventure-cli").join("adventure-cli.log"))
}
