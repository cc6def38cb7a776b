use crate::engine::{GameBackend, HttpBackend};
use crate::model::{ClientConfig, PollConfig, SessionEvent};
use crate::orchestrator::{fetch_character, CommandController, StartOutcome, SubmitOutcome};
use crate::text_output::{OutputLine, TextRenderer};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::info;

/// Closes text mode locally. Everything else, `quit` included, goes to the narrator.
const LOCAL_QUIT: &str = ":q";

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "adventure-cli",
    version,
    about = "Terminal front end for a narrated text adventure"
)]
pub struct Cli {
    /// Base URL of the game server
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    pub base_url: String,

    /// Line-based mode: read commands from stdin, print the transcript to stdout (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Like --text, but print each transcript entry as a JSON line
    #[arg(long)]
    pub json: bool,

    /// Delay between status checks while a command is being processed
    #[arg(long, default_value = "2s")]
    pub poll_interval: humantime::Duration,

    /// Status checks allowed per command before giving up
    #[arg(long, default_value_t = 30)]
    pub poll_budget: u32,

    /// Timeout for each HTTP request
    #[arg(long, default_value = "30s")]
    pub request_timeout: humantime::Duration,

    /// Use --start-on-launch true or --start-on-launch false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub start_on_launch: bool,

    /// Quick command bound to F1..F4 in the TUI (repeatable)
    #[arg(long = "suggestion")]
    pub suggestions: Vec<String>,

    /// Write logs to this file (TUI mode logs to the cache directory by default)
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,
}

impl Cli {
    pub fn is_text_mode(&self) -> bool {
        self.text || self.json || !cfg!(feature = "tui")
    }
}

pub const DEFAULT_SUGGESTIONS: [&str; 4] = [
    "look around",
    "check inventory",
    "search the room",
    "talk to the innkeeper",
];

pub async fn run(args: Cli) -> Result<()> {
    if args.poll_budget == 0 {
        return Err(anyhow::anyhow!("--poll-budget must be at least 1"));
    }

    if !args.is_text_mode() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
    }

    run_text(args).await
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    let suggestions = if args.suggestions.is_empty() {
        DEFAULT_SUGGESTIONS.iter().map(|s| s.to_string()).collect()
    } else {
        args.suggestions.clone()
    };
    ClientConfig {
        base_url: args.base_url.clone(),
        poll: PollConfig {
            interval: Duration::from(args.poll_interval),
            deadline_attempts: args.poll_budget,
        },
        request_timeout: Duration::from(args.request_timeout),
        user_agent: format!("adventure-cli/{}", env!("CARGO_PKG_VERSION")),
        start_on_launch: args.start_on_launch,
        suggestions,
    }
}

pub fn is_local_quit(line: &str) -> bool {
    line.trim() == LOCAL_QUIT
}

async fn run_text(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let backend: Arc<dyn GameBackend> = Arc::new(HttpBackend::new(&cfg)?);
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<SessionEvent>();

    let json = args.json;
    let printer_tx = out_tx.clone();
    let printer = tokio::spawn(async move {
        let mut renderer = TextRenderer::new(json);
        while let Some(ev) = evt_rx.recv().await {
            match renderer.render(&ev, time::OffsetDateTime::now_utc()) {
                Ok(lines) => {
                    for line in lines {
                        let _ = printer_tx.send(line);
                    }
                }
                Err(e) => {
                    let _ = printer_tx.send(OutputLine::Stderr(format!("{e:#}")));
                }
            }
        }
    });

    let mut ctl = CommandController::new(backend.clone(), cfg.poll, evt_tx.clone());
    ctl.publish();
    if cfg.start_on_launch {
        ctl.start_session().await;
    } else {
        let _ = out_tx.send(OutputLine::Stderr(
            "Press Enter to begin the adventure.".into(),
        ));
    }
    refresh_character(backend.as_ref(), &evt_tx).await;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while !ctl.session().ended() {
        let Some(line) = lines.next_line().await.context("read stdin")? else {
            break;
        };
        if is_local_quit(&line) {
            info!("quit requested from text mode");
            break;
        }
        if !ctl.session().started() {
            if ctl.start_session().await == StartOutcome::Started {
                refresh_character(backend.as_ref(), &evt_tx).await;
            }
            continue;
        }
        if ctl.submit_command(&line).await == SubmitOutcome::Completed {
            refresh_character(backend.as_ref(), &evt_tx).await;
        }
    }

    drop(ctl);
    drop(evt_tx);
    let _ = printer.await;
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

async fn refresh_character(
    backend: &dyn GameBackend,
    evt_tx: &mpsc::UnboundedSender<SessionEvent>,
) {
    if let Some(sheet) = fetch_character(backend).await {
        let _ = evt_tx.send(SessionEvent::Character(Box::new(sheet)));
    }
}
