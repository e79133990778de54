//! `FleetChat`: employee-to-customer live chat in the terminal.
//!
//! Connects to a relay over REST and a WebSocket push channel, then reads
//! commands and messages from stdin. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/fleetchat/config.toml`).
//!
//! ```bash
//! # Employee console
//! cargo run --bin fleetchat -- --api-url http://127.0.0.1:9000 --id emp-1 --name Dana
//!
//! # Customer portal
//! FLEETCHAT_ROLE=customer FLEETCHAT_ID=42 cargo run --bin fleetchat
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use fleetchat::api::http::HttpChatApi;
use fleetchat::chat::{SessionEvent, SessionHandle, TerminalBell, spawn_session};
use fleetchat::config::{CliArgs, ClientConfig};
use fleetchat::shell::{self, ShellInput};
use fleetchat::transport::ws::WsConnector;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file so they don't interleave with the chat output.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("fleetchat starting");
    let code = match run(&config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            tracing::error!(err = %e, "fleetchat failed");
            ExitCode::FAILURE
        }
    };
    tracing::info!("fleetchat exiting");
    code
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("fleetchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let identity = config.identity()?;
    let api_url = config.api_url()?;
    let push_url = config.push_url()?;

    let api = Arc::new(HttpChatApi::new(api_url.as_str(), config.request_timeout)?);
    let connector = WsConnector::new(push_url, config.reconnect.clone())
        .with_connect_timeout(config.request_timeout);

    tracing::info!(%identity, api = %api_url, push = %connector.url(), "starting chat session");
    println!("signed in as {identity}. type /help for commands.");

    let mut handle = spawn_session(
        identity,
        config.session_config(),
        api,
        connector,
        TerminalBell,
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&handle, &line, config).await? {
                    break;
                }
            }
            event = handle.next_event() => {
                let Some(event) = event else { break };
                print_event(&handle, event, config).await;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Apply one typed line. Returns `false` when the user asked to quit.
async fn handle_line(
    handle: &SessionHandle,
    line: &str,
    config: &ClientConfig,
) -> Result<bool, Box<dyn std::error::Error>> {
    let input = shell::parse_line(line);
    match input {
        ShellInput::Quit => return Ok(false),
        ShellInput::Empty => {}
        ShellInput::Help => println!("{}", shell::HELP),
        ShellInput::Invalid(reason) => println!("{reason}"),
        ShellInput::Show => {
            let snapshot = handle.snapshot().await?;
            println!("{}", shell::render_snapshot(&snapshot, &config.timestamp_format));
        }
        other => {
            if let Some(command) = other.into_command() {
                handle.send(command).await?;
            }
        }
    }
    Ok(true)
}

async fn print_event(handle: &SessionHandle, event: SessionEvent, config: &ClientConfig) {
    match event {
        SessionEvent::MessagesChanged { .. } | SessionEvent::ScrollToLatest { .. } => {
            // Only the active conversation is printed.
            if let Ok(snapshot) = handle.snapshot().await
                && let Some(latest) = snapshot.messages.first()
            {
                println!(
                    "{}",
                    shell::render_message(latest, snapshot.identity.role, &config.timestamp_format)
                );
            }
        }
        SessionEvent::DirectoryChanged { entries, badge } => {
            println!("-- conversations (unread {badge}) --");
            for row in shell::render_entries(&entries) {
                println!("{row}");
            }
        }
        SessionEvent::SendRejected(reason) => println!("not sent: {reason}"),
        SessionEvent::ConnectionChanged(state) => println!("[{state}]"),
        SessionEvent::Error(message) => println!("error: {message}"),
    }
}
