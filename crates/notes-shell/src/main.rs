//! notes: interactive shell over an encrypted note store.
//!
//! Reads commands from stdin while remote snapshots and autosaves are
//! handled in the same loop, so an idle prompt still saves.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use notes_core::{Config, EventBus, NotificationLevel, WorkspaceEvent};
use notes_shell::{open_shell, Command, Reply};

#[derive(Parser, Debug)]
#[command(name = "notes")]
#[command(about = "Encrypted hierarchical notes")]
struct Args {
    /// Identity of the signed-in user
    #[arg(short, long, env = "NOTES_IDENTITY")]
    identity: String,

    /// Path to the JSON store file
    #[arg(short, long, env = "NOTES_DATA", default_value = "notes.json")]
    data: PathBuf,

    /// Directory holding config.json (defaults are used without one)
    #[arg(long, env = "NOTES_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Filter used when `RUST_LOG` is not set: info, or debug with --verbose.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug,notes_shell=debug,notes_core=debug"
    } else {
        "info,notes_shell=info,notes_core=info"
    }
}

fn prompt() {
    print!("> ");
    // Prompt only; a failed flush shows up on the next println
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so they don't interleave with command output
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(args.verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config_dir {
        Some(dir) => notes_shell::config::load(dir)?,
        None => Config::default(),
    };
    info!("Store file: {:?}", args.data);

    let events = Arc::new(EventBus::new());
    let _notifications = events.subscribe(|event| {
        if let WorkspaceEvent::Notification { level, message } = event {
            let tag = match level {
                NotificationLevel::Info => "info",
                NotificationLevel::Warning => "warning",
                NotificationLevel::Error => "error",
            };
            eprintln!("[{}] {}", tag, message);
        }
    });

    let mut shell = open_shell(&args.data, &args.identity, &config, events).await?;
    println!("Signed in as {}. Type `help` for commands.", args.identity);
    prompt();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match Command::parse(&line) {
                    Ok(None) => {}
                    Ok(Some(command)) => match shell.execute(command).await {
                        Ok(Reply::Text(text)) => println!("{}", text),
                        Ok(Reply::Quit) => break,
                        Err(e) => println!("error: {:#}", e),
                    },
                    Err(e) => println!("error: {}", e),
                }
                prompt();
            }

            _ = shell.workspace_mut().step() => {}

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    if let Err(e) = shell.workspace_mut().sign_out().await {
        error!("Unsaved changes could not be written: {}", e);
        return Err(e).context("Failed to save before exit");
    }
    println!();
    Ok(())
}
