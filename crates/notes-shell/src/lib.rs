//! notes-shell library: Exposes the shell components for testing.
//!
//! This is a thin library layer over the `notes` binary, allowing
//! integration tests to drive the same command loop.

pub mod command;
pub mod config;
pub mod file_remote;
pub mod repl;

// Re-export key types for convenience
pub use command::{Command, ParseError, HELP};
pub use file_remote::JsonFileRemote;
pub use repl::{Reply, Shell};

use anyhow::{Context, Result};
use notes_core::{Config, DocumentStore, EventBus, Identity, SessionIdentity, Workspace};
use std::path::Path;
use std::sync::Arc;

/// Open the store file at `data` for `identity` and start a shell on it.
pub async fn open_shell(
    data: &Path,
    identity: &str,
    config: &Config,
    events: Arc<EventBus>,
) -> Result<Shell<JsonFileRemote, Arc<SessionIdentity>>> {
    let identity = Identity::new(identity).context("Invalid identity")?;
    let remote = JsonFileRemote::open(data)
        .await
        .with_context(|| format!("Failed to open store {:?}", data))?;
    let session = Arc::new(SessionIdentity::signed_in(identity));
    let store = Arc::new(DocumentStore::new(
        remote,
        session,
        config.kdf.params()?,
        config.users_root.clone(),
    ));
    let workspace = Workspace::open(store, events, &config.autosave).await?;
    Ok(Shell::new(workspace))
}
