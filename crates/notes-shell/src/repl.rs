//! Command execution and plain-text rendering over a Workspace.

use crate::command::{Command, HELP};
use anyhow::{bail, Result};
use notes_core::{IdentityProvider, RemoteStore, SyncStatus, Workspace};
use std::fmt::Write as _;

/// What the caller should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Quit,
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub fn status_label(status: SyncStatus) -> &'static str {
    match status {
        SyncStatus::Clean => "saved",
        SyncStatus::Dirty => "unsaved changes",
        SyncStatus::Saving => "saving",
    }
}

/// Resolve a user-typed selector to an id: exact id, unique id prefix, or
/// exact name.
fn resolve<'a>(
    kind: &str,
    token: &str,
    candidates: impl Iterator<Item = (&'a str, &'a str)>,
) -> Result<String> {
    let mut matches = Vec::new();
    for (id, name) in candidates {
        if id == token {
            return Ok(id.to_string());
        }
        if id.starts_with(token) || name == token {
            matches.push((id, name));
        }
    }
    match matches.as_slice() {
        [(id, _)] => Ok(id.to_string()),
        [] => bail!("No {} matches '{}'", kind, token),
        several => {
            let names: Vec<String> = several
                .iter()
                .map(|(id, name)| format!("{} [{}]", name, short(id)))
                .collect();
            bail!("'{}' matches several {}s: {}", token, kind, names.join(", "))
        }
    }
}

pub struct Shell<R: RemoteStore, I: IdentityProvider> {
    workspace: Workspace<R, I>,
}

impl<R, I> Shell<R, I>
where
    R: RemoteStore + 'static,
    I: IdentityProvider + 'static,
{
    pub fn new(workspace: Workspace<R, I>) -> Self {
        Self { workspace }
    }

    pub fn workspace(&self) -> &Workspace<R, I> {
        &self.workspace
    }

    pub fn workspace_mut(&mut self) -> &mut Workspace<R, I> {
        &mut self.workspace
    }

    pub fn into_workspace(self) -> Workspace<R, I> {
        self.workspace
    }

    fn note_id(&self, token: &str) -> Result<String> {
        resolve(
            "note",
            token,
            self.workspace
                .notes()
                .iter()
                .map(|(id, n)| (id.as_str(), n.title.as_str())),
        )
    }

    fn folder_id(&self, token: &str) -> Result<String> {
        resolve(
            "folder",
            token,
            self.workspace
                .folders()
                .iter()
                .map(|(id, f)| (id.as_str(), f.name.as_str())),
        )
    }

    fn optional_folder(&self, token: Option<&str>) -> Result<Option<String>> {
        token.map(|t| self.folder_id(t)).transpose()
    }

    fn active_marker(&self, note_id: &str) -> &'static str {
        match self.workspace.active() {
            Some(active) if active.note_id() == note_id => " *",
            _ => "",
        }
    }

    pub fn render_tree(&self) -> Result<String> {
        let forest = self.workspace.forest();
        let mut out = String::new();
        for (folder_id, depth) in forest.walk()? {
            let indent = "  ".repeat(depth);
            let name = forest.get(&folder_id).map(|f| f.name.as_str()).unwrap_or("?");
            writeln!(out, "{}{}/ [{}]", indent, name, short(&folder_id))?;
            for note in self.workspace.notes_in(Some(&folder_id)) {
                writeln!(
                    out,
                    "{}  - {} [{}]{}",
                    indent,
                    note.title,
                    short(&note.id),
                    self.active_marker(&note.id)
                )?;
            }
        }
        for note in self.workspace.notes_in(None) {
            writeln!(
                out,
                "- {} [{}]{}",
                note.title,
                short(&note.id),
                self.active_marker(&note.id)
            )?;
        }
        if out.is_empty() {
            out.push_str("(empty)");
        }
        Ok(out.trim_end().to_string())
    }

    fn render_list(&self, folder_id: Option<&str>) -> String {
        let notes = self.workspace.notes_in(folder_id);
        if notes.is_empty() {
            return "(no notes)".to_string();
        }
        notes
            .iter()
            .map(|n| {
                format!(
                    "{}  {}  {}{}",
                    short(&n.id),
                    n.updated_at.format("%Y-%m-%d %H:%M"),
                    n.title,
                    self.active_marker(&n.id)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_show(&self) -> String {
        match self.workspace.active() {
            Some(active) => format!(
                "# {}\n{}\n({})",
                active.title(),
                active.content(),
                status_label(active.status())
            ),
            None => "No note open".to_string(),
        }
    }

    fn no_note() -> Reply {
        Reply::Text("No note open".to_string())
    }

    /// Run one command. Queued snapshots are applied first so selectors
    /// see the latest tables.
    pub async fn execute(&mut self, command: Command) -> Result<Reply> {
        self.workspace.drain().await;

        let text = match command {
            Command::Help => HELP.to_string(),
            Command::Quit => return Ok(Reply::Quit),
            Command::Tree => self.render_tree()?,
            Command::Ls(folder) => {
                let folder = self.optional_folder(folder.as_deref())?;
                self.render_list(folder.as_deref())
            }
            Command::Show => self.render_show(),
            Command::Status => match self.workspace.active() {
                Some(active) => format!("{}: {}", active.title(), status_label(active.status())),
                None => return Ok(Self::no_note()),
            },
            Command::Mkdir { name, parent } => {
                let parent = self.optional_folder(parent.as_deref())?;
                let id = self.workspace.create_folder(&name, parent.as_deref()).await?;
                format!("Created folder {} [{}]", name.trim(), short(&id))
            }
            Command::New { title, folder } => {
                let folder = self.optional_folder(folder.as_deref())?;
                let id = self
                    .workspace
                    .create_note(title.as_deref(), folder.as_deref())
                    .await?;
                format!("Created and opened note [{}]", short(&id))
            }
            Command::Open(token) => {
                let id = self.note_id(&token)?;
                self.workspace.select_note(&id).await?;
                self.render_show()
            }
            Command::Type(text) => {
                if !self.workspace.edit_content(text) {
                    return Ok(Self::no_note());
                }
                "Edited (autosave pending)".to_string()
            }
            Command::Title(title) => {
                if !self.workspace.edit_title(title) {
                    return Ok(Self::no_note());
                }
                "Title changed (autosave pending)".to_string()
            }
            Command::Save => {
                if self.workspace.active().is_none() {
                    return Ok(Self::no_note());
                }
                self.workspace.save().await?;
                "Saved".to_string()
            }
            Command::RenameNote { note, title } => {
                let id = self.note_id(&note)?;
                self.workspace.rename_note(&id, &title).await?;
                format!("Renamed note [{}]", short(&id))
            }
            Command::RenameFolder { folder, name } => {
                let id = self.folder_id(&folder)?;
                self.workspace.rename_folder(&id, &name).await?;
                format!("Renamed folder [{}]", short(&id))
            }
            Command::Mv { note, folder } => {
                let id = self.note_id(&note)?;
                let folder = self.optional_folder(folder.as_deref())?;
                self.workspace.reparent_note(&id, folder.as_deref()).await?;
                match folder {
                    Some(folder) => format!("Moved note [{}] to [{}]", short(&id), short(&folder)),
                    None => format!("Unfiled note [{}]", short(&id)),
                }
            }
            Command::Mvdir { folder, parent } => {
                let id = self.folder_id(&folder)?;
                let parent = self.optional_folder(parent.as_deref())?;
                self.workspace.move_folder(&id, parent.as_deref()).await?;
                format!("Moved folder [{}]", short(&id))
            }
            Command::Rm(note) => {
                let id = self.note_id(&note)?;
                self.workspace.delete_note(&id).await?;
                format!("Deleted note [{}]", short(&id))
            }
            Command::Rmdir(folder) => {
                let id = self.folder_id(&folder)?;
                let report = self.workspace.delete_folder(&id).await?;
                format!(
                    "Deleted {} folders and {} notes",
                    report.folders.len(),
                    report.notes.len()
                )
            }
        };
        Ok(Reply::Text(text))
    }
}
