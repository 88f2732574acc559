//! DocumentStore: notes and folders of one user on top of a RemoteStore.
//!
//! The store keeps no cache. Reads go through a one-shot subscription and
//! every mutation is a single remote call (or, for a cascade, a sequence of
//! them), so remote subscribers observe each change as it lands.

use crate::crypto::{self, ContentKey, CryptoError, KdfParams};
use crate::identity::IdentityProvider;
use crate::records::{
    parse_folders, parse_notes, FolderRecord, FolderTable, NoteRecord, NoteTable,
    DEFAULT_NOTE_TITLE,
};
use crate::remote::{RemoteError, RemoteStore};
use crate::tree::build_forest;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Note content could not be decrypted: {0}")]
    Decryption(String),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error(
        "Deleting folder {folder} stopped after removing {} notes and {} folders: {source}",
        .removed.notes.len(),
        .removed.folders.len()
    )]
    CascadeDelete {
        folder: String,
        removed: CascadeReport,
        remaining: CascadeReport,
        source: RemoteError,
    },
}

impl From<CryptoError> for StoreError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::AuthRequired => StoreError::AuthRequired,
            CryptoError::Decryption(msg) => StoreError::Decryption(msg),
            other => StoreError::Validation(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Ids touched by a folder cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeReport {
    pub notes: Vec<String>,
    pub folders: Vec<String>,
}

impl CascadeReport {
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.folders.is_empty()
    }

    pub fn contains_note(&self, id: &str) -> bool {
        self.notes.iter().any(|n| n == id)
    }
}

/// Notes and folders of the signed-in user.
pub struct DocumentStore<R: RemoteStore, I: IdentityProvider> {
    remote: R,
    identity: I,
    kdf: KdfParams,
    users_root: String,
}

impl<R: RemoteStore, I: IdentityProvider> DocumentStore<R, I> {
    pub fn new(remote: R, identity: I, kdf: KdfParams, users_root: impl Into<String>) -> Self {
        Self {
            remote,
            identity,
            kdf,
            users_root: users_root.into(),
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// `{users_root}/{identity}`
    pub fn user_path(&self) -> Result<String> {
        let identity = self.identity.current().ok_or(StoreError::AuthRequired)?;
        Ok(format!("{}/{}", self.users_root, identity))
    }

    pub fn notes_path(&self) -> Result<String> {
        Ok(format!("{}/notes", self.user_path()?))
    }

    pub fn folders_path(&self) -> Result<String> {
        Ok(format!("{}/folders", self.user_path()?))
    }

    fn note_path(&self, id: &str) -> Result<String> {
        Ok(format!("{}/{}", self.notes_path()?, id))
    }

    fn folder_path(&self, id: &str) -> Result<String> {
        Ok(format!("{}/{}", self.folders_path()?, id))
    }

    /// Derive the content key for the current identity.
    ///
    /// Yields first: PBKDF2 at full strength blocks for a noticeable while.
    async fn content_key(&self) -> Result<ContentKey> {
        tokio::task::yield_now().await;
        let identity = self.identity.current();
        Ok(crypto::derive_key(
            identity.as_ref().map(|i| i.as_str()),
            &self.kdf,
        )?)
    }

    async fn encrypt(&self, plaintext: &str) -> Result<String> {
        let key = self.content_key().await?;
        Ok(crypto::encrypt(plaintext, &key)?)
    }

    /// Current value at `path`. The remote has no plain read, so this
    /// subscribes, takes the initial callback and unsubscribes.
    async fn read_once(&self, path: &str) -> Result<Option<Value>> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let subscription = self
            .remote
            .subscribe(
                path,
                Box::new(move |value| {
                    if let Some(tx) = tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
                        let _ = tx.send(value);
                    }
                }),
            )
            .await?;
        let value = rx.await.map_err(|_| {
            RemoteError::Unavailable(format!("subscription to {} closed before first value", path))
        })?;
        subscription.unsubscribe();
        Ok(value)
    }

    /// One-shot read of both tables.
    pub async fn snapshot(&self) -> Result<(NoteTable, FolderTable)> {
        let notes = parse_notes(self.read_once(&self.notes_path()?).await?);
        let folders = parse_folders(self.read_once(&self.folders_path()?).await?);
        Ok((notes, folders))
    }

    pub async fn folders(&self) -> Result<FolderTable> {
        Ok(parse_folders(self.read_once(&self.folders_path()?).await?))
    }

    pub async fn note(&self, id: &str) -> Result<Option<NoteRecord>> {
        let value = self.read_once(&self.note_path(id)?).await?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    async fn folder_exists(&self, id: &str) -> Result<bool> {
        Ok(self.read_once(&self.folder_path(id)?).await?.is_some())
    }

    async fn require_folder(&self, id: &str) -> Result<()> {
        if self.folder_exists(id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                kind: "Folder",
                id: id.to_string(),
            })
        }
    }

    async fn require_note(&self, id: &str) -> Result<()> {
        if self.read_once(&self.note_path(id)?).await?.is_some() {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                kind: "Note",
                id: id.to_string(),
            })
        }
    }

    /// Create an empty note and return its id.
    ///
    /// `None` as title gives the default title; a blank title is rejected.
    pub async fn create_note(&self, title: Option<&str>, folder_id: Option<&str>) -> Result<String> {
        let title = match title {
            None => DEFAULT_NOTE_TITLE,
            Some(t) => non_blank(t, "Note title")?,
        };
        self.user_path()?;
        if let Some(folder) = folder_id {
            self.require_folder(folder).await?;
        }

        let id = uuid::Uuid::new_v4().to_string();
        let record = NoteRecord {
            title: title.to_string(),
            encrypted_content: self.encrypt("").await?,
            updated_at: Utc::now(),
            folder_id: folder_id.map(str::to_string),
        };
        self.remote
            .write(&self.note_path(&id)?, to_value(&record)?)
            .await?;
        tracing::info!("Created note {}", id);
        Ok(id)
    }

    pub async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<String> {
        let name = non_blank(name, "Folder name")?;
        self.user_path()?;
        if let Some(parent) = parent_id {
            self.require_folder(parent).await?;
        }

        let id = uuid::Uuid::new_v4().to_string();
        let record = FolderRecord {
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
        };
        self.remote
            .write(&self.folder_path(&id)?, to_value(&record)?)
            .await?;
        tracing::info!("Created folder {}", id);
        Ok(id)
    }

    pub async fn rename_note(&self, id: &str, title: &str) -> Result<()> {
        let title = non_blank(title, "Note title")?;
        self.require_note(id).await?;
        self.remote
            .patch(&self.note_path(id)?, fields([("title", Value::from(title))]))
            .await?;
        tracing::info!("Renamed note {}", id);
        Ok(())
    }

    pub async fn rename_folder(&self, id: &str, name: &str) -> Result<()> {
        let name = non_blank(name, "Folder name")?;
        self.require_folder(id).await?;
        self.remote
            .patch(&self.folder_path(id)?, fields([("name", Value::from(name))]))
            .await?;
        tracing::info!("Renamed folder {}", id);
        Ok(())
    }

    /// File a note under `folder_id`, or unfile it with `None`.
    pub async fn reparent_note(&self, note_id: &str, folder_id: Option<&str>) -> Result<()> {
        self.require_note(note_id).await?;
        if let Some(folder) = folder_id {
            self.require_folder(folder).await?;
        }
        self.remote
            .patch(
                &self.note_path(note_id)?,
                fields([("folder", folder_id.map_or(Value::Null, Value::from))]),
            )
            .await?;
        tracing::info!("Moved note {} to {:?}", note_id, folder_id);
        Ok(())
    }

    /// Reparent a folder. Moving a folder under itself or any folder below
    /// it is rejected, so writes through here never create a cycle.
    pub async fn move_folder(&self, folder_id: &str, parent_id: Option<&str>) -> Result<()> {
        let folders = self.folders().await?;
        if !folders.contains_key(folder_id) {
            return Err(StoreError::NotFound {
                kind: "Folder",
                id: folder_id.to_string(),
            });
        }
        if let Some(parent) = parent_id {
            if !folders.contains_key(parent) {
                return Err(StoreError::NotFound {
                    kind: "Folder",
                    id: parent.to_string(),
                });
            }
            let forest = build_forest(&folders);
            if parent == folder_id || forest.descendants(folder_id).iter().any(|d| d == parent) {
                return Err(StoreError::Validation(format!(
                    "Cannot move folder {} under its own descendant {}",
                    folder_id, parent
                )));
            }
        }

        self.remote
            .patch(
                &self.folder_path(folder_id)?,
                fields([("parent", parent_id.map_or(Value::Null, Value::from))]),
            )
            .await?;
        tracing::info!("Moved folder {} to {:?}", folder_id, parent_id);
        Ok(())
    }

    pub async fn delete_note(&self, id: &str) -> Result<()> {
        self.remote.delete(&self.note_path(id)?).await?;
        tracing::info!("Deleted note {}", id);
        Ok(())
    }

    /// Delete a folder, every folder below it and every note filed in any
    /// of them.
    ///
    /// Notes go first, then folders from the deepest up. The first remote
    /// failure stops the cascade; whatever was already removed stays removed
    /// and is listed in [`StoreError::CascadeDelete`].
    pub async fn delete_folder(&self, id: &str) -> Result<CascadeReport> {
        let (notes, folders) = self.snapshot().await?;
        if !folders.contains_key(id) {
            return Err(StoreError::NotFound {
                kind: "Folder",
                id: id.to_string(),
            });
        }

        let forest = build_forest(&folders);
        let mut doomed_folders = vec![id.to_string()];
        doomed_folders.extend(forest.descendants(id));
        let in_scope: HashSet<&str> = doomed_folders.iter().map(String::as_str).collect();

        let plan = CascadeReport {
            notes: notes
                .iter()
                .filter(|(_, n)| n.folder_id.as_deref().is_some_and(|f| in_scope.contains(f)))
                .map(|(note_id, _)| note_id.clone())
                .collect(),
            folders: doomed_folders.iter().rev().cloned().collect(),
        };
        tracing::debug!(
            "Cascade for folder {}: {} notes, {} folders",
            id,
            plan.notes.len(),
            plan.folders.len()
        );

        let mut removed = CascadeReport::default();
        for note_id in &plan.notes {
            if let Err(source) = self.remote.delete(&self.note_path(note_id)?).await {
                return Err(cascade_failure(id, removed, &plan, source));
            }
            removed.notes.push(note_id.clone());
        }
        for folder_id in &plan.folders {
            if let Err(source) = self.remote.delete(&self.folder_path(folder_id)?).await {
                return Err(cascade_failure(id, removed, &plan, source));
            }
            removed.folders.push(folder_id.clone());
        }

        tracing::info!(
            "Deleted folder {} with {} notes and {} subfolders",
            id,
            removed.notes.len(),
            removed.folders.len() - 1
        );
        Ok(removed)
    }

    /// Encrypt `plaintext` and store it with `title`, bumping `updatedAt`.
    /// The note's folder is left alone. Returns the new `updatedAt`.
    pub async fn save_note_content(
        &self,
        id: &str,
        plaintext: &str,
        title: &str,
    ) -> Result<DateTime<Utc>> {
        let encrypted = self.encrypt(plaintext).await?;
        let updated_at = Utc::now();
        self.remote
            .patch(
                &self.note_path(id)?,
                fields([
                    ("title", Value::from(title)),
                    ("content_enc", Value::from(encrypted)),
                    ("updatedAt", to_value(&updated_at)?),
                ]),
            )
            .await?;
        tracing::debug!("Saved content of note {}", id);
        Ok(updated_at)
    }

    /// Decrypt the body of `record` with the current identity's key.
    pub async fn read_note_content(&self, record: &NoteRecord) -> Result<String> {
        let key = self.content_key().await?;
        Ok(crypto::decrypt(&record.encrypted_content, &key)?)
    }

    /// Like [`read_note_content`](Self::read_note_content), but an
    /// unreadable body comes back empty.
    pub async fn decrypt_or_empty(&self, id: &str, record: &NoteRecord) -> String {
        match self.read_note_content(record).await {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!("Note {} is unreadable, showing it empty: {}", id, e);
                String::new()
            }
        }
    }
}

fn non_blank<'a>(value: &'a str, what: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Validation(format!("{} must not be empty", what)));
    }
    Ok(trimmed)
}

fn fields<const N: usize>(entries: [(&str, Value); N]) -> Map<String, Value> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| StoreError::from(RemoteError::Serialization(e.to_string())))
}

fn cascade_failure(
    folder: &str,
    removed: CascadeReport,
    plan: &CascadeReport,
    source: RemoteError,
) -> StoreError {
    let remaining = CascadeReport {
        notes: plan.notes[removed.notes.len()..].to_vec(),
        folders: plan.folders[removed.folders.len()..].to_vec(),
    };
    tracing::error!(
        "Cascade delete of folder {} failed with {} notes and {} folders left: {}",
        folder,
        remaining.notes.len(),
        remaining.folders.len(),
        source
    );
    StoreError::CascadeDelete {
        folder: folder.to_string(),
        removed,
        remaining,
        source,
    }
}
