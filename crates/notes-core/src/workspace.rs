//! Workspace: everything bound to one signed-in session.
//!
//! Owns the remote subscriptions, the snapshot channel they feed and the
//! reconciler. Dropping the workspace (or calling [`Workspace::sign_out`])
//! unsubscribes.

use crate::config::AutoSaveConfig;
use crate::events::EventBus;
use crate::identity::IdentityProvider;
use crate::reconciler::{EditSession, SyncReconciler, SyncStatus};
use crate::records::{FolderTable, NoteSummary, NoteTable};
use crate::remote::{RemoteStore, Subscription};
use crate::store::{self, CascadeReport, DocumentStore};
use crate::tree::Forest;

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A value pushed by one of the workspace subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteSnapshot {
    Notes(Option<Value>),
    Folders(Option<Value>),
}

pub struct Workspace<R: RemoteStore, I: IdentityProvider> {
    reconciler: SyncReconciler<R, I>,
    snapshots: mpsc::UnboundedReceiver<RemoteSnapshot>,
    /// Taken off the channel but not fully applied yet.
    pending: Option<RemoteSnapshot>,
    subscriptions: Vec<Subscription>,
}

impl<R, I> Workspace<R, I>
where
    R: RemoteStore + 'static,
    I: IdentityProvider + 'static,
{
    /// Subscribe to the current user's notes and folders and apply the
    /// initial values.
    pub async fn open(
        store: Arc<DocumentStore<R, I>>,
        events: Arc<EventBus>,
        autosave: &AutoSaveConfig,
    ) -> store::Result<Self> {
        let notes_path = store.notes_path()?;
        let folders_path = store.folders_path()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let folders_tx = tx.clone();
        let folders_sub = store
            .remote()
            .subscribe(
                &folders_path,
                Box::new(move |value| {
                    // Receiver gone means the workspace is shutting down
                    let _ = folders_tx.send(RemoteSnapshot::Folders(value));
                }),
            )
            .await?;
        let notes_sub = store
            .remote()
            .subscribe(
                &notes_path,
                Box::new(move |value| {
                    let _ = tx.send(RemoteSnapshot::Notes(value));
                }),
            )
            .await?;
        info!("Workspace opened for {}", store.user_path()?);

        let mut workspace = Self {
            reconciler: SyncReconciler::new(store, events, autosave.quiet_period()),
            snapshots: rx,
            pending: None,
            subscriptions: vec![folders_sub, notes_sub],
        };
        workspace.drain().await;
        Ok(workspace)
    }

    async fn apply(&mut self, snapshot: RemoteSnapshot) {
        match snapshot {
            RemoteSnapshot::Notes(value) => self.reconciler.apply_notes_snapshot(value).await,
            RemoteSnapshot::Folders(value) => self.reconciler.apply_folders_snapshot(value),
        }
    }

    /// Apply the held snapshot, if any. It is only cleared once applied,
    /// so a cancelled apply is redone from the start next time.
    async fn apply_pending(&mut self) -> bool {
        let Some(snapshot) = self.pending.clone() else {
            return false;
        };
        self.apply(snapshot).await;
        self.pending = None;
        true
    }

    /// Apply every queued snapshot without waiting. Returns how many.
    pub async fn drain(&mut self) -> usize {
        let mut applied = usize::from(self.apply_pending().await);
        while let Ok(snapshot) = self.snapshots.try_recv() {
            self.pending = Some(snapshot);
            self.apply_pending().await;
            applied += 1;
        }
        if applied > 0 {
            debug!("Applied {} queued snapshots", applied);
        }
        applied
    }

    /// Handle the next thing that happens: a remote snapshot, the autosave
    /// debounce or a finished save. Queued snapshots go first.
    ///
    /// Cancel safe, so it can sit in a `select!` next to user input.
    pub async fn step(&mut self) {
        if self.pending.is_none() {
            tokio::select! {
                biased;
                Some(snapshot) = self.snapshots.recv() => self.pending = Some(snapshot),
                _ = self.reconciler.tick() => return,
            }
        }
        self.apply_pending().await;
    }

    /// Save any edits, then drop the subscriptions.
    ///
    /// If the final save fails the workspace stays open and the edits stay
    /// in the buffer.
    pub async fn sign_out(&mut self) -> store::Result<()> {
        self.drain().await;
        self.reconciler.flush().await?;
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
        info!("Workspace closed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    // -- views --

    pub fn events(&self) -> &Arc<EventBus> {
        self.reconciler.events()
    }

    pub fn store(&self) -> &Arc<DocumentStore<R, I>> {
        self.reconciler.store()
    }

    pub fn active(&self) -> Option<&EditSession> {
        self.reconciler.active()
    }

    pub fn status(&self) -> Option<SyncStatus> {
        self.reconciler.status()
    }

    pub fn notes(&self) -> &NoteTable {
        self.reconciler.notes()
    }

    pub fn folders(&self) -> &FolderTable {
        self.reconciler.folders()
    }

    pub fn forest(&self) -> Forest {
        self.reconciler.forest()
    }

    pub fn notes_in(&self, folder_id: Option<&str>) -> Vec<NoteSummary> {
        self.reconciler.notes_in(folder_id)
    }

    pub fn has_pending_work(&self) -> bool {
        self.reconciler.has_pending_work()
    }

    // -- editor actions --

    pub fn edit_content(&mut self, plaintext: impl Into<String>) -> bool {
        self.reconciler.edit_content(plaintext)
    }

    pub fn edit_title(&mut self, title: impl Into<String>) -> bool {
        self.reconciler.edit_title(title)
    }

    /// Save the open note now. Snapshots queued before the save are applied
    /// first so none of them can replace the saved content afterwards.
    pub async fn save(&mut self) -> store::Result<()> {
        self.drain().await;
        self.reconciler.save_now().await
    }

    pub async fn select_note(&mut self, note_id: &str) -> store::Result<()> {
        self.reconciler.select_note(note_id).await
    }

    // -- mutations --

    pub async fn create_note(&mut self, title: Option<&str>, folder_id: Option<&str>) -> store::Result<String> {
        self.reconciler.create_note(title, folder_id).await
    }

    pub async fn create_folder(&mut self, name: &str, parent_id: Option<&str>) -> store::Result<String> {
        self.store().create_folder(name, parent_id).await
    }

    pub async fn rename_note(&mut self, note_id: &str, title: &str) -> store::Result<()> {
        self.reconciler.rename_note(note_id, title).await
    }

    pub async fn rename_folder(&mut self, folder_id: &str, name: &str) -> store::Result<()> {
        self.store().rename_folder(folder_id, name).await
    }

    pub async fn reparent_note(&mut self, note_id: &str, folder_id: Option<&str>) -> store::Result<()> {
        self.store().reparent_note(note_id, folder_id).await
    }

    pub async fn move_folder(&mut self, folder_id: &str, parent_id: Option<&str>) -> store::Result<()> {
        self.store().move_folder(folder_id, parent_id).await
    }

    pub async fn delete_note(&mut self, note_id: &str) -> store::Result<()> {
        self.reconciler.delete_note(note_id).await
    }

    pub async fn delete_folder(&mut self, folder_id: &str) -> store::Result<CascadeReport> {
        self.reconciler.delete_folder(folder_id).await
    }
}
