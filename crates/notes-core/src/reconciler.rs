//! SyncReconciler: editor buffer vs. remote snapshots.
//!
//! The open note is in one of three states:
//!
//! - `Clean`: the buffer matches what the remote last told us; remote
//!   snapshots replace it.
//! - `Dirty`: the user has edits that are not saved; remote content for
//!   this note is ignored until a save lands.
//! - `Saving`: a save is in flight; remote content is still ignored.
//!
//! Saves triggered by the debounce run as tasks in a `JoinSet` so the caller
//! can keep applying snapshots while one is in flight. At most one save per
//! note runs at a time. Results of saves that finish after the user moved to
//! another note only update bookkeeping.

use crate::autosave::AutoSaveScheduler;
use crate::events::{EventBus, NotificationLevel, WorkspaceEvent};
use crate::identity::IdentityProvider;
use crate::records::{
    most_recent, notes_in, parse_folders, parse_notes, FolderTable, NoteRecord, NoteSummary,
    NoteTable, DEFAULT_NOTE_TITLE,
};
use crate::remote::RemoteStore;
use crate::store::{self, CascadeReport, DocumentStore, StoreError};
use crate::tree::{build_forest, Forest};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Save state of the open note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Clean,
    Dirty,
    Saving,
}

/// The note currently open in the editor. The only place plaintext lives.
#[derive(Debug, Clone)]
pub struct EditSession {
    note_id: String,
    title: String,
    plaintext: String,
    status: SyncStatus,
    /// Bumped on every edit; a save carries the revision it started from.
    revision: u64,
    /// Set once the note has been seen in a snapshot. A freshly created
    /// note may be missing from snapshots queued before its creation.
    confirmed: bool,
    /// Debounce fired while a save was in flight.
    resave_requested: bool,
    /// Already warned that the note vanished remotely.
    orphaned: bool,
}

impl EditSession {
    pub fn note_id(&self) -> &str {
        &self.note_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn content(&self) -> &str {
        &self.plaintext
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

struct SaveOutcome {
    note_id: String,
    session: u64,
    revision: u64,
    result: store::Result<DateTime<Utc>>,
}

enum Wake {
    Debounce(String),
    Saved(Result<SaveOutcome, JoinError>),
}

pub struct SyncReconciler<R: RemoteStore, I: IdentityProvider> {
    store: Arc<DocumentStore<R, I>>,
    events: Arc<EventBus>,
    autosave: AutoSaveScheduler,
    session: Option<EditSession>,
    /// Incremented every time a note is opened.
    session_seq: u64,
    notes: NoteTable,
    folders: FolderTable,
    saves: JoinSet<SaveOutcome>,
    in_flight: HashMap<String, AbortHandle>,
}

impl<R, I> SyncReconciler<R, I>
where
    R: RemoteStore + 'static,
    I: IdentityProvider + 'static,
{
    pub fn new(store: Arc<DocumentStore<R, I>>, events: Arc<EventBus>, quiet_period: Duration) -> Self {
        Self {
            store,
            events,
            autosave: AutoSaveScheduler::new(quiet_period),
            session: None,
            session_seq: 0,
            notes: NoteTable::new(),
            folders: FolderTable::new(),
            saves: JoinSet::new(),
            in_flight: HashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore<R, I>> {
        &self.store
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn active(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    pub fn status(&self) -> Option<SyncStatus> {
        self.session.as_ref().map(|s| s.status)
    }

    pub fn notes(&self) -> &NoteTable {
        &self.notes
    }

    pub fn folders(&self) -> &FolderTable {
        &self.folders
    }

    pub fn forest(&self) -> Forest {
        build_forest(&self.folders)
    }

    /// Notes filed directly in `folder_id`, or unfiled notes for `None`.
    pub fn notes_in(&self, folder_id: Option<&str>) -> Vec<NoteSummary> {
        notes_in(&self.notes, folder_id)
    }

    /// Whether a debounce or a save is still outstanding.
    pub fn has_pending_work(&self) -> bool {
        self.autosave.pending_note().is_some() || !self.in_flight.is_empty()
    }

    // -- remote snapshots --

    /// Replace the notes table with a remote snapshot and reconcile the
    /// open note against it.
    pub async fn apply_notes_snapshot(&mut self, value: Option<Value>) {
        self.notes = parse_notes(value);
        debug!("Notes snapshot: {} notes", self.notes.len());

        let Some((note_id, status, confirmed)) = self
            .session
            .as_ref()
            .map(|s| (s.note_id.clone(), s.status, s.confirmed))
        else {
            self.select_most_recent().await;
            return;
        };

        match self.notes.get(&note_id).cloned() {
            Some(record) if status == SyncStatus::Clean => self.adopt(&note_id, &record).await,
            Some(_) => {
                debug!("Note {} is {:?}, ignoring remote content", note_id, status);
                if let Some(session) = self.session.as_mut() {
                    session.confirmed = true;
                    session.orphaned = false;
                }
            }
            None if !confirmed => {
                debug!("Note {} not in snapshot yet", note_id);
            }
            None if status == SyncStatus::Clean => {
                info!("Open note {} was deleted remotely", note_id);
                self.close_session();
                self.select_most_recent().await;
            }
            None => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if !session.orphaned {
                    session.orphaned = true;
                    warn!("Note {} was deleted remotely while it had unsaved edits", note_id);
                    self.events.notify(
                        NotificationLevel::Warning,
                        format!(
                            "\"{}\" was deleted elsewhere. Your unsaved edits are kept and saving will restore it.",
                            session.title
                        ),
                    );
                }
            }
        }
    }

    /// Replace the folders table with a remote snapshot.
    pub fn apply_folders_snapshot(&mut self, value: Option<Value>) {
        self.folders = parse_folders(value);
        let unreachable = build_forest(&self.folders).unreachable();
        if !unreachable.is_empty() {
            warn!("Folder parents form a cycle: {:?}", unreachable);
            self.events.notify(
                NotificationLevel::Warning,
                format!(
                    "{} folders are part of a parent cycle and cannot be shown",
                    unreachable.len()
                ),
            );
        }
    }

    /// Take the remote title and body. The echo of our own save decrypts to
    /// the buffer as it is and changes nothing.
    async fn adopt(&mut self, note_id: &str, record: &NoteRecord) {
        let plaintext = self.decrypt_for_view(note_id, record).await;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        // The session may have changed while decrypting.
        if session.note_id != note_id || session.status != SyncStatus::Clean {
            return;
        }
        session.confirmed = true;
        session.orphaned = false;
        if session.title != record.title || session.plaintext != plaintext {
            session.title = record.title.clone();
            session.plaintext = plaintext;
            debug!("Adopted remote content for note {}", note_id);
            self.events.emit(WorkspaceEvent::ContentReplaced {
                note_id: note_id.to_string(),
            });
        }
    }

    async fn decrypt_for_view(&self, note_id: &str, record: &NoteRecord) -> String {
        match self.store.read_note_content(record).await {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("Note {} could not be decrypted: {}", note_id, e);
                self.events.notify(
                    NotificationLevel::Warning,
                    format!("\"{}\" could not be decrypted and is shown empty", record.title),
                );
                String::new()
            }
        }
    }

    async fn select_most_recent(&mut self) {
        let Some(note_id) = most_recent(&self.notes).map(str::to_string) else {
            return;
        };
        debug!("Resuming most recently updated note {}", note_id);
        if let Err(e) = self.open_from_table(&note_id).await {
            warn!("Could not open note {}: {}", note_id, e);
        }
    }

    // -- sessions --

    async fn open_from_table(&mut self, note_id: &str) -> store::Result<()> {
        let record = self
            .notes
            .get(note_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "Note",
                id: note_id.to_string(),
            })?;
        let plaintext = self.decrypt_for_view(note_id, &record).await;
        self.open_session(EditSession {
            note_id: note_id.to_string(),
            title: record.title,
            plaintext,
            status: SyncStatus::Clean,
            revision: 0,
            confirmed: true,
            resave_requested: false,
            orphaned: false,
        });
        Ok(())
    }

    fn open_session(&mut self, session: EditSession) {
        self.session_seq += 1;
        let note_id = session.note_id.clone();
        self.session = Some(session);
        debug!("Opened note {}", note_id);
        self.events.emit(WorkspaceEvent::ActiveNoteChanged {
            note_id: Some(note_id.clone()),
        });
        self.events.emit(WorkspaceEvent::StatusChanged {
            note_id,
            status: SyncStatus::Clean,
        });
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            self.autosave.cancel_for(&session.note_id);
            debug!("Closed note {}", session.note_id);
            self.events
                .emit(WorkspaceEvent::ActiveNoteChanged { note_id: None });
        }
    }

    fn set_status(&mut self, status: SyncStatus) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.status == status {
            return;
        }
        debug!("Note {}: {:?} -> {:?}", session.note_id, session.status, status);
        session.status = status;
        self.events.emit(WorkspaceEvent::StatusChanged {
            note_id: session.note_id.clone(),
            status,
        });
    }

    /// Open `note_id`, saving the current note first if it has edits.
    ///
    /// If that save fails the current note stays open with its edits.
    pub async fn select_note(&mut self, note_id: &str) -> store::Result<()> {
        if self.session.as_ref().is_some_and(|s| s.note_id == note_id) {
            return Ok(());
        }
        if !self.notes.contains_key(note_id) {
            return Err(StoreError::NotFound {
                kind: "Note",
                id: note_id.to_string(),
            });
        }
        self.flush_outgoing().await?;
        self.close_session();
        self.open_from_table(note_id).await
    }

    /// Create a note and open it, saving the current note first.
    pub async fn create_note(&mut self, title: Option<&str>, folder_id: Option<&str>) -> store::Result<String> {
        self.flush_outgoing().await?;
        let note_id = self.store.create_note(title, folder_id).await?;
        self.close_session();
        self.open_session(EditSession {
            note_id: note_id.clone(),
            title: title.map(str::trim).unwrap_or(DEFAULT_NOTE_TITLE).to_string(),
            plaintext: String::new(),
            status: SyncStatus::Clean,
            revision: 0,
            confirmed: false,
            resave_requested: false,
            orphaned: false,
        });
        Ok(note_id)
    }

    pub async fn rename_note(&mut self, note_id: &str, title: &str) -> store::Result<()> {
        self.store.rename_note(note_id, title).await?;
        if let Some(session) = self.session.as_mut().filter(|s| s.note_id == note_id) {
            session.title = title.trim().to_string();
        }
        Ok(())
    }

    /// Delete a note. A save still running for it is stopped and waited
    /// for first, so it cannot write the record back.
    pub async fn delete_note(&mut self, note_id: &str) -> store::Result<()> {
        if let Some(save) = self.in_flight.get(note_id) {
            save.abort();
        }
        self.wait_for_save(note_id).await;
        self.store.delete_note(note_id).await?;
        if self.session.as_ref().is_some_and(|s| s.note_id == note_id) {
            self.close_session();
        }
        Ok(())
    }

    /// Cascade-delete a folder. The open note is discarded if it was
    /// removed, including by a cascade that failed part way.
    ///
    /// Outstanding saves land before the cascade starts.
    pub async fn delete_folder(&mut self, folder_id: &str) -> store::Result<CascadeReport> {
        self.settle_saves().await;
        let result = self.store.delete_folder(folder_id).await;
        let removed = match &result {
            Ok(report) => Some(report),
            Err(StoreError::CascadeDelete { removed, .. }) => Some(removed),
            Err(_) => None,
        };
        let active_removed = removed.is_some_and(|report| {
            self.session
                .as_ref()
                .is_some_and(|s| report.contains_note(&s.note_id))
        });
        if active_removed {
            self.close_session();
        }
        result
    }

    // -- edits and saves --

    /// Replace the buffer body. Returns `false` when no note is open.
    pub fn edit_content(&mut self, plaintext: impl Into<String>) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        session.plaintext = plaintext.into();
        self.mark_dirty();
        true
    }

    /// Replace the buffer title. Returns `false` when no note is open.
    pub fn edit_title(&mut self, title: impl Into<String>) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        session.title = title.into();
        self.mark_dirty();
        true
    }

    fn mark_dirty(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.revision += 1;
        let note_id = session.note_id.clone();
        self.set_status(SyncStatus::Dirty);
        self.autosave.schedule(&note_id);
    }

    /// Save the open note now and wait for it, whatever its state.
    pub async fn save_now(&mut self) -> store::Result<()> {
        let Some(note_id) = self.session.as_ref().map(|s| s.note_id.clone()) else {
            return Ok(());
        };
        self.autosave.cancel_for(&note_id);
        self.wait_for_save(&note_id).await;

        let Some((title, plaintext)) = self
            .session
            .as_ref()
            .filter(|s| s.note_id == note_id)
            .map(|s| (s.title.clone(), s.plaintext.clone()))
        else {
            return Ok(());
        };

        self.set_status(SyncStatus::Saving);
        match self.store.save_note_content(&note_id, &plaintext, &title).await {
            Ok(_) => {
                if let Some(session) = self.session.as_mut() {
                    session.resave_requested = false;
                }
                self.set_status(SyncStatus::Clean);
                info!("Saved note {}", note_id);
                Ok(())
            }
            Err(e) => {
                self.save_failed(&title, &e);
                self.set_status(SyncStatus::Dirty);
                Err(e)
            }
        }
    }

    /// Wait for every outstanding save, then save the open note if it has
    /// edits.
    pub async fn flush(&mut self) -> store::Result<()> {
        self.autosave.cancel();
        self.settle_saves().await;
        self.flush_outgoing().await
    }

    /// Wait until no save task is left. A resave started on the way is
    /// waited for too.
    async fn settle_saves(&mut self) {
        while let Some(joined) = self.saves.join_next().await {
            self.finish_save(joined);
        }
        self.in_flight.clear();
    }

    async fn flush_outgoing(&mut self) -> store::Result<()> {
        match self.status() {
            Some(SyncStatus::Dirty) => self.save_now().await,
            _ => Ok(()),
        }
    }

    async fn wait_for_save(&mut self, note_id: &str) {
        while self.in_flight.contains_key(note_id) {
            match self.saves.join_next().await {
                Some(joined) => self.finish_save(joined),
                None => {
                    self.in_flight.clear();
                    break;
                }
            }
        }
    }

    fn start_save(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.resave_requested = false;
        let note_id = session.note_id.clone();
        let title = session.title.clone();
        let plaintext = session.plaintext.clone();
        let revision = session.revision;
        let seq = self.session_seq;
        let store = Arc::clone(&self.store);

        self.set_status(SyncStatus::Saving);
        let task_note = note_id.clone();
        let handle = self.saves.spawn(async move {
            let result = store.save_note_content(&task_note, &plaintext, &title).await;
            SaveOutcome {
                note_id: task_note,
                session: seq,
                revision,
                result,
            }
        });
        self.in_flight.insert(note_id, handle);
    }

    fn finish_save(&mut self, joined: Result<SaveOutcome, JoinError>) {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                self.in_flight.retain(|_, handle| !handle.is_finished());
                if e.is_cancelled() {
                    debug!("Save task cancelled");
                } else {
                    error!("Save task failed: {}", e);
                    self.events
                        .notify(NotificationLevel::Error, "A save stopped unexpectedly. Your edits are kept.");
                }
                // The open note's save never landed: back to Dirty and retry
                let interrupted = self
                    .session
                    .as_ref()
                    .filter(|s| s.status == SyncStatus::Saving && !self.in_flight.contains_key(&s.note_id))
                    .map(|s| s.note_id.clone());
                if let Some(note_id) = interrupted {
                    self.set_status(SyncStatus::Dirty);
                    self.autosave.schedule(&note_id);
                }
                return;
            }
        };

        self.in_flight.remove(&outcome.note_id);
        let current = self.session_seq == outcome.session
            && self
                .session
                .as_ref()
                .is_some_and(|s| s.note_id == outcome.note_id);

        match outcome.result {
            Ok(_) if !current => {
                debug!("Save of note {} finished after navigation; result discarded", outcome.note_id);
            }
            Ok(_) => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if session.revision == outcome.revision {
                    info!("Saved note {}", outcome.note_id);
                    self.set_status(SyncStatus::Clean);
                } else if session.resave_requested {
                    debug!("Note {} changed during save, saving again", outcome.note_id);
                    self.start_save();
                } else {
                    self.set_status(SyncStatus::Dirty);
                }
            }
            Err(e) => {
                let title = self
                    .notes
                    .get(&outcome.note_id)
                    .map(|n| n.title.clone())
                    .unwrap_or_else(|| outcome.note_id.clone());
                self.save_failed(&title, &e);
                if current {
                    self.set_status(SyncStatus::Dirty);
                    let retry = self.session.as_mut().is_some_and(|s| {
                        std::mem::take(&mut s.resave_requested)
                    });
                    if retry {
                        self.autosave.schedule(&outcome.note_id);
                    }
                }
            }
        }
    }

    fn save_failed(&self, title: &str, e: &StoreError) {
        error!("Saving \"{}\" failed: {}", title, e);
        self.events.notify(
            NotificationLevel::Error,
            format!("Could not save \"{}\": {}. Your edits are kept.", title, e),
        );
    }

    fn handle_debounce(&mut self, note_id: String) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.note_id != note_id || session.status != SyncStatus::Dirty {
            return;
        }
        if self.in_flight.contains_key(&note_id) {
            debug!("Save of note {} still in flight, deferring", note_id);
            session.resave_requested = true;
            return;
        }
        self.start_save();
    }

    /// Wait for the debounce or a save completion and handle it.
    ///
    /// Cancel safe. Never resolves while nothing is outstanding.
    pub async fn tick(&mut self) {
        let wake = tokio::select! {
            note_id = self.autosave.fired() => Wake::Debounce(note_id),
            Some(joined) = self.saves.join_next(), if !self.saves.is_empty() => Wake::Saved(joined),
        };
        match wake {
            Wake::Debounce(note_id) => self.handle_debounce(note_id),
            Wake::Saved(joined) => self.finish_save(joined),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{derive_key, encrypt, KdfParams};
    use crate::events::{EventLog, EventSubscription};
    use crate::identity::{Identity, SessionIdentity};
    use crate::remote::InMemoryRemote;
    use serde_json::json;
    use tokio::time::{advance, timeout};

    const QUIET: Duration = Duration::from_secs(3);
    const NOTES: &str = "users/alice/notes";

    type TestStore = DocumentStore<InMemoryRemote, Arc<SessionIdentity>>;

    struct Harness {
        remote: InMemoryRemote,
        store: Arc<TestStore>,
        rec: SyncReconciler<InMemoryRemote, Arc<SessionIdentity>>,
        log: EventLog,
        _sub: EventSubscription,
    }

    impl Harness {
        fn new() -> Self {
            let remote = InMemoryRemote::new();
            let session = Arc::new(SessionIdentity::signed_in(Identity::new("alice").unwrap()));
            let store = Arc::new(DocumentStore::new(
                remote.clone(),
                session,
                KdfParams::default(),
                "users",
            ));
            let events = Arc::new(EventBus::new());
            let log = EventLog::default();
            let sub = log.attach(&events);
            let rec = SyncReconciler::new(Arc::clone(&store), events, QUIET);
            Self {
                remote,
                store,
                rec,
                log,
                _sub: sub,
            }
        }

        async fn sync(&mut self) {
            let value = self.remote.get(NOTES).unwrap();
            self.rec.apply_notes_snapshot(value).await;
        }

        async fn put_note(&self, id: &str, title: &str, body: &str, updated_at: &str) {
            let key = derive_key(Some("alice"), &KdfParams::default()).unwrap();
            self.remote
                .write(
                    &format!("{}/{}", NOTES, id),
                    json!({
                        "title": title,
                        "content_enc": encrypt(body, &key).unwrap(),
                        "updatedAt": updated_at,
                        "folder": null,
                    }),
                )
                .await
                .unwrap();
        }

        async fn remote_body(&self, id: &str) -> String {
            let record = self.store.note(id).await.unwrap().unwrap();
            self.store.read_note_content(&record).await.unwrap()
        }

        fn active_id(&self) -> Option<String> {
            self.rec.active().map(|s| s.note_id().to_string())
        }
    }

    #[tokio::test]
    async fn test_resume_selects_most_recent() {
        let mut h = Harness::new();
        h.put_note("a", "A", "first", "2024-01-01T00:00:00Z").await;
        h.put_note("b", "B", "second", "2024-02-01T00:00:00Z").await;

        h.sync().await;

        let active = h.rec.active().unwrap();
        assert_eq!(active.note_id(), "b");
        assert_eq!(active.content(), "second");
        assert_eq!(active.status(), SyncStatus::Clean);
    }

    #[tokio::test]
    async fn test_clean_note_adopts_remote_content() {
        let mut h = Harness::new();
        h.put_note("a", "A", "old", "2024-01-01T00:00:00Z").await;
        h.sync().await;

        h.put_note("a", "A2", "new", "2024-01-02T00:00:00Z").await;
        h.log.take();
        h.sync().await;

        let active = h.rec.active().unwrap();
        assert_eq!(active.title(), "A2");
        assert_eq!(active.content(), "new");
        assert!(h
            .log
            .take()
            .contains(&WorkspaceEvent::ContentReplaced { note_id: "a".into() }));
    }

    #[tokio::test]
    async fn test_clean_note_adopts_remote_edit_with_older_timestamp() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;

        h.rec.edit_content("mine");
        h.rec.save_now().await.unwrap();
        h.sync().await;
        assert_eq!(h.rec.active().unwrap().content(), "mine");

        // Another client whose clock lags behind ours
        h.put_note("a", "A", "theirs", "2024-06-01T00:00:00Z").await;
        h.sync().await;
        assert_eq!(h.rec.active().unwrap().content(), "theirs");
        assert_eq!(h.rec.status(), Some(SyncStatus::Clean));
    }

    #[tokio::test]
    async fn test_dirty_note_ignores_remote_content() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;

        assert!(h.rec.edit_content("local"));
        assert_eq!(h.rec.status(), Some(SyncStatus::Dirty));

        h.put_note("a", "A", "remote", "2030-01-01T00:00:00Z").await;
        h.sync().await;
        assert_eq!(h.rec.active().unwrap().content(), "local");
        assert_eq!(h.rec.status(), Some(SyncStatus::Dirty));

        h.rec.save_now().await.unwrap();
        assert_eq!(h.rec.status(), Some(SyncStatus::Clean));
        assert_eq!(h.remote_body("a").await, "local");

        // Echo of our own save changes nothing
        h.sync().await;
        assert_eq!(h.rec.active().unwrap().content(), "local");
    }

    #[tokio::test]
    async fn test_edit_without_open_note_is_rejected() {
        let mut h = Harness::new();
        assert!(!h.rec.edit_content("nowhere"));
        assert!(!h.rec.edit_title("nowhere"));
        assert_eq!(h.rec.status(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_restarts_on_every_edit() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;

        h.rec.edit_content("one");
        advance(Duration::from_secs(2)).await;
        h.rec.edit_content("two");

        // First deadline has passed, the restarted one has not
        assert!(timeout(Duration::from_millis(2500), h.rec.tick()).await.is_err());
        assert_eq!(h.rec.status(), Some(SyncStatus::Dirty));

        h.rec.tick().await;
        assert_eq!(h.rec.status(), Some(SyncStatus::Saving));
        h.rec.tick().await;
        assert_eq!(h.rec.status(), Some(SyncStatus::Clean));
        assert_eq!(h.remote_body("a").await, "two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_during_save_stays_dirty_and_resaves() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;

        h.rec.edit_content("one");
        h.rec.tick().await;
        assert_eq!(h.rec.status(), Some(SyncStatus::Saving));

        h.rec.edit_content("two");
        assert_eq!(h.rec.status(), Some(SyncStatus::Dirty));

        while h.rec.status() != Some(SyncStatus::Clean) {
            h.rec.tick().await;
        }
        assert_eq!(h.remote_body("a").await, "two");
        assert!(!h.rec.has_pending_work());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_buffer() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;

        h.rec.edit_content("precious");
        h.remote.fail_mutations_after(Some(0));
        assert!(h.rec.save_now().await.is_err());
        assert_eq!(h.rec.status(), Some(SyncStatus::Dirty));
        assert_eq!(h.rec.active().unwrap().content(), "precious");
        assert_eq!(h.log.notifications(NotificationLevel::Error).len(), 1);

        h.remote.fail_mutations_after(None);
        h.rec.save_now().await.unwrap();
        assert_eq!(h.remote_body("a").await, "precious");
    }

    #[tokio::test]
    async fn test_switch_flushes_dirty_note() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.put_note("b", "B", "b body", "2024-01-02T00:00:00Z").await;
        h.sync().await;
        h.rec.select_note("a").await.unwrap();

        h.rec.edit_content("draft");
        h.rec.select_note("b").await.unwrap();

        assert_eq!(h.active_id().as_deref(), Some("b"));
        assert_eq!(h.rec.active().unwrap().content(), "b body");
        assert_eq!(h.rec.status(), Some(SyncStatus::Clean));
        assert_eq!(h.remote_body("a").await, "draft");
    }

    #[tokio::test]
    async fn test_switch_aborted_when_flush_fails() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.put_note("b", "B", "", "2024-01-02T00:00:00Z").await;
        h.sync().await;

        h.rec.edit_content("unsaved");
        h.remote.fail_mutations_after(Some(0));
        assert!(h.rec.select_note("a").await.is_err());

        assert_eq!(h.active_id().as_deref(), Some("b"));
        assert_eq!(h.rec.active().unwrap().content(), "unsaved");
        assert_eq!(h.rec.status(), Some(SyncStatus::Dirty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_save_after_navigation_is_discarded() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.put_note("b", "B", "b body", "2024-01-02T00:00:00Z").await;
        h.sync().await;
        h.rec.select_note("a").await.unwrap();

        h.rec.edit_content("x");
        h.rec.tick().await;
        assert_eq!(h.rec.status(), Some(SyncStatus::Saving));

        // Saving (not Dirty): no flush, the in-flight save keeps running
        h.rec.select_note("b").await.unwrap();
        h.rec.tick().await;

        assert_eq!(h.active_id().as_deref(), Some("b"));
        assert_eq!(h.rec.status(), Some(SyncStatus::Clean));
        assert_eq!(h.rec.active().unwrap().content(), "b body");
        assert_eq!(h.remote_body("a").await, "x");
    }

    #[tokio::test]
    async fn test_clean_note_deleted_remotely_reselects() {
        let mut h = Harness::new();
        h.put_note("a", "A", "a body", "2024-01-01T00:00:00Z").await;
        h.put_note("b", "B", "", "2024-01-02T00:00:00Z").await;
        h.sync().await;
        assert_eq!(h.active_id().as_deref(), Some("b"));

        h.remote.delete(&format!("{}/b", NOTES)).await.unwrap();
        h.sync().await;

        assert_eq!(h.active_id().as_deref(), Some("a"));
        assert_eq!(h.rec.active().unwrap().content(), "a body");
    }

    #[tokio::test]
    async fn test_dirty_note_deleted_remotely_keeps_buffer() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;
        h.rec.edit_content("keep me");

        h.remote.delete(&format!("{}/a", NOTES)).await.unwrap();
        h.sync().await;
        h.sync().await;

        assert_eq!(h.active_id().as_deref(), Some("a"));
        assert_eq!(h.log.notifications(NotificationLevel::Warning).len(), 1);

        h.rec.save_now().await.unwrap();
        assert_eq!(h.remote_body("a").await, "keep me");
    }

    #[tokio::test]
    async fn test_local_delete_discards_session() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;
        h.rec.edit_content("doomed");

        h.rec.delete_note("a").await.unwrap();
        assert!(h.rec.active().is_none());
        assert!(!h.rec.has_pending_work());
        assert_eq!(h.remote.get(&format!("{}/a", NOTES)).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_stops_in_flight_save() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;
        h.rec.edit_content("racing");
        h.rec.tick().await;
        assert_eq!(h.rec.status(), Some(SyncStatus::Saving));

        h.rec.delete_note("a").await.unwrap();
        assert!(h.rec.active().is_none());
        assert!(!h.rec.has_pending_work());

        tokio::task::yield_now().await;
        assert_eq!(h.remote.get(&format!("{}/a", NOTES)).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_during_save_returns_to_dirty() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;
        h.rec.edit_content("keep");
        h.rec.tick().await;
        assert_eq!(h.rec.status(), Some(SyncStatus::Saving));

        h.remote.fail_mutations_after(Some(0));
        assert!(h.rec.delete_note("a").await.is_err());
        assert_eq!(h.active_id().as_deref(), Some("a"));
        assert_eq!(h.rec.status(), Some(SyncStatus::Dirty));
        assert!(h.rec.has_pending_work());

        // The retry scheduled for the interrupted save goes through
        h.remote.fail_mutations_after(None);
        for _ in 0..4 {
            if h.rec.status() == Some(SyncStatus::Clean) {
                break;
            }
            h.rec.tick().await;
        }
        assert_eq!(h.rec.status(), Some(SyncStatus::Clean));
        assert_eq!(h.remote_body("a").await, "keep");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cascade_waits_for_in_flight_save() {
        let mut h = Harness::new();
        let folder = h.store.create_folder("Work", None).await.unwrap();
        let note = h.rec.create_note(Some("Plan"), Some(&folder)).await.unwrap();
        h.rec.edit_content("racing");
        h.rec.tick().await;
        assert_eq!(h.rec.status(), Some(SyncStatus::Saving));

        let report = h.rec.delete_folder(&folder).await.unwrap();
        assert!(report.contains_note(&note));
        assert!(h.rec.active().is_none());
        assert!(!h.rec.has_pending_work());

        tokio::task::yield_now().await;
        assert_eq!(h.remote.get(&format!("{}/{}", NOTES, note)).unwrap(), None);
        assert_eq!(h.remote.get("users/alice").unwrap(), None);
    }

    #[tokio::test]
    async fn test_folder_cascade_discards_active_note() {
        let mut h = Harness::new();
        let folder = h.store.create_folder("Work", None).await.unwrap();
        let note = h.rec.create_note(Some("Plan"), Some(&folder)).await.unwrap();
        assert_eq!(h.active_id(), Some(note.clone()));

        let report = h.rec.delete_folder(&folder).await.unwrap();
        assert!(report.contains_note(&note));
        assert!(h.rec.active().is_none());
    }

    #[tokio::test]
    async fn test_create_note_flushes_and_opens() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;
        h.rec.edit_content("before new");

        let id = h.rec.create_note(None, None).await.unwrap();
        let active = h.rec.active().unwrap();
        assert_eq!(active.note_id(), id);
        assert_eq!(active.title(), DEFAULT_NOTE_TITLE);
        assert_eq!(active.content(), "");
        assert_eq!(h.remote_body("a").await, "before new");
    }

    #[tokio::test]
    async fn test_new_note_survives_snapshot_queued_before_creation() {
        let mut h = Harness::new();
        h.put_note("a", "A", "", "2024-01-01T00:00:00Z").await;
        h.sync().await;
        let before_create = h.remote.get(NOTES).unwrap();

        let id = h.rec.create_note(Some("Fresh"), None).await.unwrap();
        h.rec.apply_notes_snapshot(before_create).await;
        assert_eq!(h.active_id(), Some(id));
    }

    #[tokio::test]
    async fn test_folder_cycle_is_reported() {
        let mut h = Harness::new();
        h.rec.apply_folders_snapshot(Some(json!({
            "x": {"name": "X", "parent": "y"},
            "y": {"name": "Y", "parent": "x"},
        })));
        assert_eq!(h.rec.folders().len(), 2);
        assert_eq!(h.log.notifications(NotificationLevel::Warning).len(), 1);
        assert!(h.rec.forest().nested().is_err());
    }
}
