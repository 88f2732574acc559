//! notes-core: encrypted hierarchical note store with live-sync reconciliation.
//!
//! This crate provides:
//! - Identity-bound key derivation and AES-256-GCM content encryption
//! - Folder forest construction from flat parent pointers
//! - A DocumentStore over an injected RemoteStore (CRUD, cascading delete)
//! - A Clean/Dirty/Saving reconciler with debounced autosave
//! - A session-scoped Workspace tying subscriptions to the reconciler

pub mod autosave;
pub mod config;
pub mod crypto;
pub mod events;
pub mod identity;
pub mod reconciler;
pub mod records;
pub mod remote;
pub mod store;
pub mod tree;
pub mod workspace;

pub use autosave::AutoSaveScheduler;
pub use config::Config;
pub use crypto::{ContentKey, CryptoError, KdfParams};
pub use events::{EventBus, EventLog, EventSubscription, NotificationLevel, WorkspaceEvent};
pub use identity::{Identity, IdentityError, IdentityProvider, SessionIdentity};
pub use reconciler::{EditSession, SyncReconciler, SyncStatus};
pub use records::{FolderRecord, FolderTable, NoteRecord, NoteSummary, NoteTable};
pub use remote::{ChangeCallback, InMemoryRemote, RemoteError, RemoteStore, Subscription};
pub use store::{CascadeReport, DocumentStore, StoreError};
pub use tree::{build_forest, Forest, TreeError, TreeNode};
pub use workspace::{RemoteSnapshot, Workspace};
