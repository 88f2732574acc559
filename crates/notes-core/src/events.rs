//! Event infrastructure for notes-core.
//!
//! Provides `WorkspaceEvent` for the UI layer and `EventBus` for subscriptions.
//! Every failure the reconciler recovers from is reported here as a
//! dismissible `Notification` instead of being dropped.

use crate::reconciler::SyncStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Severity of a user-visible notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// Events emitted by the workspace for the editor/UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkspaceEvent {
    /// Save status of the active note changed.
    StatusChanged {
        #[serde(rename = "noteId")]
        note_id: String,
        status: SyncStatus,
    },
    /// A different note (or none) is now open in the editor.
    ActiveNoteChanged {
        #[serde(rename = "noteId")]
        note_id: Option<String>,
    },
    /// Editor title/content were replaced by a remote snapshot.
    ContentReplaced {
        #[serde(rename = "noteId")]
        note_id: String,
    },
    /// Dismissible message for the user.
    Notification {
        level: NotificationLevel,
        message: String,
    },
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct EventSubscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(WorkspaceEvent) + Send + Sync>;

/// Event bus for publishing workspace events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `EventSubscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(WorkspaceEvent) + Send + Sync + 'static,
    ) -> EventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        EventSubscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        let guard = if std::thread::panicking() {
            self.callbacks.try_write().ok()
        } else {
            Some(self.callbacks.write().unwrap_or_else(|e| e.into_inner()))
        };
        if let Some(mut guard) = guard {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: WorkspaceEvent) {
        // Clone the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn notify(&self, level: NotificationLevel, message: impl Into<String>) {
        self.emit(WorkspaceEvent::Notification {
            level,
            message: message.into(),
        });
    }
}

/// Collects every event; handy for assertions and simple front ends.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<std::sync::Mutex<Vec<WorkspaceEvent>>>,
}

impl EventLog {
    pub fn attach(&self, bus: &Arc<EventBus>) -> EventSubscription {
        let events = Arc::clone(&self.events);
        bus.subscribe(move |event| {
            events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
        })
    }

    /// Remove and return everything collected so far.
    pub fn take(&self) -> Vec<WorkspaceEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn notifications(&self, level: NotificationLevel) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|e| match e {
                WorkspaceEvent::Notification { level: l, message } if *l == level => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }
}
