//! RemoteStore trait abstraction for the hierarchical real-time store.
//!
//! The store is a JSON tree addressed by `/`-separated paths. Subscribers get
//! the current value at their path immediately and again after every change
//! at, above, or below it.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing, and as the backing tree of file stores
//! - `JsonFileRemote` (in notes-shell) - `InMemoryRemote` persisted to a JSON file

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Callback invoked with the value at the subscribed path (`None` when absent).
pub type ChangeCallback = Box<dyn Fn(Option<Value>) + Send + Sync>;

/// Subscription handle that unsubscribes when dropped.
///
/// Hold it to keep receiving changes; drop it or call
/// [`Subscription::unsubscribe`] on teardown.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop receiving changes.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Remote hierarchical key-value store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Replace the value at `path`. Writing `null` removes it.
    async fn write(&self, path: &str, value: Value) -> Result<()>;

    /// Merge `partial` into the object at `path`; `null` members are removed.
    async fn patch(&self, path: &str, partial: Map<String, Value>) -> Result<()>;

    /// Remove the value at `path`. Removing a missing path is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Watch `path`. `on_change` fires once right away with the current value.
    async fn subscribe(&self, path: &str, on_change: ChangeCallback) -> Result<Subscription>;
}

/// Split and validate a store path.
///
/// Segments must be non-empty and free of `. # $ [ ]` and control characters.
pub fn parse_path(path: &str) -> Result<Vec<String>> {
    let invalid = |reason: &str| RemoteError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.len() > 768 {
        return Err(invalid("path too long"));
    }

    trimmed
        .split('/')
        .map(|segment| {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if segment
                .chars()
                .any(|c| ".#$[]".contains(c) || c.is_control())
            {
                return Err(invalid("segment contains a forbidden character"));
            }
            Ok(segment.to_string())
        })
        .collect()
}

struct Listener {
    id: usize,
    segments: Vec<String>,
    callback: Arc<dyn Fn(Option<Value>) + Send + Sync>,
}

struct Shared {
    root: RwLock<Value>,
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicUsize,
    /// Remaining successful mutations before every mutation fails.
    fail_after: Mutex<Option<usize>>,
}

impl Shared {
    fn unsubscribe(&self, id: usize) {
        // Drop may run during unwinding while this thread holds a read lock
        let guard = if std::thread::panicking() {
            self.listeners.try_write().ok()
        } else {
            Some(self.listeners.write().unwrap_or_else(|e| e.into_inner()))
        };
        if let Some(mut guard) = guard {
            guard.retain(|l| l.id != id);
        }
    }
}

/// In-memory JSON tree with live subscriptions.
///
/// Clones share the same tree.
#[derive(Clone)]
pub struct InMemoryRemote {
    shared: Arc<Shared>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::with_value(Value::Object(Map::new()))
    }

    /// Start from an existing tree (e.g. one loaded from disk).
    pub fn with_value(root: Value) -> Self {
        let root = match root {
            Value::Object(_) => root,
            _ => Value::Object(Map::new()),
        };
        Self {
            shared: Arc::new(Shared {
                root: RwLock::new(root),
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicUsize::new(0),
                fail_after: Mutex::new(None),
            }),
        }
    }

    /// Copy of the whole tree.
    pub fn export(&self) -> Value {
        self.shared
            .root
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current value at `path`, if any.
    pub fn get(&self, path: &str) -> Result<Option<Value>> {
        let segments = parse_path(path)?;
        Ok(self.value_at(&segments))
    }

    /// Let the next `count` mutations succeed, then fail every mutation with
    /// [`RemoteError::Unavailable`]. `None` clears the fault.
    pub fn fail_mutations_after(&self, count: Option<usize>) {
        *self
            .shared
            .fail_after
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = count;
    }

    /// Number of live subscriptions.
    pub fn listener_count(&self) -> usize {
        self.shared
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn check_fault(&self) -> Result<()> {
        let mut guard = self
            .shared
            .fail_after
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(0) => Err(RemoteError::Unavailable("injected failure".to_string())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn value_at(&self, segments: &[String]) -> Option<Value> {
        let root = self.shared.root.read().unwrap_or_else(|e| e.into_inner());
        let mut node = &*root;
        for segment in segments {
            node = node.as_object()?.get(segment)?;
        }
        Some(node.clone())
    }

    /// Listeners whose path is an ancestor or descendant of `segments`.
    fn affected(&self, segments: &[String]) -> Vec<(Vec<String>, Arc<dyn Fn(Option<Value>) + Send + Sync>)> {
        self.shared
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|l| {
                let n = l.segments.len().min(segments.len());
                l.segments[..n] == segments[..n]
            })
            .map(|l| (l.segments.clone(), Arc::clone(&l.callback)))
            .collect()
    }

    /// Apply `mutate` to the tree and notify listeners whose value changed.
    fn mutate(&self, segments: &[String], mutate: impl FnOnce(&mut Value)) {
        let affected = self.affected(segments);
        let before: Vec<Option<Value>> = affected.iter().map(|(s, _)| self.value_at(s)).collect();

        {
            let mut root = self.shared.root.write().unwrap_or_else(|e| e.into_inner());
            mutate(&mut root);
            prune_empty(&mut root, segments);
        }

        // Callbacks run without holding any lock so they may call back in.
        for ((listener_path, callback), old) in affected.into_iter().zip(before) {
            let new = self.value_at(&listener_path);
            if new != old {
                callback(new);
            }
        }
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced by an object"),
    }
}

fn node_mut<'a>(root: &'a mut Value, segments: &[String]) -> &'a mut Value {
    let mut node = root;
    for segment in segments {
        node = ensure_object(node)
            .entry(segment.clone())
            .or_insert(Value::Null);
    }
    node
}

fn remove_at(root: &mut Value, segments: &[String]) {
    let Some((last, parents)) = segments.split_last() else {
        *root = Value::Object(Map::new());
        return;
    };
    let mut node = root;
    for segment in parents {
        match node.as_object_mut().and_then(|m| m.get_mut(segment)) {
            Some(child) => node = child,
            None => return,
        }
    }
    if let Some(map) = node.as_object_mut() {
        map.remove(last);
    }
}

/// Drop empty objects and nulls along `segments`, deepest first.
fn prune_empty(root: &mut Value, segments: &[String]) {
    for depth in (1..=segments.len()).rev() {
        let prefix = &segments[..depth];
        let empty = {
            let mut node = &*root;
            let mut found = true;
            for segment in prefix {
                match node.as_object().and_then(|m| m.get(segment)) {
                    Some(child) => node = child,
                    None => {
                        found = false;
                        break;
                    }
                }
            }
            found
                && (node.is_null() || node.as_object().map(|m| m.is_empty()).unwrap_or(false))
        };
        if empty {
            remove_at(root, prefix);
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn write(&self, path: &str, value: Value) -> Result<()> {
        let segments = parse_path(path)?;
        self.check_fault()?;
        if value.is_null() {
            self.mutate(&segments, |root| remove_at(root, &segments));
        } else {
            self.mutate(&segments, |root| *node_mut(root, &segments) = value);
        }
        Ok(())
    }

    async fn patch(&self, path: &str, partial: Map<String, Value>) -> Result<()> {
        let segments = parse_path(path)?;
        for key in partial.keys() {
            let key_segments = parse_path(key)?;
            if key_segments.len() != 1 {
                return Err(RemoteError::InvalidPath {
                    path: key.clone(),
                    reason: "patch keys must be single segments".to_string(),
                });
            }
        }
        self.check_fault()?;
        self.mutate(&segments, |root| {
            let target = ensure_object(node_mut(root, &segments));
            for (key, value) in partial {
                if value.is_null() {
                    target.remove(&key);
                } else {
                    target.insert(key, value);
                }
            }
        });
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let segments = parse_path(path)?;
        self.check_fault()?;
        self.mutate(&segments, |root| remove_at(root, &segments));
        Ok(())
    }

    async fn subscribe(&self, path: &str, on_change: ChangeCallback) -> Result<Subscription> {
        let segments = parse_path(path)?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: Arc<dyn Fn(Option<Value>) + Send + Sync> = Arc::from(on_change);

        self.shared
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Listener {
                id,
                segments: segments.clone(),
                callback: Arc::clone(&callback),
            });

        callback(self.value_at(&segments));

        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        Ok(Subscription::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.unsubscribe(id);
            }
        }))
    }
}

// Allows sharing one store between a DocumentStore and test assertions.
#[async_trait]
impl<T: RemoteStore + ?Sized> RemoteStore for Arc<T> {
    async fn write(&self, path: &str, value: Value) -> Result<()> {
        (**self).write(path, value).await
    }

    async fn patch(&self, path: &str, partial: Map<String, Value>) -> Result<()> {
        (**self).patch(path, partial).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn subscribe(&self, path: &str, on_change: ChangeCallback) -> Result<Subscription> {
        (**self).subscribe(path, on_change).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<Option<Value>>>>, ChangeCallback) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let callback: ChangeCallback = Box::new(move |value| {
            seen_clone.lock().unwrap().push(value);
        });
        (seen, callback)
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let remote = InMemoryRemote::new();

        remote.write("users/u1/notes/n1", json!({"title": "a"})).await.unwrap();
        assert_eq!(
            remote.get("users/u1/notes/n1").unwrap(),
            Some(json!({"title": "a"}))
        );

        remote.delete("users/u1/notes/n1").await.unwrap();
        assert_eq!(remote.get("users/u1/notes/n1").unwrap(), None);

        // Empty parents are pruned like the real store does
        assert_eq!(remote.get("users").unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_null_removes() {
        let remote = InMemoryRemote::new();
        remote.write("a/b", json!(1)).await.unwrap();
        remote.write("a/b", Value::Null).await.unwrap();
        assert_eq!(remote.get("a/b").unwrap(), None);
    }

    #[tokio::test]
    async fn test_patch_merges_and_removes_nulls() {
        let remote = InMemoryRemote::new();
        remote
            .write("n", json!({"title": "a", "folder": "f1", "content_enc": "x"}))
            .await
            .unwrap();

        let mut partial = Map::new();
        partial.insert("title".into(), json!("b"));
        partial.insert("folder".into(), Value::Null);
        remote.patch("n", partial).await.unwrap();

        assert_eq!(
            remote.get("n").unwrap(),
            Some(json!({"title": "b", "content_enc": "x"}))
        );
    }

    #[tokio::test]
    async fn test_subscribe_fires_immediately_and_on_change() {
        let remote = InMemoryRemote::new();
        remote.write("u/notes/a", json!({"title": "A"})).await.unwrap();

        let (seen, callback) = recorder();
        let _sub = remote.subscribe("u/notes", callback).await.unwrap();

        remote.write("u/notes/b", json!({"title": "B"})).await.unwrap();
        // Unrelated branch: no notification
        remote.write("u/folders/f", json!({"name": "F"})).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Some(json!({"a": {"title": "A"}})));
        assert_eq!(
            seen[1],
            Some(json!({"a": {"title": "A"}, "b": {"title": "B"}}))
        );
    }

    #[tokio::test]
    async fn test_subscription_drop_unsubscribes() {
        let remote = InMemoryRemote::new();
        let (seen, callback) = recorder();

        {
            let _sub = remote.subscribe("x", callback).await.unwrap();
            assert_eq!(remote.listener_count(), 1);
        }
        assert_eq!(remote.listener_count(), 0);

        remote.write("x", json!(1)).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_waits_for_concurrent_reader() {
        let remote = InMemoryRemote::new();
        let (seen, callback) = recorder();
        let sub = remote.subscribe("x", callback).await.unwrap();

        let reading = remote.shared.listeners.read().unwrap();
        let dropper = std::thread::spawn(move || drop(sub));
        std::thread::sleep(std::time::Duration::from_millis(20));
        drop(reading);
        dropper.join().unwrap();

        assert_eq!(remote.listener_count(), 0);
        remote.write("x", json!(1)).await.unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_unsubscribe() {
        let remote = InMemoryRemote::new();
        let (_seen, callback) = recorder();
        let sub = remote.subscribe("x", callback).await.unwrap();
        sub.unsubscribe();
        assert_eq!(remote.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_value_does_not_notify() {
        let remote = InMemoryRemote::new();
        remote.write("x/y", json!(1)).await.unwrap();

        let (seen, callback) = recorder();
        let _sub = remote.subscribe("x", callback).await.unwrap();
        remote.write("x/y", json!(1)).await.unwrap();
        remote.delete("x/missing").await.unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_paths_rejected() {
        let remote = InMemoryRemote::new();
        assert!(remote.write("a//b", json!(1)).await.is_err());
        assert!(remote.write("a/b.c", json!(1)).await.is_err());
        assert!(remote.write("a/$b", json!(1)).await.is_err());
        assert!(remote.delete("a/[0]").await.is_err());
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let remote = InMemoryRemote::new();
        remote.fail_mutations_after(Some(1));

        remote.write("a", json!(1)).await.unwrap();
        let err = remote.write("b", json!(2)).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unavailable(_)));

        remote.fail_mutations_after(None);
        remote.write("b", json!(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_arc_shares_tree() {
        let remote = Arc::new(InMemoryRemote::new());
        let store: Arc<dyn RemoteStore> = remote.clone();
        store.write("k", json!("v")).await.unwrap();
        assert_eq!(remote.get("k").unwrap(), Some(json!("v")));
    }
}
