//! File-backed remote store using tokio::fs.
//!
//! The whole tree lives in memory (an `InMemoryRemote`, so subscriptions
//! behave the same) and is rewritten to a JSON file after every mutation.
//! Reopening the file in a new process is a reload.

use async_trait::async_trait;
use notes_core::remote::{ChangeCallback, InMemoryRemote, RemoteError, RemoteStore, Result, Subscription};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct JsonFileRemote {
    path: PathBuf,
    tree: InMemoryRemote,
    /// Serializes file writes so an older tree never lands after a newer one.
    persist_lock: Mutex<()>,
}

impl JsonFileRemote {
    /// Load `path`, or start empty if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tree = match fs::read_to_string(&path).await {
            Ok(content) => {
                let value: Value = serde_json::from_str(&content)
                    .map_err(|e| RemoteError::Serialization(format!("{}: {}", path.display(), e)))?;
                info!("Loaded store from {:?}", path);
                InMemoryRemote::with_value(value)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No store at {:?}, starting empty", path);
                InMemoryRemote::new()
            }
            Err(e) => return Err(RemoteError::Unavailable(e.to_string())),
        };

        Ok(Self {
            path,
            tree,
            persist_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory tree, for inspection.
    pub fn tree(&self) -> &InMemoryRemote {
        &self.tree
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let content = serde_json::to_string_pretty(&self.tree.export())
            .map_err(|e| RemoteError::Serialization(e.to_string()))?;

        // Create parent directories if needed
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;
        debug!("Persisted store to {:?}", self.path);
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for JsonFileRemote {
    async fn write(&self, path: &str, value: Value) -> Result<()> {
        self.tree.write(path, value).await?;
        self.persist().await
    }

    async fn patch(&self, path: &str, partial: Map<String, Value>) -> Result<()> {
        self.tree.patch(path, partial).await?;
        self.persist().await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.tree.delete(path).await?;
        self.persist().await
    }

    async fn subscribe(&self, path: &str, on_change: ChangeCallback) -> Result<Subscription> {
        self.tree.subscribe(path, on_change).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let remote = JsonFileRemote::open(dir.path().join("store.json")).await.unwrap();
        assert_eq!(remote.tree().export(), json!({}));
        assert!(!remote.path().exists());
    }

    #[tokio::test]
    async fn test_mutations_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let remote = JsonFileRemote::open(&path).await.unwrap();
        remote.write("users/u/folders/f", json!({"name": "Work"})).await.unwrap();
        remote.write("users/u/folders/g", json!({"name": "Home"})).await.unwrap();
        remote.delete("users/u/folders/g").await.unwrap();

        let mut partial = Map::new();
        partial.insert("name".into(), json!("Office"));
        remote.patch("users/u/folders/f", partial).await.unwrap();

        let reopened = JsonFileRemote::open(&path).await.unwrap();
        assert_eq!(
            reopened.tree().get("users/u/folders").unwrap(),
            Some(json!({"f": {"name": "Office"}}))
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            JsonFileRemote::open(&path).await,
            Err(RemoteError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_path_does_not_persist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        let remote = JsonFileRemote::open(&path).await.unwrap();

        assert!(remote.write("bad/pa.th", json!(1)).await.is_err());
        assert!(!path.exists());
    }
}
