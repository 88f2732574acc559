//! Persisted record shapes and the flat tables built from remote snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// Title given to notes created without one.
pub const DEFAULT_NOTE_TITLE: &str = "New Note";

/// A note as stored remotely. The body is always ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRecord {
    #[serde(default)]
    pub title: String,
    /// `base64(nonce || ciphertext || tag)`
    #[serde(rename = "content_enc", default)]
    pub encrypted_content: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    #[serde(rename = "folder", default)]
    pub folder_id: Option<String>,
}

/// A folder as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    pub name: String,
    #[serde(rename = "parent", default)]
    pub parent_id: Option<String>,
}

pub type NoteTable = BTreeMap<String, NoteRecord>;
pub type FolderTable = BTreeMap<String, FolderRecord>;

/// List entry for a note, without its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteSummary {
    pub id: String,
    pub title: String,
    #[serde(rename = "folder")]
    pub folder_id: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl NoteSummary {
    pub fn from_record(id: &str, record: &NoteRecord) -> Self {
        Self {
            id: id.to_string(),
            title: record.title.clone(),
            folder_id: record.folder_id.clone(),
            updated_at: record.updated_at,
        }
    }
}

fn parse_table<T: for<'de> Deserialize<'de>>(value: Option<Value>, kind: &str) -> BTreeMap<String, T> {
    let Some(Value::Object(map)) = value else {
        return BTreeMap::new();
    };

    let mut table = BTreeMap::new();
    for (id, raw) in map {
        match serde_json::from_value::<T>(raw) {
            Ok(record) => {
                table.insert(id, record);
            }
            Err(e) => warn!("Skipping malformed {} record {}: {}", kind, id, e),
        }
    }
    table
}

/// Parse the value of a user's `notes` node. Malformed entries are skipped.
pub fn parse_notes(value: Option<Value>) -> NoteTable {
    parse_table(value, "note")
}

/// Parse the value of a user's `folders` node. Malformed entries are skipped.
pub fn parse_folders(value: Option<Value>) -> FolderTable {
    parse_table(value, "folder")
}

/// Summaries of the notes filed directly in `folder_id` (`None` = unfiled),
/// in key order.
pub fn notes_in(notes: &NoteTable, folder_id: Option<&str>) -> Vec<NoteSummary> {
    notes
        .iter()
        .filter(|(_, n)| n.folder_id.as_deref() == folder_id)
        .map(|(id, n)| NoteSummary::from_record(id, n))
        .collect()
}

/// Id of the most recently updated note.
///
/// Ties on `updated_at` go to the last id in key order.
pub fn most_recent(notes: &NoteTable) -> Option<&str> {
    notes
        .iter()
        .max_by_key(|(_, n)| n.updated_at)
        .map(|(id, _)| id.as_str())
}
