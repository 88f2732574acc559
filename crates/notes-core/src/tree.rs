//! Folder forest built from flat parent pointers.
//!
//! Nodes live in an arena keyed by folder id. Parent pointers are not
//! validated when stored, so every walk here is iterative and tracks visited
//! ids: a chain that loops back on itself is reported as
//! [`TreeError::Cycle`] instead of being followed forever.

use crate::records::{FolderRecord, FolderTable};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Folder parent chain loops back through {folder_id}")]
    Cycle { folder_id: String },

    #[error("Folder not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, TreeError>;

#[derive(Debug, Clone)]
struct ArenaNode {
    folder: FolderRecord,
    children: Vec<String>,
}

/// Owned nested view of one folder and everything below it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    pub children: Vec<TreeNode>,
}

/// Rooted forest over a flat folder table.
#[derive(Debug, Clone, Default)]
pub struct Forest {
    nodes: BTreeMap<String, ArenaNode>,
    roots: Vec<String>,
}

/// Build the forest in a single pass over `folders`.
///
/// A folder whose parent is null or names a missing folder becomes a root.
/// Cycles are not detected here; see [`Forest::unreachable`].
pub fn build_forest(folders: &FolderTable) -> Forest {
    let mut nodes: BTreeMap<String, ArenaNode> = folders
        .iter()
        .map(|(id, folder)| {
            (
                id.clone(),
                ArenaNode {
                    folder: folder.clone(),
                    children: Vec::new(),
                },
            )
        })
        .collect();

    let mut roots = Vec::new();
    for (id, folder) in folders {
        match folder.parent_id.as_deref() {
            Some(parent) if nodes.contains_key(parent) => {
                if let Some(node) = nodes.get_mut(parent) {
                    node.children.push(id.clone());
                }
            }
            _ => roots.push(id.clone()),
        }
    }

    Forest { nodes, roots }
}

impl Forest {
    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&FolderRecord> {
        self.nodes.get(id).map(|n| &n.folder)
    }

    /// Direct children of `id`, in table order.
    pub fn children(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Every folder strictly below `id`, parents before children.
    ///
    /// Stops at a revisit, so a cyclic table still yields a finite closure.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::from([id]);
        let mut out = Vec::new();
        let mut stack: Vec<&str> = self.children(id).iter().rev().map(String::as_str).collect();

        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                warn!("Folder {} reached twice while collecting descendants of {}", current, id);
                continue;
            }
            out.push(current.to_string());
            stack.extend(self.children(current).iter().rev().map(String::as_str));
        }
        out
    }

    /// Parent chain of `id`, nearest first. Dangling parents end the chain.
    pub fn ancestors(&self, id: &str) -> Result<Vec<String>> {
        let mut node = self
            .nodes
            .get(id)
            .ok_or_else(|| TreeError::NotFound(id.to_string()))?;
        let mut seen: HashSet<&str> = HashSet::from([id]);
        let mut out = Vec::new();

        while let Some(parent) = node.folder.parent_id.as_deref() {
            let Some(next) = self.nodes.get(parent) else {
                break;
            };
            if !seen.insert(parent) {
                return Err(TreeError::Cycle {
                    folder_id: parent.to_string(),
                });
            }
            out.push(parent.to_string());
            node = next;
        }
        Ok(out)
    }

    /// Folders that no root reaches. Non-empty only when parent pointers
    /// form a cycle (the cycle and anything hanging off it).
    pub fn unreachable(&self) -> Vec<String> {
        let mut reached: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = self.roots.iter().map(String::as_str).collect();
        while let Some(current) = stack.pop() {
            if reached.insert(current) {
                stack.extend(self.children(current).iter().map(String::as_str));
            }
        }
        self.nodes
            .keys()
            .filter(|id| !reached.contains(id.as_str()))
            .cloned()
            .collect()
    }

    /// Materialize the nested tree for display.
    ///
    /// Fails with [`TreeError::Cycle`] if any folder is unreachable from the
    /// roots, since such folders can only exist inside a parent loop.
    pub fn nested(&self) -> Result<Vec<TreeNode>> {
        if let Some(folder_id) = self.unreachable().into_iter().next() {
            warn!("Folder table contains a parent cycle through {}", folder_id);
            return Err(TreeError::Cycle { folder_id });
        }
        Ok(self.roots.iter().map(|id| self.materialize(id)).collect())
    }

    /// Depth-first (id, depth) listing from the roots, for flat renderers.
    pub fn walk(&self) -> Result<Vec<(String, usize)>> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<(&str, usize)> = self.roots.iter().rev().map(|id| (id.as_str(), 0)).collect();

        while let Some((current, depth)) = stack.pop() {
            if !seen.insert(current) {
                return Err(TreeError::Cycle {
                    folder_id: current.to_string(),
                });
            }
            out.push((current.to_string(), depth));
            stack.extend(
                self.children(current)
                    .iter()
                    .rev()
                    .map(|child| (child.as_str(), depth + 1)),
            );
        }

        if out.len() != self.nodes.len() {
            let folder_id = self.unreachable().into_iter().next().unwrap_or_default();
            return Err(TreeError::Cycle { folder_id });
        }
        Ok(out)
    }

    // Only called on reachable ids, so the recursion is bounded by the table.
    fn materialize(&self, id: &str) -> TreeNode {
        let name = self.get(id).map(|f| f.name.clone()).unwrap_or_default();
        TreeNode {
            id: id.to_string(),
            name,
            children: self
                .children(id)
                .iter()
                .map(|child| self.materialize(child))
                .collect(),
        }
    }
}
