use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Children mapping: remote item id -> snapshot node
pub type SnapshotChildren = BTreeMap<String, SnapshotNode>;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Kind of a remote item
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Folder,
    Notebook,
}

/// Last-known local state of one remote item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotNode {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Title when the item was first seen
    pub name: String,
    /// Mirror-relative path, `/`-separated, fixed at first discovery
    pub path: String,
    /// Epoch seconds of the last successful materialization, 0 if never
    pub update_time: i64,
    /// Children (folders only)
    #[serde(default)]
    pub items: SnapshotChildren,
}

impl SnapshotNode {
    /// New node for an item first seen under `parent_path` (`None` at root)
    pub fn discovered(node_type: NodeType, title: &str, parent_path: Option<&str>) -> Self {
        let component = sanitize_component(title);
        let path = match parent_path {
            Some(parent) if !parent.is_empty() => format!("{}/{}", parent, component),
            _ => component,
        };
        Self {
            node_type,
            name: title.to_string(),
            path,
            update_time: 0,
            items: SnapshotChildren::new(),
        }
    }

    /// Like [`SnapshotNode::discovered`], but suffixes ` (2)`, ` (3)`, ... when the
    /// mirror artifact would collide with one a sibling already owns. Two titles
    /// collide when they sanitize to the same name, ignoring case.
    pub fn discovered_among(
        node_type: NodeType,
        title: &str,
        parent_path: Option<&str>,
        siblings: &SnapshotChildren,
    ) -> Self {
        let mut node = Self::discovered(node_type, title, parent_path);
        let base = node.path.clone();
        let mut suffix = 1;
        while siblings.values().any(|s| s.artifact_key() == node.artifact_key()) {
            suffix += 1;
            node.path = format!("{} ({})", base, suffix);
        }
        node
    }

    fn artifact_key(&self) -> String {
        match self.node_type {
            NodeType::Folder => self.path.to_lowercase(),
            NodeType::Notebook => format!("{}.pdf", self.path).to_lowercase(),
        }
    }

    /// Mirror directory for a folder node
    pub fn folder_path(&self, sync_dir: &Path) -> PathBuf {
        mirror_path(sync_dir, &self.path)
    }

    /// Mirror PDF file for a notebook node
    pub fn document_path(&self, sync_dir: &Path) -> PathBuf {
        let mut path = mirror_path(sync_dir, &self.path);
        let file_name = match path.file_name() {
            Some(name) => format!("{}.pdf", name.to_string_lossy()),
            None => "_.pdf".to_string(),
        };
        path.set_file_name(file_name);
        path
    }

    /// Mirror artifact for this node, by type
    pub fn artifact_path(&self, sync_dir: &Path) -> PathBuf {
        match self.node_type {
            NodeType::Folder => self.folder_path(sync_dir),
            NodeType::Notebook => self.document_path(sync_dir),
        }
    }
}

/// Root of the snapshot: a children mapping with no folder semantics of its own
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct SnapshotTree {
    pub items: SnapshotChildren,
}

impl SnapshotTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a node anywhere in the tree by id
    pub fn find(&self, id: &str) -> Option<&SnapshotNode> {
        fn walk<'a>(items: &'a SnapshotChildren, id: &str) -> Option<&'a SnapshotNode> {
            if let Some(node) = items.get(id) {
                return Some(node);
            }
            items.values().find_map(|child| walk(&child.items, id))
        }
        walk(&self.items, id)
    }

    /// (folders, notebooks) counts
    pub fn counts(&self) -> (usize, usize) {
        fn walk(items: &SnapshotChildren, acc: &mut (usize, usize)) {
            for node in items.values() {
                match node.node_type {
                    NodeType::Folder => acc.0 += 1,
                    NodeType::Notebook => acc.1 += 1,
                }
                walk(&node.items, acc);
            }
        }
        let mut acc = (0, 0);
        walk(&self.items, &mut acc);
        acc
    }

    /// Most recent materialization time across all notebooks
    pub fn latest_update(&self) -> Option<i64> {
        fn walk(items: &SnapshotChildren, latest: &mut Option<i64>) {
            for node in items.values() {
                if node.update_time > 0 {
                    *latest = Some(latest.map_or(node.update_time, |l| l.max(node.update_time)));
                }
                walk(&node.items, latest);
            }
        }
        let mut latest = None;
        walk(&self.items, &mut latest);
        latest
    }
}

/// Loads and persists the snapshot file
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot. A missing or unreadable file means "no prior state".
    pub fn load(&self) -> SnapshotTree {
        log::info!("Attempting to load snapshot from {}", self.path.display());
        if !self.path.exists() {
            log::info!("No snapshot file, starting from an empty tree");
            return SnapshotTree::new();
        }
        match self.try_load() {
            Ok(tree) => {
                let (folders, notebooks) = tree.counts();
                log::info!(
                    "Loaded snapshot: {} folder(s), {} notebook(s)",
                    folders,
                    notebooks
                );
                tree
            }
            Err(e) => {
                log::warn!(
                    "Snapshot {} is unreadable ({}), starting from an empty tree",
                    self.path.display(),
                    e
                );
                SnapshotTree::new()
            }
        }
    }

    fn try_load(&self) -> Result<SnapshotTree, SnapshotError> {
        let data = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// Rewrite the whole snapshot: temp file in the same directory, then rename
    pub fn save(&self, tree: &SnapshotTree) -> Result<(), SnapshotError> {
        log::info!("Saving snapshot to {}", self.path.display());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(tree)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Make a remote title usable as a single path component
pub fn sanitize_component(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim();
    match trimmed {
        "" | "." | ".." => "_".to_string(),
        _ => trimmed.to_string(),
    }
}

/// Join a `/`-separated mirror-relative path onto the sync root
pub fn mirror_path(sync_dir: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|c| !c.is_empty())
        .fold(sync_dir.to_path_buf(), |acc, c| acc.join(c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree() -> SnapshotTree {
        let mut tree = SnapshotTree::new();
        let mut folder = SnapshotNode::discovered(NodeType::Folder, "Work", None);
        let mut notebook = SnapshotNode::discovered(NodeType::Notebook, "Meeting", Some(&folder.path));
        notebook.update_time = 1_700_000_000;
        folder.items.insert("nb-1".to_string(), notebook);
        tree.items.insert("folder-1".to_string(), folder);
        tree
    }

    #[test]
    fn test_discovered_paths() {
        let root = SnapshotNode::discovered(NodeType::Folder, "Work", None);
        assert_eq!(root.path, "Work");
        assert_eq!(root.update_time, 0);
        assert!(root.items.is_empty());

        let child = SnapshotNode::discovered(NodeType::Notebook, "Plans", Some(&root.path));
        assert_eq!(child.path, "Work/Plans");
        assert_eq!(
            child.document_path(Path::new("/mirror")),
            PathBuf::from("/mirror/Work/Plans.pdf")
        );
        assert_eq!(
            root.folder_path(Path::new("/mirror")),
            PathBuf::from("/mirror/Work")
        );
    }

    #[test]
    fn test_discovered_among_suffixes_colliding_siblings() {
        let mut siblings = SnapshotChildren::new();
        siblings.insert(
            "n1".to_string(),
            SnapshotNode::discovered(NodeType::Notebook, "a/b", Some("Work")),
        );

        let second = SnapshotNode::discovered_among(NodeType::Notebook, "A_B", Some("Work"), &siblings);
        assert_eq!(second.path, "Work/A_B (2)");
        siblings.insert("n2".to_string(), second);

        let third = SnapshotNode::discovered_among(NodeType::Notebook, "a_b", Some("Work"), &siblings);
        assert_eq!(third.path, "Work/a_b (3)");

        // A folder named like a notebook's file does not clash with the notebook
        let folder = SnapshotNode::discovered_among(NodeType::Folder, "a_b", Some("Work"), &siblings);
        assert_eq!(folder.path, "Work/a_b");
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("a/b\\c"), "a_b_c");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("   "), "_");
        assert_eq!(sanitize_component("Notes 2024"), "Notes 2024");
    }

    #[test]
    fn test_document_path_keeps_dots_in_title() {
        let node = SnapshotNode::discovered(NodeType::Notebook, "v1.2 notes", None);
        assert_eq!(
            node.document_path(Path::new("/m")),
            PathBuf::from("/m/v1.2 notes.pdf")
        );
    }

    #[test]
    fn test_serialized_layout() {
        let json = serde_json::to_value(sample_tree()).unwrap();
        let folder = &json["folder-1"];
        assert_eq!(folder["type"], "folder");
        assert_eq!(folder["name"], "Work");
        assert_eq!(folder["path"], "Work");
        assert_eq!(folder["updateTime"], 0);
        assert_eq!(folder["items"]["nb-1"]["type"], "notebook");
        assert_eq!(folder["items"]["nb-1"]["updateTime"], 1_700_000_000);
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path().join("state").join("notebooks.json"));
        let tree = sample_tree();

        store.save(&tree).unwrap();
        assert!(!temp.path().join("state").join("notebooks.json.tmp").exists());
        assert_eq!(store.load(), tree);
    }

    #[test]
    fn test_load_missing_or_corrupt_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = SnapshotStore::new(temp.path().join("notebooks.json"));
        assert!(store.load().items.is_empty());

        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().items.is_empty());
    }

    #[test]
    fn test_find_counts_latest() {
        let tree = sample_tree();
        assert_eq!(tree.find("nb-1").map(|n| n.name.as_str()), Some("Meeting"));
        assert!(tree.find("missing").is_none());
        assert_eq!(tree.counts(), (1, 1));
        assert_eq!(tree.latest_update(), Some(1_700_000_000));
    }
}
