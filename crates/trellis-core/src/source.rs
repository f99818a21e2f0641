//! # Structure Source
//!
//! The authoritative, human-editable record of the graph's shape: two
//! TOML files in a source directory, `nodes.toml` and
//! `associations.toml`. Every structural sync rewrites both files in
//! normalized form (sorted by id), so diffs stay reviewable and loading
//! the rewritten files reproduces the same [`StructureSet`].
//!
//! Content payloads never appear here; they belong to the Durable Store.

use crate::structure::{EdgeDef, StructureSet};
use crate::{Alias, EdgeId, Node, NodeId, NodeKind, TrellisError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the node table.
pub const NODES_FILE: &str = "nodes.toml";
/// File name of the association table.
pub const ASSOCIATIONS_FILE: &str = "associations.toml";

// =============================================================================
// ROW FORMS
// =============================================================================

/// One `[[node]]` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeRow {
    id: u64,
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    created_at: u64,
    modified_at: u64,
}

/// One `[[association]]` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EdgeRow {
    id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<u64>,
    child: u64,
    weight: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NodesDoc {
    #[serde(default, rename = "node")]
    nodes: Vec<NodeRow>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct AssociationsDoc {
    #[serde(default, rename = "association")]
    associations: Vec<EdgeRow>,
}

impl From<&Node> for NodeRow {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.0,
            kind: node.kind.as_str().to_string(),
            alias: node.alias.as_ref().map(|a| a.as_str().to_string()),
            created_at: node.created_at,
            modified_at: node.modified_at,
        }
    }
}

impl From<&EdgeDef> for EdgeRow {
    fn from(def: &EdgeDef) -> Self {
        Self {
            id: def.id.0,
            parent: def.parent.map(|p| p.0),
            child: def.child.0,
            weight: def.weight,
        }
    }
}

// =============================================================================
// SOURCE DIRECTORY
// =============================================================================

/// Handle on a structure source directory.
#[derive(Debug, Clone)]
pub struct SourceDir {
    root: PathBuf,
}

impl SourceDir {
    /// Open (without reading) a source directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory this source reads and writes.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn nodes_path(&self) -> PathBuf {
        self.root.join(NODES_FILE)
    }

    fn associations_path(&self) -> PathBuf {
        self.root.join(ASSOCIATIONS_FILE)
    }

    /// Load and validate the source into a structure set.
    ///
    /// A missing file reads as an empty table, so a fresh directory
    /// loads as the empty graph.
    ///
    /// # Errors
    ///
    /// - [`TrellisError::Io`] — a file exists but cannot be read
    /// - [`TrellisError::Schema`] — TOML parse failure or invalid rows
    /// - validation errors from [`StructureSet::validate`]
    pub fn load(&self) -> Result<StructureSet, TrellisError> {
        let nodes_doc: NodesDoc = read_toml(&self.nodes_path())?;
        let edges_doc: AssociationsDoc = read_toml(&self.associations_path())?;

        let nodes = nodes_doc
            .nodes
            .into_iter()
            .map(|row| Node {
                id: NodeId(row.id),
                kind: NodeKind::new(row.kind),
                alias: row.alias.map(Alias::new),
                created_at: row.created_at,
                modified_at: row.modified_at,
            })
            .collect();
        let edges = edges_doc
            .associations
            .into_iter()
            .map(|row| EdgeDef {
                id: EdgeId(row.id),
                parent: row.parent.map(NodeId),
                child: NodeId(row.child),
                weight: row.weight,
            })
            .collect();

        StructureSet::validate(nodes, edges)
    }

    /// Rewrite both files from the set's canonical rows.
    ///
    /// Writes go through a temporary file and rename, so a crash leaves
    /// either the old or the new file, never a torn one.
    pub fn save(&self, set: &StructureSet) -> Result<(), TrellisError> {
        std::fs::create_dir_all(&self.root)
            .map_err(|e| TrellisError::Io(format!("create source dir: {e}")))?;

        let (nodes, edges) = set.to_rows();
        let nodes_doc = NodesDoc {
            nodes: nodes.iter().map(NodeRow::from).collect(),
        };
        let edges_doc = AssociationsDoc {
            associations: edges.iter().map(EdgeRow::from).collect(),
        };

        write_toml(&self.nodes_path(), &nodes_doc)?;
        write_toml(&self.associations_path(), &edges_doc)
    }

    /// Checksum of the set the source currently describes.
    pub fn checksum(&self) -> Result<u64, TrellisError> {
        Ok(self.load()?.checksum())
    }
}

fn read_toml<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T, TrellisError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(TrellisError::Io(format!("read {}: {e}", path.display()))),
    };
    toml::from_str(&text)
        .map_err(|e| TrellisError::Schema(format!("parse {}: {e}", path.display())))
}

fn write_toml<T: Serialize>(path: &Path, value: &T) -> Result<(), TrellisError> {
    let text = toml::to_string_pretty(value)
        .map_err(|e| TrellisError::Serialization(format!("encode {}: {e}", path.display())))?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, text)
        .map_err(|e| TrellisError::Io(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| TrellisError::Io(format!("rename {}: {e}", path.display())))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_set() -> StructureSet {
        let nodes = vec![
            Node::new(NodeId(1), NodeKind::new("page"), Some(Alias::new("home")), 50),
            Node::new(NodeId(2), NodeKind::new("block"), Some(Alias::new("hero")), 60),
        ];
        let edges = vec![
            EdgeDef {
                id: EdgeId(1),
                parent: None,
                child: NodeId(1),
                weight: 0,
            },
            EdgeDef {
                id: EdgeId(2),
                parent: Some(NodeId(1)),
                child: NodeId(2),
                weight: 5,
            },
        ];
        StructureSet::validate(nodes, edges).expect("valid set")
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().expect("tempdir");
        let source = SourceDir::new(dir.path());
        let set = sample_set();

        source.save(&set).expect("save");
        let loaded = source.load().expect("load");

        assert_eq!(set, loaded);
        assert_eq!(set.checksum(), loaded.checksum());
    }

    #[test]
    fn fresh_directory_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let source = SourceDir::new(dir.path());

        let set = source.load().expect("load");
        assert_eq!(set.node_count(), 0);
        assert_eq!(set.edge_count(), 0);
    }

    #[test]
    fn malformed_toml_is_a_schema_error() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(dir.path().join(NODES_FILE), "[[node]]\nid = \"oops\"\n")
            .expect("write");

        let source = SourceDir::new(dir.path());
        assert!(matches!(source.load(), Err(TrellisError::Schema(_))));
    }

    #[test]
    fn invalid_rows_fail_validation() {
        let dir = tempdir().expect("tempdir");
        // Association referencing a node that is not in nodes.toml.
        std::fs::write(
            dir.path().join(ASSOCIATIONS_FILE),
            "[[association]]\nid = 1\nchild = 42\nweight = 0\n",
        )
        .expect("write");

        let source = SourceDir::new(dir.path());
        assert!(matches!(source.load(), Err(TrellisError::Schema(_))));
    }

    #[test]
    fn save_is_normalized_and_stable() {
        let dir = tempdir().expect("tempdir");
        let source = SourceDir::new(dir.path());
        let set = sample_set();

        source.save(&set).expect("first save");
        let first = std::fs::read_to_string(dir.path().join(NODES_FILE)).expect("read");
        source.save(&set).expect("second save");
        let second = std::fs::read_to_string(dir.path().join(NODES_FILE)).expect("read");

        assert_eq!(first, second);
        assert!(first.contains("[[node]]"));
    }

    #[test]
    fn checksum_matches_loaded_set() {
        let dir = tempdir().expect("tempdir");
        let source = SourceDir::new(dir.path());
        let set = sample_set();
        source.save(&set).expect("save");

        assert_eq!(source.checksum().expect("checksum"), set.checksum());
    }
}
