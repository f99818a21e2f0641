//! # Cache Layer
//!
//! In-memory, ephemeral projection of the structural graph plus the
//! inverted search index. This is the only read path for structure;
//! everything here is rebuildable from the Structure Source and the
//! Durable Store, and the cache never calls either of them.
//!
//! ## Concurrency
//!
//! The structural snapshot is an `Arc` behind an `RwLock`. Readers
//! clone the `Arc` and work lock-free on an immutable snapshot; a bulk
//! load builds the replacement snapshot off to the side and swaps it in
//! (copy-and-swap). A reader therefore observes either the pre-load or
//! the fully post-load state, never a partial one. Bulk loads are
//! exclusive with each other via a dedicated load mutex.

use crate::index::InvertedIndex;
use crate::path::MaterializedPath;
use crate::primitives::MAX_SUBTREE_NODES;
use crate::structure::StructureSet;
use crate::{Alias, Association, ChildRef, Node, NodeId, TrellisError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock};

// =============================================================================
// SNAPSHOT
// =============================================================================

/// One immutable structural snapshot.
#[derive(Debug)]
struct Snapshot {
    set: StructureSet,
    /// parent path -> children ordered by (weight, edge id)
    children: BTreeMap<MaterializedPath, Vec<ChildRef>>,
    /// every edge path in the snapshot; the empty path is implicitly known
    known_paths: BTreeSet<MaterializedPath>,
}

impl Snapshot {
    fn build(set: StructureSet) -> Self {
        let mut children: BTreeMap<MaterializedPath, Vec<ChildRef>> = BTreeMap::new();
        let mut known_paths = BTreeSet::new();

        for edge in set.edges() {
            known_paths.insert(edge.path.clone());
            let parent_path = edge.path.parent().unwrap_or_else(MaterializedPath::empty);
            let kind = set
                .node(edge.child)
                .map(|n| n.kind.clone())
                .unwrap_or_else(|| crate::NodeKind::new(""));
            children.entry(parent_path).or_default().push(ChildRef {
                edge: edge.id,
                node: edge.child,
                kind,
                path: edge.path.clone(),
                weight: edge.weight,
            });
        }

        for refs in children.values_mut() {
            refs.sort_by_key(|c| (c.weight, c.edge));
        }

        Self {
            set,
            children,
            known_paths,
        }
    }
}

// =============================================================================
// STRUCTURE CACHE
// =============================================================================

/// The cache layer: structural snapshot + inverted search index.
///
/// Constructed once at startup, owned by the engine, and passed
/// explicitly to the router and the recovery manager. Holds no data
/// that cannot be reconstructed.
#[derive(Debug, Default)]
pub struct StructureCache {
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    index: RwLock<InvertedIndex>,
    load_lock: Mutex<()>,
}

impl StructureCache {
    /// Create a cold (empty) cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> Result<Arc<Snapshot>, TrellisError> {
        self.snapshot
            .read()
            .map_err(|_| TrellisError::Io("cache snapshot lock poisoned".to_string()))?
            .clone()
            .ok_or(TrellisError::StructureUnavailable)
    }

    /// True once a structural snapshot has been loaded.
    #[must_use]
    pub fn is_warm(&self) -> bool {
        self.snapshot
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    // =========================================================================
    // BULK LOAD
    // =========================================================================

    /// Bulk load/replace the structural snapshot.
    ///
    /// Used by the recovery manager and structural sync. Idempotent:
    /// replaying the same set leaves observable state unchanged. The
    /// search index is untouched; it has its own rebuild path.
    pub fn put_structure(&self, set: StructureSet) -> Result<(), TrellisError> {
        // Serialize bulk loads against each other; readers stay lock-free
        // on the old snapshot while the new one is built.
        let _load_guard = self
            .load_lock
            .lock()
            .map_err(|_| TrellisError::Io("cache load lock poisoned".to_string()))?;

        let next = Arc::new(Snapshot::build(set));

        let mut slot = self
            .snapshot
            .write()
            .map_err(|_| TrellisError::Io("cache snapshot lock poisoned".to_string()))?;
        *slot = Some(next);
        Ok(())
    }

    /// Drop the snapshot and the index, simulating total cache loss.
    ///
    /// Subsequent structural and search reads answer
    /// [`TrellisError::StructureUnavailable`] until recovery re-warms
    /// the cache.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.snapshot.write() {
            *slot = None;
        }
        if let Ok(mut index) = self.index.write() {
            index.clear();
        }
    }

    // =========================================================================
    // STRUCTURAL READS
    // =========================================================================

    /// Look up a node by id.
    pub fn get_node(&self, id: NodeId) -> Result<Node, TrellisError> {
        let snap = self.current()?;
        snap.set
            .node(id)
            .cloned()
            .ok_or_else(|| TrellisError::NotFound(format!("node {}", id.0)))
    }

    /// Look up a node by alias.
    pub fn get_node_by_alias(&self, alias: &Alias) -> Result<Node, TrellisError> {
        let snap = self.current()?;
        let id = snap
            .set
            .node_by_alias(alias)
            .ok_or_else(|| TrellisError::NotFound(format!("alias {:?}", alias.as_str())))?;
        snap.set
            .node(id)
            .cloned()
            .ok_or_else(|| TrellisError::NotFound(format!("node {}", id.0)))
    }

    /// Children of a parent path, ordered by weight then insertion order.
    ///
    /// The empty path lists root-level edges and is always known; any
    /// other path must belong to an edge in the snapshot.
    pub fn get_children(
        &self,
        parent_path: &MaterializedPath,
    ) -> Result<Vec<ChildRef>, TrellisError> {
        let snap = self.current()?;
        if !parent_path.is_empty() && !snap.known_paths.contains(parent_path) {
            return Err(TrellisError::NotFound(format!(
                "path {:?}",
                parent_path.as_str()
            )));
        }
        Ok(snap.children.get(parent_path).cloned().unwrap_or_default())
    }

    /// The association whose materialized path equals `path`.
    pub fn edge_at(&self, path: &MaterializedPath) -> Result<Association, TrellisError> {
        let snap = self.current()?;
        snap.set
            .edges()
            .find(|e| &e.path == path)
            .cloned()
            .ok_or_else(|| TrellisError::NotFound(format!("path {:?}", path.as_str())))
    }

    /// The subtree rooted at `path`, in weight-ordered depth-first
    /// order, the root's own edge first.
    ///
    /// Bounded by `MAX_SUBTREE_NODES`; a larger subtree is truncated at
    /// the bound rather than rejected.
    pub fn subtree(&self, path: &MaterializedPath) -> Result<Vec<ChildRef>, TrellisError> {
        let snap = self.current()?;
        if !snap.known_paths.contains(path) {
            return Err(TrellisError::NotFound(format!("path {:?}", path.as_str())));
        }

        let root_edge = snap
            .set
            .edges()
            .find(|e| &e.path == path)
            .ok_or_else(|| TrellisError::NotFound(format!("path {:?}", path.as_str())))?;
        let root_kind = snap
            .set
            .node(root_edge.child)
            .map(|n| n.kind.clone())
            .unwrap_or_else(|| crate::NodeKind::new(""));

        let mut out = vec![ChildRef {
            edge: root_edge.id,
            node: root_edge.child,
            kind: root_kind,
            path: root_edge.path.clone(),
            weight: root_edge.weight,
        }];
        let mut stack: Vec<MaterializedPath> = vec![path.clone()];
        while let Some(current) = stack.pop() {
            if out.len() >= MAX_SUBTREE_NODES {
                break;
            }
            if let Some(refs) = snap.children.get(&current) {
                // Push in reverse so the stack pops in sibling order.
                for child in refs.iter().rev() {
                    stack.push(child.path.clone());
                }
                for child in refs {
                    if out.len() >= MAX_SUBTREE_NODES {
                        break;
                    }
                    out.push(child.clone());
                }
            }
        }
        Ok(out)
    }

    // =========================================================================
    // SEARCH INDEX
    // =========================================================================

    /// Add words to the inverted index for a node.
    pub fn index_words<I, S>(&self, node: NodeId, words: I) -> Result<(), TrellisError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = self
            .index
            .write()
            .map_err(|_| TrellisError::Io("index lock poisoned".to_string()))?;
        index.index_words(node, words);
        Ok(())
    }

    /// Remove every index posting for a node.
    pub fn deindex(&self, node: NodeId) -> Result<(), TrellisError> {
        let mut index = self
            .index
            .write()
            .map_err(|_| TrellisError::Io("index lock poisoned".to_string()))?;
        index.deindex(node);
        Ok(())
    }

    /// Nodes indexed under a word.
    ///
    /// Answers [`TrellisError::StructureUnavailable`] on a cold cache so
    /// callers can distinguish "no hits" from "no index".
    pub fn search_word(&self, word: &str) -> Result<BTreeSet<NodeId>, TrellisError> {
        if !self.is_warm() {
            return Err(TrellisError::StructureUnavailable);
        }
        let index = self
            .index
            .read()
            .map_err(|_| TrellisError::Io("index lock poisoned".to_string()))?;
        Ok(index.search_word(word))
    }

    /// Drop all index postings (start of an index rebuild).
    pub fn clear_index(&self) -> Result<(), TrellisError> {
        let mut index = self
            .index
            .write()
            .map_err(|_| TrellisError::Io("index lock poisoned".to_string()))?;
        index.clear();
        Ok(())
    }

    /// Number of distinct indexed words.
    #[must_use]
    pub fn indexed_word_count(&self) -> usize {
        self.index.read().map(|i| i.word_count()).unwrap_or(0)
    }
}

// =============================================================================
// TESTS
// =============================================================================
