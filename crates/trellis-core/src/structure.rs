//! # Structure Set
//!
//! The validated, canonical in-memory form of the graph's shape. One
//! representation is shared by the Structure Source loader, the durable
//! backup snapshot, and the cache bulk load, so "structurally equal"
//! means equal `StructureSet`s everywhere.
//!
//! Validation happens here, at construction: dangling references,
//! duplicate ids/aliases, double placements and cycles are rejected
//! before a set exists at all. Depth and materialized paths are computed
//! during validation and are never trusted from input.

use crate::path::MaterializedPath;
use crate::primitives::{MAX_DEPTH, MAX_STRUCTURE_EDGES, MAX_STRUCTURE_NODES, MAX_TAG_LENGTH};
use crate::{Alias, Association, EdgeId, Node, NodeId, TrellisError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// EDGE DEFINITION (pre-validation input)
// =============================================================================

/// A proposed association before depth/path computation.
///
/// This is what source rows and structural edits supply; the validated
/// [`Association`] with its computed depth and path only exists inside a
/// [`StructureSet`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDef {
    /// Unique edge id; numeric order encodes insertion order.
    pub id: EdgeId,
    /// Parent node, absent for root-level edges.
    pub parent: Option<NodeId>,
    /// The associated (child) node.
    pub child: NodeId,
    /// Ordering weight.
    pub weight: i64,
}

impl From<&Association> for EdgeDef {
    fn from(assoc: &Association) -> Self {
        Self {
            id: assoc.id,
            parent: assoc.parent,
            child: assoc.child,
            weight: assoc.weight,
        }
    }
}

// =============================================================================
// STRUCTURE SET
// =============================================================================

/// A validated structural snapshot: nodes, associations, and the alias
/// index, with depth and materialized path computed per edge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructureSet {
    nodes: BTreeMap<NodeId, Node>,
    edges: BTreeMap<EdgeId, Association>,
    alias_index: BTreeMap<Alias, NodeId>,
}

impl StructureSet {
    /// Validate raw nodes and edge definitions into a structure set.
    ///
    /// # Errors
    ///
    /// - [`TrellisError::Schema`] — too many rows, over-long tags,
    ///   dangling parent/child references, nesting beyond `MAX_DEPTH`
    /// - [`TrellisError::Consistency`] — duplicate node ids, edge ids or
    ///   aliases, or a node placed under two parents
    /// - [`TrellisError::Cycle`] — a parent chain that reaches back into
    ///   itself
    pub fn validate(nodes: Vec<Node>, edges: Vec<EdgeDef>) -> Result<Self, TrellisError> {
        if nodes.len() > MAX_STRUCTURE_NODES {
            return Err(TrellisError::Schema(format!(
                "node count {} exceeds maximum {}",
                nodes.len(),
                MAX_STRUCTURE_NODES
            )));
        }
        if edges.len() > MAX_STRUCTURE_EDGES {
            return Err(TrellisError::Schema(format!(
                "edge count {} exceeds maximum {}",
                edges.len(),
                MAX_STRUCTURE_EDGES
            )));
        }

        // Node pass: unique ids, unique aliases, bounded tags.
        let mut node_map: BTreeMap<NodeId, Node> = BTreeMap::new();
        let mut alias_index: BTreeMap<Alias, NodeId> = BTreeMap::new();
        for node in nodes {
            if node.kind.as_str().is_empty() || node.kind.as_str().len() > MAX_TAG_LENGTH {
                return Err(TrellisError::Schema(format!(
                    "node {} has invalid kind tag",
                    node.id.0
                )));
            }
            if let Some(alias) = &node.alias {
                if alias.as_str().is_empty()
                    || alias.as_str().len() > MAX_TAG_LENGTH
                    || alias.as_str().contains(crate::primitives::PATH_SEPARATOR)
                {
                    return Err(TrellisError::Schema(format!(
                        "node {} has invalid alias {:?}",
                        node.id.0,
                        alias.as_str()
                    )));
                }
                if let Some(holder) = alias_index.insert(alias.clone(), node.id) {
                    return Err(TrellisError::Consistency(format!(
                        "alias {:?} assigned to both node {} and node {}",
                        alias.as_str(),
                        holder.0,
                        node.id.0
                    )));
                }
            }
            if node_map.insert(node.id, node.clone()).is_some() {
                return Err(TrellisError::Consistency(format!(
                    "duplicate node id {}",
                    node.id.0
                )));
            }
        }

        // Edge pass: unique ids, existing endpoints, single placement.
        let mut edge_defs: BTreeMap<EdgeId, EdgeDef> = BTreeMap::new();
        let mut placement: BTreeMap<NodeId, EdgeId> = BTreeMap::new();
        for def in edges {
            if !node_map.contains_key(&def.child) {
                return Err(TrellisError::Schema(format!(
                    "edge {} references missing child node {}",
                    def.id.0, def.child.0
                )));
            }
            if let Some(parent) = def.parent {
                if !node_map.contains_key(&parent) {
                    return Err(TrellisError::Schema(format!(
                        "edge {} references missing parent node {}",
                        def.id.0, parent.0
                    )));
                }
            }
            if let Some(other) = placement.insert(def.child, def.id) {
                return Err(TrellisError::Consistency(format!(
                    "node {} placed by both edge {} and edge {}",
                    def.child.0, other.0, def.id.0
                )));
            }
            if edge_defs.insert(def.id, def.clone()).is_some() {
                return Err(TrellisError::Consistency(format!(
                    "duplicate edge id {}",
                    def.id.0
                )));
            }
        }

        // Path pass: compute depth and materialized path per edge by
        // resolving the parent chain. A chain that revisits a node is a
        // cycle; a chain deeper than MAX_DEPTH is malformed.
        let mut resolved: BTreeMap<EdgeId, (u32, MaterializedPath)> = BTreeMap::new();
        for &edge_id in edge_defs.keys() {
            Self::resolve_chain(edge_id, &edge_defs, &placement, &node_map, &mut resolved)?;
        }

        let mut edge_map: BTreeMap<EdgeId, Association> = BTreeMap::new();
        let mut seen_paths: BTreeSet<MaterializedPath> = BTreeSet::new();
        for (edge_id, def) in &edge_defs {
            let (depth, path) = resolved
                .get(edge_id)
                .cloned()
                .ok_or_else(|| TrellisError::Schema(format!("edge {} unresolved", edge_id.0)))?;
            if !seen_paths.insert(path.clone()) {
                return Err(TrellisError::Consistency(format!(
                    "materialized path {:?} is not unique",
                    path.as_str()
                )));
            }
            edge_map.insert(
                *edge_id,
                Association {
                    id: *edge_id,
                    parent: def.parent,
                    child: def.child,
                    weight: def.weight,
                    depth,
                    path,
                },
            );
        }

        Ok(Self {
            nodes: node_map,
            edges: edge_map,
            alias_index,
        })
    }

    /// Resolve one edge's depth and path, memoizing into `resolved`.
    fn resolve_chain(
        edge_id: EdgeId,
        defs: &BTreeMap<EdgeId, EdgeDef>,
        placement: &BTreeMap<NodeId, EdgeId>,
        nodes: &BTreeMap<NodeId, Node>,
        resolved: &mut BTreeMap<EdgeId, (u32, MaterializedPath)>,
    ) -> Result<(u32, MaterializedPath), TrellisError> {
        // Iterative walk toward the root, collecting unresolved ancestors.
        let mut pending: Vec<EdgeId> = Vec::new();
        let mut visiting: BTreeSet<EdgeId> = BTreeSet::new();
        let mut current = edge_id;

        let (mut base_depth, mut base_path) = loop {
            if let Some(found) = resolved.get(&current) {
                break found.clone();
            }
            if !visiting.insert(current) {
                let def = defs
                    .get(&edge_id)
                    .ok_or_else(|| TrellisError::Schema(format!("edge {} unknown", edge_id.0)))?;
                return Err(TrellisError::Cycle(format!(
                    "node {} is an ancestor of itself",
                    def.child.0
                )));
            }
            pending.push(current);

            let def = defs
                .get(&current)
                .ok_or_else(|| TrellisError::Schema(format!("edge {} unknown", current.0)))?;
            match def.parent.and_then(|p| placement.get(&p)) {
                Some(&parent_edge) => current = parent_edge,
                // Parent exists but is unplaced, or no parent at all:
                // the chain roots here.
                None => break (0, MaterializedPath::empty()),
            }
        };

        // Unwind: assign depth/path root-to-leaf.
        let mut result = (base_depth, base_path.clone());
        for &pending_id in pending.iter().rev() {
            let def = defs
                .get(&pending_id)
                .ok_or_else(|| TrellisError::Schema(format!("edge {} unknown", pending_id.0)))?;
            let child = nodes
                .get(&def.child)
                .ok_or_else(|| TrellisError::Schema(format!("node {} unknown", def.child.0)))?;
            let segment = child.segment();
            if base_path.segments().any(|s| s == segment) {
                return Err(TrellisError::Cycle(format!(
                    "segment {:?} already appears in path {:?}",
                    segment,
                    base_path.as_str()
                )));
            }
            let depth = if base_path.is_empty() {
                0
            } else {
                base_depth.saturating_add(1)
            };
            if depth > MAX_DEPTH {
                return Err(TrellisError::Schema(format!(
                    "edge {} nests deeper than {}",
                    pending_id.0, MAX_DEPTH
                )));
            }
            let path = base_path.join(&segment);
            resolved.insert(pending_id, (depth, path.clone()));
            base_depth = depth;
            base_path = path.clone();
            result = (depth, path);
        }

        Ok(result)
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All associations in id (insertion) order.
    pub fn edges(&self) -> impl Iterator<Item = &Association> {
        self.edges.values()
    }

    /// Look up a node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Resolve an alias to its node id.
    #[must_use]
    pub fn node_by_alias(&self, alias: &Alias) -> Option<NodeId> {
        self.alias_index.get(alias).copied()
    }

    /// The association placing the given node, if it is placed.
    #[must_use]
    pub fn placement_of(&self, node: NodeId) -> Option<&Association> {
        self.edges.values().find(|e| e.child == node)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of associations.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// The next unused node id.
    #[must_use]
    pub fn next_node_id(&self) -> NodeId {
        NodeId(
            self.nodes
                .keys()
                .next_back()
                .map(|id| id.0.saturating_add(1))
                .unwrap_or(0),
        )
    }

    /// The next unused edge id.
    #[must_use]
    pub fn next_edge_id(&self) -> EdgeId {
        EdgeId(
            self.edges
                .keys()
                .next_back()
                .map(|id| id.0.saturating_add(1))
                .unwrap_or(0),
        )
    }

    /// Decompose into sorted node and edge-definition rows.
    ///
    /// This is the normalized form written by the source saver and the
    /// backup snapshot; `validate` on the rows reproduces the set.
    #[must_use]
    pub fn to_rows(&self) -> (Vec<Node>, Vec<EdgeDef>) {
        let nodes = self.nodes.values().cloned().collect();
        let edges = self.edges.values().map(EdgeDef::from).collect();
        (nodes, edges)
    }

    // =========================================================================
    // CHECKSUM
    // =========================================================================

    /// Deterministic digest over the canonical rows.
    ///
    /// XOR/rotate fold, integer-only. This detects drift between the
    /// structure source and the durable backup; it is **not** a
    /// cryptographic hash and makes no tamper-resistance claims.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        let mut hash: u64 = 0;

        for node in self.nodes.values() {
            hash ^= node.id.0.rotate_left(13);
            for byte in node.kind.as_str().as_bytes() {
                hash ^= (*byte as u64).rotate_left(23);
            }
            if let Some(alias) = &node.alias {
                for byte in alias.as_str().as_bytes() {
                    hash ^= (*byte as u64).rotate_left(29);
                }
            }
            hash ^= node.created_at.rotate_left(7);
            hash ^= node.modified_at.rotate_left(11);
        }

        for edge in self.edges.values() {
            hash ^= edge.id.0.rotate_left(17);
            hash ^= edge.parent.map(|p| p.0).unwrap_or(u64::MAX).rotate_left(19);
            hash ^= edge.child.0.rotate_left(5);
            hash ^= (edge.weight as u64).rotate_left(3);
            for byte in edge.path.as_str().as_bytes() {
                hash ^= (*byte as u64).rotate_left(31);
            }
        }

        hash
    }
}

// =============================================================================
// TESTS
// =============================================================================
