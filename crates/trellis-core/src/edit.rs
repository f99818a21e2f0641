//! # Structural Edits
//!
//! Declarative edit operations over the graph's shape. An [`EditSet`]
//! is applied to a validated [`StructureSet`] all-or-nothing: the ops
//! rewrite the canonical rows, the rows are re-validated, and only a
//! fully valid result replaces the input. A failing op leaves the
//! original set untouched.

use crate::structure::{EdgeDef, StructureSet};
use crate::{Alias, EdgeId, Node, NodeId, NodeKind, TrellisError};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// OPERATIONS
// =============================================================================

/// What happens to the nodes of a removed subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    /// Remove the edges only; subtree nodes stay, unplaced. The default
    /// for association removal, since nodes may be re-placed later.
    OrphanNodes,
    /// Remove the edges and delete the subtree's nodes. The caller is
    /// expected to drop their stored content afterwards.
    DeleteNodes,
}

/// One structural operation.
#[derive(Debug, Clone)]
pub enum StructuralOp {
    /// Create a node. With `id: None` the next free id is allocated.
    AddNode {
        id: Option<NodeId>,
        kind: NodeKind,
        alias: Option<Alias>,
    },
    /// Associate `child` under `parent` (`None` for root level).
    AddAssociation {
        parent: Option<NodeId>,
        child: NodeId,
        weight: i64,
    },
    /// Change an edge's ordering weight.
    Reweight { edge: EdgeId, weight: i64 },
    /// Set or clear a node's alias.
    SetAlias {
        node: NodeId,
        alias: Option<Alias>,
    },
    /// Remove an association and every association beneath it.
    RemoveAssociation {
        edge: EdgeId,
        policy: DeletePolicy,
    },
}

/// A batch of structural operations applied atomically.
#[derive(Debug, Clone, Default)]
pub struct EditSet {
    /// Operations in application order.
    pub ops: Vec<StructuralOp>,
}

impl EditSet {
    /// A single-op edit set.
    #[must_use]
    pub fn single(op: StructuralOp) -> Self {
        Self { ops: vec![op] }
    }
}

/// The result of a successful edit application.
#[derive(Debug)]
pub struct EditOutcome {
    /// The re-validated set with the edits applied.
    pub set: StructureSet,
    /// Nodes created, in op order.
    pub created_nodes: Vec<NodeId>,
    /// Nodes deleted under [`DeletePolicy::DeleteNodes`]; their stored
    /// content should be dropped by the caller.
    pub removed_nodes: Vec<NodeId>,
}

// =============================================================================
// APPLICATION
// =============================================================================

/// Apply an edit set to a structure set, all-or-nothing.
///
/// `now` stamps created and modified nodes.
///
/// # Errors
///
/// [`TrellisError::NotFound`] if an op targets a missing node or edge;
/// [`TrellisError::Consistency`] if an explicit id collides; plus
/// anything [`StructureSet::validate`] rejects on the final rows
/// (cycles, duplicate aliases, double placements).
pub fn apply_edits(
    set: &StructureSet,
    edits: &EditSet,
    now: u64,
) -> Result<EditOutcome, TrellisError> {
    let (nodes, edges) = set.to_rows();
    let mut nodes: BTreeMap<NodeId, Node> = nodes.into_iter().map(|n| (n.id, n)).collect();
    let mut edges: BTreeMap<EdgeId, EdgeDef> = edges.into_iter().map(|e| (e.id, e)).collect();

    let mut next_node = set.next_node_id();
    let mut next_edge = set.next_edge_id();
    let mut created_nodes = Vec::new();
    let mut removed_nodes = Vec::new();

    for op in &edits.ops {
        match op {
            StructuralOp::AddNode { id, kind, alias } => {
                let id = match id {
                    Some(explicit) => {
                        if nodes.contains_key(explicit) {
                            return Err(TrellisError::Consistency(format!(
                                "node id {} already in use",
                                explicit.0
                            )));
                        }
                        *explicit
                    }
                    None => next_node,
                };
                next_node = NodeId(next_node.0.max(id.0).saturating_add(1));
                nodes.insert(id, Node::new(id, kind.clone(), alias.clone(), now));
                created_nodes.push(id);
            }
            StructuralOp::AddAssociation {
                parent,
                child,
                weight,
            } => {
                let id = next_edge;
                next_edge = EdgeId(next_edge.0.saturating_add(1));
                edges.insert(
                    id,
                    EdgeDef {
                        id,
                        parent: *parent,
                        child: *child,
                        weight: *weight,
                    },
                );
            }
            StructuralOp::Reweight { edge, weight } => {
                let def = edges
                    .get_mut(edge)
                    .ok_or_else(|| TrellisError::NotFound(format!("edge {}", edge.0)))?;
                def.weight = *weight;
            }
            StructuralOp::SetAlias { node, alias } => {
                let entry = nodes
                    .get_mut(node)
                    .ok_or_else(|| TrellisError::NotFound(format!("node {}", node.0)))?;
                entry.alias = alias.clone();
                entry.modified_at = now;
            }
            StructuralOp::RemoveAssociation { edge, policy } => {
                let root = edges
                    .remove(edge)
                    .ok_or_else(|| TrellisError::NotFound(format!("edge {}", edge.0)))?;

                // Single placement makes subtree membership a chain of
                // removed parents; peel edges until nothing changes.
                let mut detached: BTreeSet<NodeId> = BTreeSet::new();
                detached.insert(root.child);
                loop {
                    let doomed: Vec<EdgeId> = edges
                        .values()
                        .filter(|e| e.parent.is_some_and(|p| detached.contains(&p)))
                        .map(|e| e.id)
                        .collect();
                    if doomed.is_empty() {
                        break;
                    }
                    for id in doomed {
                        if let Some(removed) = edges.remove(&id) {
                            detached.insert(removed.child);
                        }
                    }
                }

                if *policy == DeletePolicy::DeleteNodes {
                    for node in detached {
                        if nodes.remove(&node).is_some() {
                            removed_nodes.push(node);
                        }
                    }
                }
            }
        }
    }

    let set = StructureSet::validate(
        nodes.into_values().collect(),
        edges.into_values().collect(),
    )?;
    Ok(EditOutcome {
        set,
        created_nodes,
        removed_nodes,
    })
}

// =============================================================================
// TESTS
// =============================================================================
