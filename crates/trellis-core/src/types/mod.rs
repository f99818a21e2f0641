//! # Core Type Definitions
//!
//! Identifiers, graph member types, and the error taxonomy for the
//! trellis store:
//! - Node and association identifiers (`NodeId`, `EdgeId`)
//! - Semantic tags (`NodeKind`, `Alias`, `Locale`)
//! - Graph members (`Node`, `Association`) and content (`Payload`)
//! - Error types (`TrellisError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Use integer arithmetic only (no floating-point)
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Use saturating arithmetic for counters to prevent overflow

use crate::path::MaterializedPath;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Globally unique identifier for a graph node.
///
/// Stable for the lifetime of the store and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Render the id as a path segment.
    #[must_use]
    pub fn segment(self) -> String {
        self.0.to_string()
    }
}

/// Unique identifier for an association (edge).
///
/// Assigned monotonically; the numeric order of edge ids is the
/// insertion order used to break sibling-weight ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub u64);

// =============================================================================
// SEMANTIC TAGS
// =============================================================================

/// The semantic type tag of a node.
///
/// Opaque to the core: it is stored, indexed and routed on, but
/// interpretation (validation rules, indexable fields) belongs to the
/// external schema registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeKind(pub String);

impl NodeKind {
    /// Create a new kind tag.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the kind as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Optional human-assigned semantic alias for a node.
///
/// Unique across the structure set; doubles as the node's path segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Alias(pub String);

impl Alias {
    /// Create a new alias.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the alias as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Content locale tag, e.g. `"en"` or `"de-AT"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Locale(pub String);

impl Locale {
    /// Create a new locale tag.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the locale as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// NODE
// =============================================================================

/// A member of the content graph: a page, a navigation item, a schema
/// definition — anything addressable.
///
/// The node carries identity and tags only; its content payload lives in
/// the Durable Store and its placement lives in an [`Association`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Globally unique id.
    pub id: NodeId,
    /// Semantic type tag.
    pub kind: NodeKind,
    /// Optional unique alias; also the node's path segment when present.
    pub alias: Option<Alias>,
    /// Creation instant (unix seconds).
    pub created_at: u64,
    /// Last-modified instant (unix seconds).
    pub modified_at: u64,
}

impl Node {
    /// Create a new node with both timestamps set to `now`.
    #[must_use]
    pub fn new(id: NodeId, kind: NodeKind, alias: Option<Alias>, now: u64) -> Self {
        Self {
            id,
            kind,
            alias,
            created_at: now,
            modified_at: now,
        }
    }

    /// The node's path segment: its alias if set, else its decimal id.
    #[must_use]
    pub fn segment(&self) -> String {
        self.alias
            .as_ref()
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| self.id.segment())
    }
}

// =============================================================================
// ASSOCIATION
// =============================================================================

/// A single parent→child structural relationship.
///
/// The only relationship primitive in the system: menu placement, page
/// nesting and schema membership are all associations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    /// Unique edge id; numeric order encodes insertion order.
    pub id: EdgeId,
    /// Parent node, absent for root-level edges.
    pub parent: Option<NodeId>,
    /// The associated (child) node.
    pub child: NodeId,
    /// Ordering weight: lower sorts first among siblings.
    pub weight: i64,
    /// Cached distance from root; recomputed on structural change.
    pub depth: u32,
    /// Full ancestor chain, enabling prefix subtree queries.
    pub path: MaterializedPath,
}

impl Association {
    /// Sibling sort key: weight first, then insertion order.
    #[must_use]
    pub fn order_key(&self) -> (i64, EdgeId) {
        (self.weight, self.id)
    }
}

/// A reference to a node as seen from a structural query: which edge
/// placed it, where, and what it is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRef {
    /// The association that placed the node.
    pub edge: EdgeId,
    /// The placed node.
    pub node: NodeId,
    /// The node's kind tag.
    pub kind: NodeKind,
    /// The edge's materialized path.
    pub path: MaterializedPath,
    /// The edge's ordering weight.
    pub weight: i64,
}

// =============================================================================
// PAYLOAD
// =============================================================================

/// An opaque, type-tagged content blob.
///
/// The core stores and transports payloads without interpreting them;
/// the tag tells external consumers how to decode the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Consumer-facing type tag (e.g. `"markdown"`, `"json"`).
    pub tag: String,
    /// The content body.
    pub body: String,
}

impl Payload {
    /// Create a new payload.
    #[must_use]
    pub fn new(tag: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            body: body.into(),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors surfaced by the trellis store.
///
/// - No silent failures: Durable Store write errors always propagate
/// - `NotFound` is distinct from `StructureUnavailable` — callers treat
///   the latter as "trigger recovery", not as a missing entity
#[derive(Debug, Error)]
pub enum TrellisError {
    /// A structure source row failed to parse or violates a field
    /// constraint. Fatal to structural sync; nothing is partially applied.
    #[error("schema error: {0}")]
    Schema(String),

    /// A proposed association would make a node its own ancestor.
    /// Rejected at write time; the original graph is unchanged.
    #[error("cycle: {0}")]
    Cycle(String),

    /// Duplicate id/alias, conflicting placement, or checksum mismatch
    /// beyond tolerance.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// The requested node, edge or path is absent from a loaded snapshot.
    #[error("not found: {0}")]
    NotFound(String),

    /// The cache layer holds no structural data (cold start or loss).
    /// Retrying after a successful recovery clears this.
    #[error("structure unavailable: cache has no structural snapshot")]
    StructureUnavailable,

    /// A structural sync is already in flight; retry with backoff.
    #[error("write conflict: structural sync in progress")]
    WriteConflict,

    /// A serialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A deserialization error occurred.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// An I/O error occurred (redb or filesystem).
    #[error("I/O error: {0}")]
    Io(String),
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_segment_prefers_alias() {
        let aliased = Node::new(NodeId(7), NodeKind::new("page"), Some(Alias::new("home")), 0);
        assert_eq!(aliased.segment(), "home");

        let bare = Node::new(NodeId(7), NodeKind::new("page"), None, 0);
        assert_eq!(bare.segment(), "7");
    }

    #[test]
    fn association_order_key_weight_then_insertion() {
        let early = Association {
            id: EdgeId(1),
            parent: None,
            child: NodeId(1),
            weight: 10,
            depth: 0,
            path: MaterializedPath::root("a"),
        };
        let late = Association {
            id: EdgeId(2),
            parent: None,
            child: NodeId(2),
            weight: 10,
            depth: 0,
            path: MaterializedPath::root("b"),
        };
        assert!(early.order_key() < late.order_key());

        let light = Association {
            weight: 5,
            ..late.clone()
        };
        assert!(light.order_key() < early.order_key());
    }

    #[test]
    fn error_messages_render() {
        let err = TrellisError::NotFound("node 42".to_string());
        assert!(err.to_string().contains("42"));

        let conflict = TrellisError::WriteConflict;
        assert!(conflict.to_string().contains("sync in progress"));
    }
}
