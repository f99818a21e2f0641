//! # Materialized Paths
//!
//! A materialized path encodes an edge's full ancestor chain as a
//! dot-separated string. Prefix comparison on paths replaces pointer
//! chasing: subtree collection is a range scan, and cycle detection is
//! a segment-containment check instead of a graph walk.

use crate::primitives::PATH_SEPARATOR;
use serde::{Deserialize, Serialize};

/// Precomputed ancestor-chain string for one association.
///
/// Segments are node aliases (or decimal ids for alias-less nodes),
/// joined by [`PATH_SEPARATOR`]. Paths are unique per edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MaterializedPath(String);

impl MaterializedPath {
    /// The empty path, denoting the root level itself.
    ///
    /// No edge carries the empty path; it is only valid as a
    /// `get_children` target listing root edges.
    #[must_use]
    pub fn empty() -> Self {
        Self(String::new())
    }

    /// Path of a root-level edge: the bare segment.
    #[must_use]
    pub fn root(segment: impl Into<String>) -> Self {
        Self(segment.into())
    }

    /// Parse a path from its string form.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Extend this path with a child segment.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        if self.0.is_empty() {
            Self(segment.to_string())
        } else {
            let mut s = String::with_capacity(self.0.len() + 1 + segment.len());
            s.push_str(&self.0);
            s.push(PATH_SEPARATOR);
            s.push_str(segment);
            Self(s)
        }
    }

    /// The raw string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty (root-level) path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the path's segments in root-to-leaf order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(PATH_SEPARATOR).filter(|s| !s.is_empty())
    }

    /// Number of segments; equals `depth + 1` for a well-formed edge path.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.segments().count()
    }

    /// The final segment, if any.
    #[must_use]
    pub fn last_segment(&self) -> Option<&str> {
        self.segments().last()
    }

    /// The parent path: everything before the final segment.
    ///
    /// Returns the empty path for root-level edges and `None` for the
    /// empty path itself.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        match self.0.rfind(PATH_SEPARATOR) {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::empty()),
        }
    }

    /// True if `self` is a strict ancestor prefix of `other`.
    ///
    /// Segment-aware: `"ho"` is not a prefix of `"home"`.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        if self.0.is_empty() {
            return !other.0.is_empty();
        }
        other.0.len() > self.0.len()
            && other.0.starts_with(&self.0)
            && other.0.as_bytes()[self.0.len()] == PATH_SEPARATOR as u8
    }

    /// True if any ancestor segment (everything but the last) equals
    /// `segment`.
    ///
    /// This is the write-time cycle check: an edge whose child segment
    /// already appears among its ancestors closes a loop.
    #[must_use]
    pub fn ancestors_contain(&self, segment: &str) -> bool {
        let count = self.segment_count();
        self.segments().take(count.saturating_sub(1)).any(|s| s == segment)
    }
}

impl std::fmt::Display for MaterializedPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// TESTS
// =============================================================================
