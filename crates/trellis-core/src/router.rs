//! # Query Router
//!
//! Classifies incoming queries and dispatches each class to the tier
//! that owns it:
//!
//! - **Structure** (node lookup, children listing) -> cache only
//! - **Content** (payload for one node) -> Durable Store
//! - **Search** (word lookup) -> cache index only
//! - **Combined** (subtree with content) -> cache subtree, then one
//!   batched store read
//!
//! Structure and search queries never fall through to the Durable
//! Store: on a cold cache they answer `StructureUnavailable`, which is
//! the caller's cue to trigger recovery, not a data error.

use crate::cache::StructureCache;
use crate::path::MaterializedPath;
use crate::storage::DurableStore;
use crate::{Alias, ChildRef, Locale, Node, NodeId, Payload, TrellisError};

// =============================================================================
// QUERY MODEL
// =============================================================================

/// A node addressed by id or by alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    /// By stable numeric id.
    Id(NodeId),
    /// By semantic alias.
    Alias(Alias),
}

impl From<NodeId> for NodeRef {
    fn from(id: NodeId) -> Self {
        Self::Id(id)
    }
}

impl From<Alias> for NodeRef {
    fn from(alias: Alias) -> Self {
        Self::Alias(alias)
    }
}

/// One incoming query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Look up a single node.
    Node { target: NodeRef },
    /// List a parent path's children in sibling order.
    Children { path: MaterializedPath },
    /// Read one node's payload for a locale.
    Content { target: NodeRef, locale: Locale },
    /// Find nodes whose content contains a word.
    Search { word: String },
    /// A subtree together with its payloads for a locale.
    Subtree {
        path: MaterializedPath,
        locale: Locale,
    },
}

/// The routing class of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Cache snapshot only.
    Structure,
    /// Durable Store only.
    Content,
    /// Cache index only.
    Search,
    /// Cache snapshot plus one batched store read.
    Combined,
}

impl Query {
    /// Which tier(s) this query routes to.
    #[must_use]
    pub fn kind(&self) -> QueryKind {
        match self {
            Self::Node { .. } | Self::Children { .. } => QueryKind::Structure,
            Self::Content { .. } => QueryKind::Content,
            Self::Search { .. } => QueryKind::Search,
            Self::Subtree { .. } => QueryKind::Combined,
        }
    }
}

/// One subtree entry with its (possibly absent) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtreeEntry {
    /// The structural entry.
    pub entry: ChildRef,
    /// The node's payload for the requested locale, if stored.
    pub payload: Option<Payload>,
}

/// A resolved query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    /// A single node.
    Node(Node),
    /// Ordered children of a path.
    Children(Vec<ChildRef>),
    /// One payload.
    Content(Payload),
    /// Matching nodes, in id order.
    Search(Vec<Node>),
    /// Subtree entries in depth-first sibling order, root first.
    Subtree(Vec<SubtreeEntry>),
}

// =============================================================================
// ROUTER
// =============================================================================

/// Stateless dispatcher over the cache and the store.
#[derive(Debug)]
pub struct QueryRouter<'a> {
    cache: &'a StructureCache,
    store: &'a DurableStore,
}

impl<'a> QueryRouter<'a> {
    /// Bind a router to its tiers.
    #[must_use]
    pub fn new(cache: &'a StructureCache, store: &'a DurableStore) -> Self {
        Self { cache, store }
    }

    /// Resolve one query against the tier(s) its class names.
    pub fn resolve(&self, query: &Query) -> Result<QueryResult, TrellisError> {
        match query {
            Query::Node { target } => {
                let node = self.resolve_node(target)?;
                Ok(QueryResult::Node(node))
            }
            Query::Children { path } => {
                Ok(QueryResult::Children(self.cache.get_children(path)?))
            }
            Query::Content { target, locale } => {
                let id = self.resolve_id(target)?;
                Ok(QueryResult::Content(self.store.read_content(id, locale)?))
            }
            Query::Search { word } => {
                let mut hits = Vec::new();
                for id in self.cache.search_word(word)? {
                    // Stale postings for nodes no longer in the
                    // snapshot are silently dropped from results.
                    if let Ok(node) = self.cache.get_node(id) {
                        hits.push(node);
                    }
                }
                Ok(QueryResult::Search(hits))
            }
            Query::Subtree { path, locale } => {
                let entries = self.cache.subtree(path)?;
                let ids: Vec<NodeId> = entries.iter().map(|e| e.node).collect();
                // One transaction for the whole subtree's content.
                let mut payloads = self.store.read_content_batch(&ids, locale)?;
                let merged = entries
                    .into_iter()
                    .map(|entry| {
                        let payload = payloads.remove(&entry.node);
                        SubtreeEntry { entry, payload }
                    })
                    .collect();
                Ok(QueryResult::Subtree(merged))
            }
        }
    }

    /// Content reads by id stay available on a cold cache; alias
    /// resolution needs the snapshot.
    fn resolve_id(&self, target: &NodeRef) -> Result<NodeId, TrellisError> {
        match target {
            NodeRef::Id(id) => Ok(*id),
            NodeRef::Alias(alias) => Ok(self.cache.get_node_by_alias(alias)?.id),
        }
    }

    fn resolve_node(&self, target: &NodeRef) -> Result<Node, TrellisError> {
        match target {
            NodeRef::Id(id) => self.cache.get_node(*id),
            NodeRef::Alias(alias) => self.cache.get_node_by_alias(alias),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{EdgeDef, StructureSet};
    use crate::{EdgeId, NodeKind};
    use tempfile::tempdir;

    fn sample_set() -> StructureSet {
        let nodes = vec![
            Node::new(NodeId(1), NodeKind::new("page"), Some(Alias::new("home")), 0),
            Node::new(NodeId(2), NodeKind::new("block"), Some(Alias::new("hero")), 0),
            Node::new(NodeId(3), NodeKind::new("block"), Some(Alias::new("body")), 0),
        ];
        let edges = vec![
            EdgeDef { id: EdgeId(1), parent: None, child: NodeId(1), weight: 0 },
            EdgeDef { id: EdgeId(2), parent: Some(NodeId(1)), child: NodeId(2), weight: 0 },
            EdgeDef { id: EdgeId(3), parent: Some(NodeId(1)), child: NodeId(3), weight: 10 },
        ];
        StructureSet::validate(nodes, edges).expect("valid set")
    }

    fn warm_fixture(dir: &tempfile::TempDir) -> (StructureCache, DurableStore) {
        let cache = StructureCache::new();
        cache.put_structure(sample_set()).expect("load");
        let store = DurableStore::open(dir.path().join("store.redb")).expect("store");
        (cache, store)
    }

    #[test]
    fn kind_classification() {
        let by_id = Query::Node {
            target: NodeRef::Id(NodeId(1)),
        };
        assert_eq!(by_id.kind(), QueryKind::Structure);
        assert_eq!(
            Query::Search {
                word: "x".to_string()
            }
            .kind(),
            QueryKind::Search
        );
        assert_eq!(
            Query::Subtree {
                path: MaterializedPath::root("home"),
                locale: Locale::new("en"),
            }
            .kind(),
            QueryKind::Combined
        );
    }

    #[test]
    fn structure_query_resolves_by_alias() {
        let dir = tempdir().expect("tempdir");
        let (cache, store) = warm_fixture(&dir);
        let router = QueryRouter::new(&cache, &store);

        let result = router
            .resolve(&Query::Node {
                target: NodeRef::Alias(Alias::new("hero")),
            })
            .expect("resolve");
        assert!(matches!(result, QueryResult::Node(n) if n.id == NodeId(2)));
    }

    #[test]
    fn structure_query_never_falls_back_to_store() {
        let dir = tempdir().expect("tempdir");
        let (cache, store) = warm_fixture(&dir);
        cache.clear();
        let router = QueryRouter::new(&cache, &store);

        let result = router.resolve(&Query::Children {
            path: MaterializedPath::empty(),
        });
        assert!(matches!(result, Err(TrellisError::StructureUnavailable)));
        // The store was never consulted.
        assert_eq!(store.metrics().content_reads(), 0);
        assert_eq!(store.metrics().content_batch_reads(), 0);
    }

    #[test]
    fn content_by_id_serves_on_cold_cache() {
        let dir = tempdir().expect("tempdir");
        let (cache, store) = warm_fixture(&dir);
        store
            .write_content(NodeId(2), &Locale::new("en"), &Payload::new("text", "hi"))
            .expect("write");
        cache.clear();
        let router = QueryRouter::new(&cache, &store);

        let result = router
            .resolve(&Query::Content {
                target: NodeRef::Id(NodeId(2)),
                locale: Locale::new("en"),
            })
            .expect("content read");
        assert!(matches!(result, QueryResult::Content(p) if p.body == "hi"));
    }

    #[test]
    fn search_resolves_hits_to_nodes() {
        let dir = tempdir().expect("tempdir");
        let (cache, store) = warm_fixture(&dir);
        cache.index_words(NodeId(3), ["welcome"]).expect("index");
        let router = QueryRouter::new(&cache, &store);

        let result = router
            .resolve(&Query::Search {
                word: "welcome".to_string(),
            })
            .expect("search");
        let hits = match result {
            QueryResult::Search(hits) => hits,
            other => unreachable!("unexpected result {other:?}"),
        };
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, NodeId(3));
    }

    #[test]
    fn combined_query_uses_one_batched_read() {
        let dir = tempdir().expect("tempdir");
        let (cache, store) = warm_fixture(&dir);
        let locale = Locale::new("en");
        store
            .write_content(NodeId(1), &locale, &Payload::new("text", "home page"))
            .expect("write");
        store
            .write_content(NodeId(3), &locale, &Payload::new("text", "body copy"))
            .expect("write");
        let router = QueryRouter::new(&cache, &store);

        let result = router
            .resolve(&Query::Subtree {
                path: MaterializedPath::root("home"),
                locale,
            })
            .expect("subtree");
        let entries = match result {
            QueryResult::Subtree(entries) => entries,
            other => unreachable!("unexpected result {other:?}"),
        };

        // Root first, then children in weight order; hero has no
        // payload and still appears.
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry.node, NodeId(1));
        assert!(entries[0].payload.is_some());
        assert_eq!(entries[1].entry.node, NodeId(2));
        assert!(entries[1].payload.is_none());
        assert_eq!(entries[2].entry.node, NodeId(3));

        assert_eq!(store.metrics().content_batch_reads(), 1);
        assert_eq!(store.metrics().content_reads(), 0);
    }

    #[test]
    fn missing_content_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let (cache, store) = warm_fixture(&dir);
        let router = QueryRouter::new(&cache, &store);

        let result = router.resolve(&Query::Content {
            target: NodeRef::Alias(Alias::new("hero")),
            locale: Locale::new("en"),
        });
        assert!(matches!(result, Err(TrellisError::NotFound(_))));
    }
}
