//! # Content Graph Engine
//!
//! The facade that wires the tiers together: Structure Source, Durable
//! Store, cache layer, propagation queue, recovery and the query
//! router. Everything external callers do goes through [`ContentGraph`].
//!
//! ## Write paths
//!
//! Content writes commit to the Durable Store and enqueue index work;
//! the snapshot is untouched. Structural edits are the slow path: load
//! the source, apply the edit set, rewrite source and backup, swap the
//! cache snapshot. Structural syncs are serialized; a second sync while
//! one runs answers [`TrellisError::WriteConflict`] immediately.

use crate::cache::StructureCache;
use crate::edit::{apply_edits, DeletePolicy, EditSet, StructuralOp};
use crate::formats::encode_backup;
use crate::index::tokenize;
use crate::queue::{IndexQueue, IndexTask};
use crate::recovery::{RecoveryManager, RecoveryOutcome};
use crate::router::{Query, QueryResult, QueryRouter};
use crate::source::SourceDir;
use crate::storage::{DurableStore, StoreMetrics};
use crate::{Alias, EdgeId, Locale, NodeId, NodeKind, Payload, TrellisError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Where the engine keeps its tiers on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Directory holding `nodes.toml` and `associations.toml`.
    pub source_dir: PathBuf,
    /// Path of the redb database file.
    pub store_path: PathBuf,
}

impl EngineConfig {
    /// Both tiers under one data directory, the conventional layout.
    #[must_use]
    pub fn under(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            source_dir: data_dir.join("structure"),
            store_path: data_dir.join("content.redb"),
        }
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrellisError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| TrellisError::Io(format!("read config: {e}")))?;
        toml::from_str(&text).map_err(|e| TrellisError::Schema(format!("parse config: {e}")))
    }
}

// =============================================================================
// RECEIPTS
// =============================================================================

/// What a structural sync hands back.
#[derive(Debug, Clone)]
pub struct SyncReceipt {
    /// Nodes created by the edit set, in op order.
    pub created_nodes: Vec<NodeId>,
    /// Nodes deleted by the edit set; their content has been dropped.
    pub removed_nodes: Vec<NodeId>,
    /// Checksum of the structure after the sync.
    pub checksum: u64,
}

// =============================================================================
// ENGINE
// =============================================================================

/// The layered content-graph store.
#[derive(Debug)]
pub struct ContentGraph {
    source: SourceDir,
    store: DurableStore,
    cache: StructureCache,
    queue: IndexQueue,
    /// Serializes structural syncs; held for the whole sync.
    sync_lock: Mutex<()>,
    /// Last completed recovery, for operators.
    last_recovery: Mutex<Option<RecoveryOutcome>>,
}

impl ContentGraph {
    /// Open the tiers without warming the cache.
    ///
    /// Structural and search queries answer `StructureUnavailable`
    /// until [`ContentGraph::run_recovery`] completes.
    pub fn open(config: &EngineConfig) -> Result<Self, TrellisError> {
        let store = DurableStore::open(&config.store_path)?;
        Ok(Self {
            source: SourceDir::new(&config.source_dir),
            store,
            cache: StructureCache::new(),
            queue: IndexQueue::new(),
            sync_lock: Mutex::new(()),
            last_recovery: Mutex::new(None),
        })
    }

    /// Open and immediately recover: the normal cold-start sequence.
    pub fn bootstrap(config: &EngineConfig) -> Result<Self, TrellisError> {
        let engine = Self::open(config)?;
        engine.run_recovery()?;
        Ok(engine)
    }

    // =========================================================================
    // RECOVERY
    // =========================================================================

    /// Run the recovery state machine to completion.
    pub fn run_recovery(&self) -> Result<RecoveryOutcome, TrellisError> {
        let cancel = AtomicBool::new(false);
        self.run_recovery_with_cancel(&cancel)
    }

    /// Run recovery with a cancellation flag checked between steps.
    ///
    /// A failed or cancelled run records a `Failed` outcome and leaves
    /// the cache cold, so structural and search queries answer
    /// [`TrellisError::StructureUnavailable`] until a retry succeeds.
    /// Content reads by id keep serving from the Durable Store.
    pub fn run_recovery_with_cancel(
        &self,
        cancel: &AtomicBool,
    ) -> Result<RecoveryOutcome, TrellisError> {
        let result =
            RecoveryManager::new(&self.source, &self.store, &self.cache).run_with_cancel(cancel);
        let outcome = match &result {
            Ok(outcome) => *outcome,
            Err(_) => RecoveryOutcome::failed(),
        };
        if let Ok(mut last) = self.last_recovery.lock() {
            *last = Some(outcome);
        }
        result
    }

    /// The outcome of the most recent recovery run, if any.
    ///
    /// A failed or cancelled run reports the `Failed` state; it does
    /// not silently retain the previous outcome.
    #[must_use]
    pub fn last_recovery(&self) -> Option<RecoveryOutcome> {
        self.last_recovery.lock().ok().and_then(|last| *last)
    }

    /// Drop the cache snapshot and index (testing and cache-loss drills).
    pub fn drop_cache(&self) {
        self.cache.clear();
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Route and resolve one query.
    pub fn resolve(&self, query: &Query) -> Result<QueryResult, TrellisError> {
        QueryRouter::new(&self.cache, &self.store).resolve(query)
    }

    /// Direct access to the cache layer for structural reads.
    #[must_use]
    pub fn cache(&self) -> &StructureCache {
        &self.cache
    }

    /// Store operation counters.
    #[must_use]
    pub fn metrics(&self) -> &StoreMetrics {
        self.store.metrics()
    }

    // =========================================================================
    // CONTENT WRITES
    // =========================================================================

    /// Write a payload and enqueue its re-index.
    ///
    /// The write is durable once this returns; the search index catches
    /// up on the next [`ContentGraph::drain_index_queue`]. With a warm
    /// cache the node must exist; on a cold cache the store takes the
    /// write unchecked so repairs can proceed during an outage.
    pub fn apply_content_edit(
        &self,
        node: NodeId,
        locale: &Locale,
        payload: &Payload,
    ) -> Result<(), TrellisError> {
        if self.cache.is_warm() {
            let _ = self.cache.get_node(node)?;
        }
        self.store.write_content(node, locale, payload)?;
        self.queue.enqueue(IndexTask::Reindex { node });
        Ok(())
    }

    /// Drop a node's payloads (all locales) and its index postings.
    pub fn delete_content(&self, node: NodeId) -> Result<(), TrellisError> {
        self.store.delete_content(node)?;
        self.queue.enqueue(IndexTask::Remove { node });
        Ok(())
    }

    /// Pending index tasks.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Apply queued index work until the queue is empty.
    ///
    /// Returns the number of tasks applied. A task that fails on a
    /// store error goes back to the front of the queue and the error
    /// propagates; draining again retries it (at-least-once delivery).
    pub fn drain_index_queue(&self) -> Result<usize, TrellisError> {
        let mut applied = 0;
        while let Some(task) = self.queue.pop() {
            if let Err(e) = self.apply_index_task(&task) {
                self.queue.requeue_front(task);
                return Err(e);
            }
            applied += 1;
        }
        Ok(applied)
    }

    fn apply_index_task(&self, task: &IndexTask) -> Result<(), TrellisError> {
        match task {
            IndexTask::Reindex { node } => {
                // Replace the node's postings from everything currently
                // stored for it, across locales. Re-running the same
                // task converges to the same postings.
                let all = self.store.iter_content()?;
                self.cache.deindex(*node)?;
                for (owner, _locale, payload) in all {
                    if owner == *node {
                        self.cache.index_words(*node, tokenize(&payload.body))?;
                    }
                }
                Ok(())
            }
            IndexTask::Remove { node } => self.cache.deindex(*node),
        }
    }

    // =========================================================================
    // STRUCTURAL SYNC
    // =========================================================================

    /// Apply a structural edit set end to end.
    ///
    /// Sequence: load the source, apply the ops, rewrite the source in
    /// normalized form, rewrite the backup snapshot, swap the cache
    /// snapshot, then drop content for any deleted nodes. Only one sync
    /// runs at a time; a concurrent attempt gets
    /// [`TrellisError::WriteConflict`] without blocking.
    pub fn apply_structural_edit(&self, edits: &EditSet) -> Result<SyncReceipt, TrellisError> {
        let _guard = self
            .sync_lock
            .try_lock()
            .map_err(|_| TrellisError::WriteConflict)?;

        let current = self.source.load()?;
        let outcome = apply_edits(&current, edits, unix_now())?;

        self.source.save(&outcome.set)?;
        self.store
            .write_structure_backup(&encode_backup(&outcome.set)?)?;
        self.cache.put_structure(outcome.set.clone())?;

        for &node in &outcome.removed_nodes {
            self.store.delete_content(node)?;
            self.queue.enqueue(IndexTask::Remove { node });
        }

        let checksum = outcome.set.checksum();
        info!(
            ops = edits.ops.len(),
            created = outcome.created_nodes.len(),
            removed = outcome.removed_nodes.len(),
            "structural sync applied"
        );
        Ok(SyncReceipt {
            created_nodes: outcome.created_nodes,
            removed_nodes: outcome.removed_nodes,
            checksum,
        })
    }

    /// Create a node; returns its allocated id.
    pub fn create_node(
        &self,
        kind: NodeKind,
        alias: Option<Alias>,
    ) -> Result<NodeId, TrellisError> {
        let receipt = self.apply_structural_edit(&EditSet::single(StructuralOp::AddNode {
            id: None,
            kind,
            alias,
        }))?;
        receipt
            .created_nodes
            .first()
            .copied()
            .ok_or_else(|| TrellisError::Consistency("node creation yielded no id".to_string()))
    }

    /// Place a node under a parent (`None` for root level).
    pub fn place_node(
        &self,
        parent: Option<NodeId>,
        child: NodeId,
        weight: i64,
    ) -> Result<(), TrellisError> {
        self.apply_structural_edit(&EditSet::single(StructuralOp::AddAssociation {
            parent,
            child,
            weight,
        }))
        .map(|_| ())
    }

    /// Change an association's ordering weight.
    pub fn reweight(&self, edge: EdgeId, weight: i64) -> Result<(), TrellisError> {
        self.apply_structural_edit(&EditSet::single(StructuralOp::Reweight { edge, weight }))
            .map(|_| ())
    }

    /// Set or clear a node's alias.
    pub fn set_alias(&self, node: NodeId, alias: Option<Alias>) -> Result<(), TrellisError> {
        self.apply_structural_edit(&EditSet::single(StructuralOp::SetAlias { node, alias }))
            .map(|_| ())
    }

    /// Remove an association and the associations beneath it.
    pub fn remove_association(
        &self,
        edge: EdgeId,
        policy: DeletePolicy,
    ) -> Result<SyncReceipt, TrellisError> {
        self.apply_structural_edit(&EditSet::single(StructuralOp::RemoveAssociation {
            edge,
            policy,
        }))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fresh_engine(dir: &tempfile::TempDir) -> ContentGraph {
        ContentGraph::bootstrap(&EngineConfig::under(dir.path())).expect("bootstrap")
    }

    #[test]
    fn bootstrap_on_empty_directory() {
        let dir = tempdir().expect("tempdir");
        let engine = fresh_engine(&dir);

        assert!(engine.cache().is_warm());
        let outcome = engine.last_recovery().expect("recovery outcome");
        assert_eq!(outcome.nodes_loaded, 0);
    }

    #[test]
    fn create_and_place_then_query() {
        let dir = tempdir().expect("tempdir");
        let engine = fresh_engine(&dir);

        let home = engine
            .create_node(NodeKind::new("page"), Some(Alias::new("home")))
            .expect("create home");
        engine.place_node(None, home, 0).expect("place home");

        let node = engine.cache().get_node(home).expect("node");
        assert_eq!(node.alias, Some(Alias::new("home")));

        let roots = engine
            .cache()
            .get_children(&crate::MaterializedPath::empty())
            .expect("roots");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].node, home);
    }

    #[test]
    fn content_write_defers_indexing_until_drain() {
        let dir = tempdir().expect("tempdir");
        let engine = fresh_engine(&dir);
        let node = engine
            .create_node(NodeKind::new("page"), Some(Alias::new("home")))
            .expect("create");
        engine.place_node(None, node, 0).expect("place");

        engine
            .apply_content_edit(node, &Locale::new("en"), &Payload::new("text", "searchable words"))
            .expect("write");

        assert!(engine.cache().search_word("searchable").expect("search").is_empty());
        assert_eq!(engine.queue_len(), 1);

        let applied = engine.drain_index_queue().expect("drain");
        assert_eq!(applied, 1);
        assert!(engine
            .cache()
            .search_word("searchable")
            .expect("search")
            .contains(&node));
    }

    #[test]
    fn reindex_converges_across_rewrites() {
        let dir = tempdir().expect("tempdir");
        let engine = fresh_engine(&dir);
        let node = engine
            .create_node(NodeKind::new("page"), Some(Alias::new("home")))
            .expect("create");
        engine.place_node(None, node, 0).expect("place");
        let locale = Locale::new("en");

        engine
            .apply_content_edit(node, &locale, &Payload::new("text", "first version"))
            .expect("write");
        engine
            .apply_content_edit(node, &locale, &Payload::new("text", "second version"))
            .expect("write");
        engine.drain_index_queue().expect("drain");

        assert!(engine.cache().search_word("first").expect("search").is_empty());
        assert!(engine
            .cache()
            .search_word("second")
            .expect("search")
            .contains(&node));
    }

    #[test]
    fn write_to_unknown_node_rejected_when_warm() {
        let dir = tempdir().expect("tempdir");
        let engine = fresh_engine(&dir);

        let result = engine.apply_content_edit(
            NodeId(99),
            &Locale::new("en"),
            &Payload::new("text", "orphan"),
        );
        assert!(matches!(result, Err(TrellisError::NotFound(_))));
    }

    #[test]
    fn structural_edit_survives_reopen_and_recovery() {
        let dir = tempdir().expect("tempdir");
        let config = EngineConfig::under(dir.path());
        let home;
        {
            let engine = ContentGraph::bootstrap(&config).expect("bootstrap");
            home = engine
                .create_node(NodeKind::new("page"), Some(Alias::new("home")))
                .expect("create");
            engine.place_node(None, home, 0).expect("place");
        }

        let engine = ContentGraph::bootstrap(&config).expect("re-bootstrap");
        assert!(engine.cache().get_node(home).is_ok());
    }

    #[test]
    fn delete_subtree_drops_content() {
        let dir = tempdir().expect("tempdir");
        let engine = fresh_engine(&dir);
        let locale = Locale::new("en");

        let home = engine
            .create_node(NodeKind::new("page"), Some(Alias::new("home")))
            .expect("create home");
        engine.place_node(None, home, 0).expect("place home");
        let child = engine
            .create_node(NodeKind::new("block"), Some(Alias::new("hero")))
            .expect("create child");
        engine.place_node(Some(home), child, 0).expect("place child");
        engine
            .apply_content_edit(child, &locale, &Payload::new("text", "hero copy"))
            .expect("write");
        engine.drain_index_queue().expect("drain");

        let edge = engine
            .cache()
            .edge_at(&crate::MaterializedPath::root("home"))
            .expect("edge");
        let receipt = engine
            .remove_association(edge.id, DeletePolicy::DeleteNodes)
            .expect("remove");
        engine.drain_index_queue().expect("drain");

        assert!(receipt.removed_nodes.contains(&child));
        assert!(matches!(
            engine.resolve(&Query::Content {
                target: child.into(),
                locale: locale.clone(),
            }),
            Err(TrellisError::NotFound(_))
        ));
        assert!(engine.cache().search_word("hero").expect("search").is_empty());
    }

    #[test]
    fn cache_loss_then_recovery_restores_reads() {
        let dir = tempdir().expect("tempdir");
        let engine = fresh_engine(&dir);
        let home = engine
            .create_node(NodeKind::new("page"), Some(Alias::new("home")))
            .expect("create");
        engine.place_node(None, home, 0).expect("place");

        engine.drop_cache();
        assert!(matches!(
            engine.cache().get_node(home),
            Err(TrellisError::StructureUnavailable)
        ));

        engine.run_recovery().expect("recovery");
        assert!(engine.cache().get_node(home).is_ok());
    }

    #[test]
    fn failed_recovery_refuses_structure_until_retry() {
        use crate::recovery::RecoveryState;

        let dir = tempdir().expect("tempdir");
        let engine = fresh_engine(&dir);
        let locale = Locale::new("en");
        let home = engine
            .create_node(NodeKind::new("page"), Some(Alias::new("home")))
            .expect("create");
        engine.place_node(None, home, 0).expect("place");
        engine
            .apply_content_edit(home, &locale, &Payload::new("text", "landing copy"))
            .expect("write");
        engine.drain_index_queue().expect("drain");

        let cancel = AtomicBool::new(true);
        assert!(engine.run_recovery_with_cancel(&cancel).is_err());

        let outcome = engine.last_recovery().expect("recorded outcome");
        assert_eq!(outcome.state, RecoveryState::Failed);

        // Structure and search refuse until a retry succeeds.
        assert!(matches!(
            engine
                .cache()
                .get_children(&crate::MaterializedPath::empty()),
            Err(TrellisError::StructureUnavailable)
        ));
        assert!(matches!(
            engine.resolve(&Query::Search {
                word: "landing".to_string()
            }),
            Err(TrellisError::StructureUnavailable)
        ));
        // Content by id keeps serving.
        assert!(engine
            .resolve(&Query::Content {
                target: home.into(),
                locale: locale.clone(),
            })
            .is_ok());

        let retried = engine.run_recovery().expect("retry");
        assert_eq!(retried.state, RecoveryState::Done);
        assert!(engine
            .cache()
            .get_children(&crate::MaterializedPath::empty())
            .is_ok());
    }

    #[test]
    fn config_loads_from_toml() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("trellis.toml");
        std::fs::write(
            &path,
            "source_dir = \"/data/structure\"\nstore_path = \"/data/content.redb\"\n",
        )
        .expect("write config");

        let config = EngineConfig::load(&path).expect("load");
        assert_eq!(config.source_dir, PathBuf::from("/data/structure"));
    }
}
