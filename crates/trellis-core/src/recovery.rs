//! # Recovery Manager
//!
//! Rebuilds the cache layer from the durable tiers after a cold start
//! or cache loss. Recovery is an explicit state machine:
//!
//! ```text
//! Start -> LoadSource -> VerifyChecksum -> WarmCache
//!       -> RebuildSearchIndex -> Done
//! ```
//!
//! Any step may transition to `Failed`; partial progress is never
//! published as a warm cache. When the Structure Source is unreadable,
//! the durable backup snapshot serves as a degraded fallback so reads
//! come back while the source is repaired.

use crate::cache::StructureCache;
use crate::formats::{decode_backup, encode_backup};
use crate::index::tokenize;
use crate::source::SourceDir;
use crate::storage::DurableStore;
use crate::structure::StructureSet;
use crate::TrellisError;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

// =============================================================================
// STATES AND OUTCOME
// =============================================================================

/// The recovery state machine's positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Nothing attempted yet.
    Start,
    /// Reading and validating the Structure Source.
    LoadSource,
    /// Comparing source and backup checksums.
    VerifyChecksum,
    /// Bulk-loading the cache snapshot.
    WarmCache,
    /// Re-tokenizing stored content into the search index.
    RebuildSearchIndex,
    /// Recovery complete; structural reads are live.
    Done,
    /// Recovery aborted; the cache stays cold.
    Failed,
}

/// What a finished recovery run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// Terminal state, `Done` for every `Ok` outcome.
    pub state: RecoveryState,
    /// True when structure came from the backup snapshot because the
    /// source was unreadable.
    pub degraded: bool,
    /// True when source and backup disagreed; the source won and the
    /// backup was rewritten.
    pub checksum_diverged: bool,
    /// Nodes in the loaded snapshot.
    pub nodes_loaded: usize,
    /// Distinct words in the rebuilt index.
    pub words_indexed: usize,
}

impl RecoveryOutcome {
    /// The outcome of a run that failed or was cancelled.
    #[must_use]
    pub fn failed() -> Self {
        Self {
            state: RecoveryState::Failed,
            degraded: false,
            checksum_diverged: false,
            nodes_loaded: 0,
            words_indexed: 0,
        }
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Drives one recovery run over the store's three tiers.
#[derive(Debug)]
pub struct RecoveryManager<'a> {
    source: &'a SourceDir,
    store: &'a DurableStore,
    cache: &'a StructureCache,
}

impl<'a> RecoveryManager<'a> {
    /// Bind a manager to the tiers it recovers.
    #[must_use]
    pub fn new(source: &'a SourceDir, store: &'a DurableStore, cache: &'a StructureCache) -> Self {
        Self {
            source,
            store,
            cache,
        }
    }

    /// Run recovery to completion.
    ///
    /// # Errors
    ///
    /// Any error maps to the `Failed` state and leaves the cache cold:
    /// a run that dies after `WarmCache` drops the snapshot again so a
    /// half-recovered state never serves.
    pub fn run(&self) -> Result<RecoveryOutcome, TrellisError> {
        let cancel = AtomicBool::new(false);
        self.run_with_cancel(&cancel)
    }

    /// Run recovery, checking `cancel` between steps.
    ///
    /// Cancellation is honored at step boundaries only; a step that has
    /// started runs to its end so the tiers are never left mid-write.
    pub fn run_with_cancel(&self, cancel: &AtomicBool) -> Result<RecoveryOutcome, TrellisError> {
        let result = self.drive(cancel);
        if result.is_err() {
            // Steps after WarmCache may have already published the
            // snapshot or part of the index; drop both so structural
            // and search reads answer StructureUnavailable until a
            // retry succeeds.
            self.cache.clear();
        }
        result
    }

    fn drive(&self, cancel: &AtomicBool) -> Result<RecoveryOutcome, TrellisError> {
        // LoadSource, with the backup as a degraded fallback.
        check_cancel(cancel, RecoveryState::LoadSource)?;
        let (set, degraded) = self.load_structure()?;

        // VerifyChecksum. Skipped in degraded mode: there is nothing to
        // compare the backup against.
        check_cancel(cancel, RecoveryState::VerifyChecksum)?;
        let checksum_diverged = if degraded {
            false
        } else {
            self.verify_checksum(&set)?
        };

        // WarmCache: one atomic snapshot swap.
        check_cancel(cancel, RecoveryState::WarmCache)?;
        let nodes_loaded = set.node_count();
        self.cache.put_structure(set.clone())?;

        // RebuildSearchIndex from stored content.
        check_cancel(cancel, RecoveryState::RebuildSearchIndex)?;
        self.rebuild_index(&set)?;
        let words_indexed = self.cache.indexed_word_count();

        info!(nodes_loaded, words_indexed, degraded, "recovery complete");
        Ok(RecoveryOutcome {
            state: RecoveryState::Done,
            degraded,
            checksum_diverged,
            nodes_loaded,
            words_indexed,
        })
    }

    /// Load structure from the source, falling back to the backup.
    fn load_structure(&self) -> Result<(StructureSet, bool), TrellisError> {
        match self.source.load() {
            Ok(set) => Ok((set, false)),
            Err(source_err) => {
                warn!(error = %source_err, "structure source unreadable, trying backup");
                let bytes = self.store.read_structure_backup()?.ok_or_else(|| {
                    TrellisError::Io(format!(
                        "structure source unreadable and no backup exists: {source_err}"
                    ))
                })?;
                let decoded = decode_backup(&bytes)?;
                Ok((decoded.set, true))
            }
        }
    }

    /// Compare the source set against the stored backup.
    ///
    /// The source is authoritative: divergence is logged, reported, and
    /// healed by rewriting the backup. A missing backup is healed the
    /// same way without counting as divergence.
    fn verify_checksum(&self, set: &StructureSet) -> Result<bool, TrellisError> {
        let source_checksum = set.checksum();
        let diverged = match self.store.read_structure_backup()? {
            Some(bytes) => match decode_backup(&bytes) {
                Ok(decoded) if decoded.checksum == source_checksum => return Ok(false),
                Ok(decoded) => {
                    warn!(
                        source = format_args!("{source_checksum:#018x}"),
                        backup = format_args!("{:#018x}", decoded.checksum),
                        "structure backup diverges from source, source wins"
                    );
                    true
                }
                Err(e) => {
                    warn!(error = %e, "structure backup unreadable, rewriting from source");
                    true
                }
            },
            None => false,
        };

        let bytes = encode_backup(set)?;
        self.store.write_structure_backup(&bytes)?;
        Ok(diverged)
    }

    /// Drop and rebuild the inverted index from stored content.
    ///
    /// Payloads for nodes absent from the snapshot (orphans awaiting
    /// re-placement) are skipped; their content stays in the store.
    fn rebuild_index(&self, set: &StructureSet) -> Result<(), TrellisError> {
        self.cache.clear_index()?;
        for (node, _locale, payload) in self.store.iter_content()? {
            if set.node(node).is_none() {
                continue;
            }
            self.cache.index_words(node, tokenize(&payload.body))?;
        }
        Ok(())
    }
}

fn check_cancel(cancel: &AtomicBool, state: RecoveryState) -> Result<(), TrellisError> {
    if cancel.load(Ordering::Relaxed) {
        warn!(?state, "recovery cancelled");
        return Err(TrellisError::Io(format!(
            "recovery cancelled before {state:?}"
        )));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::EdgeDef;
    use crate::{Alias, EdgeId, Locale, Node, NodeId, NodeKind, Payload};
    use tempfile::tempdir;

    fn sample_set() -> StructureSet {
        let nodes = vec![
            Node::new(NodeId(1), NodeKind::new("page"), Some(Alias::new("home")), 0),
            Node::new(NodeId(2), NodeKind::new("block"), Some(Alias::new("hero")), 0),
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
                weight: 0,
            },
        ];
        StructureSet::validate(nodes, edges).expect("valid set")
    }

    #[test]
    fn cold_start_warms_cache_and_index() {
        let dir = tempdir().expect("tempdir");
        let source = SourceDir::new(dir.path().join("structure"));
        let store = DurableStore::open(dir.path().join("store.redb")).expect("store");
        let cache = StructureCache::new();

        source.save(&sample_set()).expect("save source");
        store
            .write_content(
                NodeId(2),
                &Locale::new("en"),
                &Payload::new("markdown", "welcome aboard"),
            )
            .expect("write content");

        let outcome = RecoveryManager::new(&source, &store, &cache)
            .run()
            .expect("recovery");

        assert_eq!(outcome.state, RecoveryState::Done);
        assert!(!outcome.degraded);
        assert_eq!(outcome.nodes_loaded, 2);
        assert!(outcome.words_indexed >= 2);
        assert!(cache.is_warm());
        assert!(cache
            .search_word("welcome")
            .expect("search")
            .contains(&NodeId(2)));
    }

    #[test]
    fn missing_backup_is_self_healed() {
        let dir = tempdir().expect("tempdir");
        let source = SourceDir::new(dir.path().join("structure"));
        let store = DurableStore::open(dir.path().join("store.redb")).expect("store");
        let cache = StructureCache::new();
        source.save(&sample_set()).expect("save source");

        let outcome = RecoveryManager::new(&source, &store, &cache)
            .run()
            .expect("recovery");

        assert!(!outcome.checksum_diverged);
        let backup = store
            .read_structure_backup()
            .expect("read")
            .expect("backup written");
        assert_eq!(
            decode_backup(&backup).expect("decode").checksum,
            sample_set().checksum()
        );
    }

    #[test]
    fn diverged_backup_reported_and_rewritten() {
        let dir = tempdir().expect("tempdir");
        let source = SourceDir::new(dir.path().join("structure"));
        let store = DurableStore::open(dir.path().join("store.redb")).expect("store");
        let cache = StructureCache::new();

        source.save(&sample_set()).expect("save source");
        let stale = StructureSet::validate(
            vec![Node::new(
                NodeId(9),
                NodeKind::new("page"),
                Some(Alias::new("old")),
                0,
            )],
            vec![EdgeDef {
                id: EdgeId(1),
                parent: None,
                child: NodeId(9),
                weight: 0,
            }],
        )
        .expect("stale set");
        store
            .write_structure_backup(&encode_backup(&stale).expect("encode"))
            .expect("write backup");

        let outcome = RecoveryManager::new(&source, &store, &cache)
            .run()
            .expect("recovery");

        // Source wins, backup healed.
        assert!(outcome.checksum_diverged);
        assert!(cache.get_node(NodeId(1)).is_ok());
        let healed = store
            .read_structure_backup()
            .expect("read")
            .expect("backup");
        assert_eq!(
            decode_backup(&healed).expect("decode").checksum,
            sample_set().checksum()
        );
    }

    #[test]
    fn unreadable_source_falls_back_to_backup() {
        let dir = tempdir().expect("tempdir");
        let source_dir = dir.path().join("structure");
        let source = SourceDir::new(&source_dir);
        let store = DurableStore::open(dir.path().join("store.redb")).expect("store");
        let cache = StructureCache::new();

        store
            .write_structure_backup(&encode_backup(&sample_set()).expect("encode"))
            .expect("write backup");
        std::fs::create_dir_all(&source_dir).expect("mkdir");
        std::fs::write(source_dir.join("nodes.toml"), "not toml [[[").expect("corrupt");

        let outcome = RecoveryManager::new(&source, &store, &cache)
            .run()
            .expect("recovery");

        assert!(outcome.degraded);
        assert_eq!(outcome.nodes_loaded, 2);
        assert!(cache.is_warm());
    }

    #[test]
    fn no_source_and_no_backup_fails_cold() {
        let dir = tempdir().expect("tempdir");
        let source_dir = dir.path().join("structure");
        let source = SourceDir::new(&source_dir);
        let store = DurableStore::open(dir.path().join("store.redb")).expect("store");
        let cache = StructureCache::new();

        std::fs::create_dir_all(&source_dir).expect("mkdir");
        std::fs::write(source_dir.join("nodes.toml"), "broken = [[[").expect("corrupt");

        let result = RecoveryManager::new(&source, &store, &cache).run();

        assert!(result.is_err());
        assert!(!cache.is_warm());
    }

    #[test]
    fn cancellation_leaves_cache_cold() {
        let dir = tempdir().expect("tempdir");
        let source = SourceDir::new(dir.path().join("structure"));
        let store = DurableStore::open(dir.path().join("store.redb")).expect("store");
        let cache = StructureCache::new();
        source.save(&sample_set()).expect("save source");

        let cancel = AtomicBool::new(true);
        let result = RecoveryManager::new(&source, &store, &cache).run_with_cancel(&cancel);

        assert!(result.is_err());
        assert!(!cache.is_warm());
    }

    #[test]
    fn failed_run_drops_a_warm_cache() {
        let dir = tempdir().expect("tempdir");
        let source = SourceDir::new(dir.path().join("structure"));
        let store = DurableStore::open(dir.path().join("store.redb")).expect("store");
        let cache = StructureCache::new();
        source.save(&sample_set()).expect("save source");

        let manager = RecoveryManager::new(&source, &store, &cache);
        manager.run().expect("first run");
        assert!(cache.is_warm());

        let cancel = AtomicBool::new(true);
        assert!(manager.run_with_cancel(&cancel).is_err());
        assert!(!cache.is_warm());

        manager.run().expect("retry");
        assert!(cache.is_warm());
    }

    #[test]
    fn recovery_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let source = SourceDir::new(dir.path().join("structure"));
        let store = DurableStore::open(dir.path().join("store.redb")).expect("store");
        let cache = StructureCache::new();
        source.save(&sample_set()).expect("save source");

        let first = RecoveryManager::new(&source, &store, &cache)
            .run()
            .expect("first run");
        let second = RecoveryManager::new(&source, &store, &cache)
            .run()
            .expect("second run");

        assert_eq!(first.nodes_loaded, second.nodes_loaded);
        assert_eq!(first.words_indexed, second.words_indexed);
        assert!(!second.checksum_diverged);
    }
}
