//! # redb-backed Durable Store
//!
//! The authoritative home of content payloads plus the structure backup
//! snapshot, on a redb embedded database:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! The store is deliberately dumb about structure: it can answer "the
//! payload for node N in locale L" and "the latest backup blob", never
//! "the children of P". Structural questions belong to the cache layer.

use crate::primitives::{MAX_PAYLOAD_LENGTH, MAX_TAG_LENGTH};
use crate::{Locale, NodeId, Payload, TrellisError};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Table for content: (node_id, locale) -> serialized Payload bytes
const CONTENT: TableDefinition<(u64, &str), &[u8]> = TableDefinition::new("content");

/// Table for the structure backup: slot name -> snapshot bytes
const STRUCTURE_BACKUP: TableDefinition<&str, &[u8]> = TableDefinition::new("structure_backup");

/// The single backup slot currently written.
const BACKUP_SLOT: &str = "current";

// =============================================================================
// METRICS
// =============================================================================

/// Operation counters, bumped on every store round trip.
///
/// Structural reads never touch these counters; that asymmetry is the
/// observable form of the latency-tier contract and what the tier tests
/// assert on.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    content_reads: AtomicU64,
    content_batch_reads: AtomicU64,
    content_writes: AtomicU64,
    backup_reads: AtomicU64,
    backup_writes: AtomicU64,
}

impl StoreMetrics {
    /// Single-payload reads served.
    #[must_use]
    pub fn content_reads(&self) -> u64 {
        self.content_reads.load(Ordering::Relaxed)
    }

    /// Batched read transactions served (one per batch, not per key).
    #[must_use]
    pub fn content_batch_reads(&self) -> u64 {
        self.content_batch_reads.load(Ordering::Relaxed)
    }

    /// Payload writes committed.
    #[must_use]
    pub fn content_writes(&self) -> u64 {
        self.content_writes.load(Ordering::Relaxed)
    }

    /// Backup snapshot reads.
    #[must_use]
    pub fn backup_reads(&self) -> u64 {
        self.backup_reads.load(Ordering::Relaxed)
    }

    /// Backup snapshot writes.
    #[must_use]
    pub fn backup_writes(&self) -> u64 {
        self.backup_writes.load(Ordering::Relaxed)
    }
}

// =============================================================================
// DURABLE STORE
// =============================================================================

/// A disk-backed content store using redb.
pub struct DurableStore {
    /// The redb database handle.
    db: Database,
    /// Operation counters.
    metrics: StoreMetrics,
}

impl std::fmt::Debug for DurableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStore")
            .field("content_writes", &self.metrics.content_writes())
            .finish_non_exhaustive()
    }
}

impl DurableStore {
    /// Open or create a store database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TrellisError> {
        let db =
            Database::create(path.as_ref()).map_err(|e| TrellisError::Io(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| TrellisError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(CONTENT)
                .map_err(|e| TrellisError::Io(e.to_string()))?;
            let _ = write_txn
                .open_table(STRUCTURE_BACKUP)
                .map_err(|e| TrellisError::Io(e.to_string()))?;
            write_txn
                .commit()
                .map_err(|e| TrellisError::Io(e.to_string()))?;
        }

        Ok(Self {
            db,
            metrics: StoreMetrics::default(),
        })
    }

    /// Operation counters for this store.
    #[must_use]
    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    // =========================================================================
    // CONTENT
    // =========================================================================

    /// Write (or replace) the payload for a node/locale pair.
    ///
    /// # Errors
    ///
    /// [`TrellisError::Schema`] for over-long tags or bodies;
    /// [`TrellisError::Io`] for any storage failure. Failures always
    /// propagate, nothing is buffered.
    pub fn write_content(
        &self,
        node: NodeId,
        locale: &Locale,
        payload: &Payload,
    ) -> Result<(), TrellisError> {
        validate_payload(locale, payload)?;
        let bytes = postcard::to_stdvec(payload)
            .map_err(|e| TrellisError::Serialization(e.to_string()))?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| TrellisError::Io(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(CONTENT)
                .map_err(|e| TrellisError::Io(e.to_string()))?;
            table
                .insert((node.0, locale.as_str()), bytes.as_slice())
                .map_err(|e| TrellisError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| TrellisError::Io(e.to_string()))?;

        self.metrics.content_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Read the payload for a node/locale pair.
    pub fn read_content(&self, node: NodeId, locale: &Locale) -> Result<Payload, TrellisError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TrellisError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(CONTENT)
            .map_err(|e| TrellisError::Io(e.to_string()))?;
        let value = table
            .get((node.0, locale.as_str()))
            .map_err(|e| TrellisError::Io(e.to_string()))?
            .ok_or_else(|| {
                TrellisError::NotFound(format!(
                    "content for node {} locale {:?}",
                    node.0,
                    locale.as_str()
                ))
            })?;
        let payload = postcard::from_bytes(value.value())
            .map_err(|e| TrellisError::Deserialization(e.to_string()))?;

        self.metrics.content_reads.fetch_add(1, Ordering::Relaxed);
        Ok(payload)
    }

    /// Read payloads for many nodes in one transaction.
    ///
    /// Nodes with no payload for the locale are simply absent from the
    /// result; a missing payload is not an error for a batch.
    pub fn read_content_batch(
        &self,
        nodes: &[NodeId],
        locale: &Locale,
    ) -> Result<BTreeMap<NodeId, Payload>, TrellisError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TrellisError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(CONTENT)
            .map_err(|e| TrellisError::Io(e.to_string()))?;

        let mut out = BTreeMap::new();
        for &node in nodes {
            let found = table
                .get((node.0, locale.as_str()))
                .map_err(|e| TrellisError::Io(e.to_string()))?;
            if let Some(value) = found {
                let payload: Payload = postcard::from_bytes(value.value())
                    .map_err(|e| TrellisError::Deserialization(e.to_string()))?;
                out.insert(node, payload);
            }
        }

        self.metrics
            .content_batch_reads
            .fetch_add(1, Ordering::Relaxed);
        Ok(out)
    }

    /// Delete every payload (all locales) for a node.
    ///
    /// Used when a structural edit removes the node itself. Deleting a
    /// node with no content is a no-op.
    pub fn delete_content(&self, node: NodeId) -> Result<(), TrellisError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| TrellisError::Io(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(CONTENT)
                .map_err(|e| TrellisError::Io(e.to_string()))?;
            // Range over this node's keys only; (id, "") sorts before
            // every locale of id, so deletion cost tracks the node, not
            // the table.
            let mut keys: Vec<String> = Vec::new();
            {
                let lower = (node.0, "");
                let range = match node.0.checked_add(1) {
                    Some(next) => table.range(lower..(next, "")),
                    None => table.range(lower..),
                }
                .map_err(|e| TrellisError::Io(e.to_string()))?;
                for entry in range {
                    let (key, _) = entry.map_err(|e| TrellisError::Io(e.to_string()))?;
                    keys.push(key.value().1.to_string());
                }
            }
            for locale in keys {
                table
                    .remove((node.0, locale.as_str()))
                    .map_err(|e| TrellisError::Io(e.to_string()))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| TrellisError::Io(e.to_string()))
    }

    /// Iterate every stored payload, for search-index rebuilds.
    pub fn iter_content(&self) -> Result<Vec<(NodeId, Locale, Payload)>, TrellisError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TrellisError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(CONTENT)
            .map_err(|e| TrellisError::Io(e.to_string()))?;

        let mut out = Vec::new();
        for entry in table.iter().map_err(|e| TrellisError::Io(e.to_string()))? {
            let (key, value) = entry.map_err(|e| TrellisError::Io(e.to_string()))?;
            let (id, locale) = key.value();
            let payload: Payload = postcard::from_bytes(value.value())
                .map_err(|e| TrellisError::Deserialization(e.to_string()))?;
            out.push((NodeId(id), Locale::new(locale), payload));
        }
        Ok(out)
    }

    // =========================================================================
    // STRUCTURE BACKUP
    // =========================================================================

    /// Replace the structure backup snapshot.
    pub fn write_structure_backup(&self, bytes: &[u8]) -> Result<(), TrellisError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| TrellisError::Io(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(STRUCTURE_BACKUP)
                .map_err(|e| TrellisError::Io(e.to_string()))?;
            table
                .insert(BACKUP_SLOT, bytes)
                .map_err(|e| TrellisError::Io(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| TrellisError::Io(e.to_string()))?;

        self.metrics.backup_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Read the structure backup snapshot, if one was ever written.
    pub fn read_structure_backup(&self) -> Result<Option<Vec<u8>>, TrellisError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| TrellisError::Io(e.to_string()))?;
        let table = read_txn
            .open_table(STRUCTURE_BACKUP)
            .map_err(|e| TrellisError::Io(e.to_string()))?;
        let bytes = table
            .get(BACKUP_SLOT)
            .map_err(|e| TrellisError::Io(e.to_string()))?
            .map(|v| v.value().to_vec());

        self.metrics.backup_reads.fetch_add(1, Ordering::Relaxed);
        Ok(bytes)
    }
}

fn validate_payload(locale: &Locale, payload: &Payload) -> Result<(), TrellisError> {
    if locale.as_str().is_empty() || locale.as_str().len() > MAX_TAG_LENGTH {
        return Err(TrellisError::Schema(format!(
            "invalid locale tag {:?}",
            locale.as_str()
        )));
    }
    if payload.tag.is_empty() || payload.tag.len() > MAX_TAG_LENGTH {
        return Err(TrellisError::Schema(format!(
            "invalid payload tag {:?}",
            payload.tag
        )));
    }
    if payload.body.len() > MAX_PAYLOAD_LENGTH {
        return Err(TrellisError::Schema(format!(
            "payload body of {} bytes exceeds maximum {}",
            payload.body.len(),
            MAX_PAYLOAD_LENGTH
        )));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
