//! # Structure Backup Snapshot Format
//!
//! The compressed, checksummed binary form of a [`StructureSet`] kept
//! in the Durable Store as a fallback for when the Structure Source is
//! unreadable.
//!
//! ## Layout
//!
//! ```text
//! [magic "TRSB"] [version u8] [postcard header] [zstd(postcard body)]
//! ```
//!
//! The header carries row counts and the set checksum so a reader can
//! reject a corrupt or oversized snapshot before touching the body.

use crate::primitives::{
    BACKUP_COMPRESSION_LEVEL, BACKUP_MAGIC, BACKUP_VERSION, MAX_BACKUP_PAYLOAD_SIZE,
    MAX_STRUCTURE_EDGES, MAX_STRUCTURE_NODES,
};
use crate::structure::{EdgeDef, StructureSet};
use crate::{Node, TrellisError};
use serde::{Deserialize, Serialize};
use std::io::Read;

// =============================================================================
// WIRE STRUCTS
// =============================================================================

/// Uncompressed header, postcard-encoded directly after the version byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BackupHeader {
    node_count: u64,
    edge_count: u64,
    checksum: u64,
}

/// The compressed body: canonical rows, exactly what `to_rows` yields.
#[derive(Debug, Serialize, Deserialize)]
struct BackupBody {
    nodes: Vec<Node>,
    edges: Vec<EdgeDef>,
}

/// A decoded snapshot: the validated set plus the checksum the writer
/// recorded, for divergence comparison against the Structure Source.
#[derive(Debug)]
pub struct DecodedBackup {
    /// The structural snapshot the backup held.
    pub set: StructureSet,
    /// Checksum recorded at write time; equals `set.checksum()` after a
    /// successful decode.
    pub checksum: u64,
}

// =============================================================================
// ENCODE / DECODE
// =============================================================================

/// Encode a structure set into the backup wire form.
pub fn encode_backup(set: &StructureSet) -> Result<Vec<u8>, TrellisError> {
    let (nodes, edges) = set.to_rows();
    let header = BackupHeader {
        node_count: nodes.len() as u64,
        edge_count: edges.len() as u64,
        checksum: set.checksum(),
    };
    let body = BackupBody { nodes, edges };

    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(BACKUP_MAGIC);
    out.push(BACKUP_VERSION);

    let header_bytes = postcard::to_stdvec(&header)
        .map_err(|e| TrellisError::Serialization(format!("backup header: {e}")))?;
    out.extend_from_slice(&header_bytes);

    let body_bytes = postcard::to_stdvec(&body)
        .map_err(|e| TrellisError::Serialization(format!("backup body: {e}")))?;
    let compressed = zstd::encode_all(body_bytes.as_slice(), BACKUP_COMPRESSION_LEVEL)
        .map_err(|e| TrellisError::Io(format!("backup compression: {e}")))?;
    out.extend_from_slice(&compressed);

    Ok(out)
}

/// Decode and re-validate a backup snapshot.
///
/// # Errors
///
/// - [`TrellisError::Deserialization`] — bad magic, unsupported
///   version, truncated or oversized input
/// - [`TrellisError::Consistency`] — header counts or checksum do not
///   match the decoded body
pub fn decode_backup(bytes: &[u8]) -> Result<DecodedBackup, TrellisError> {
    if bytes.len() > MAX_BACKUP_PAYLOAD_SIZE {
        return Err(TrellisError::Deserialization(format!(
            "backup payload of {} bytes exceeds maximum {}",
            bytes.len(),
            MAX_BACKUP_PAYLOAD_SIZE
        )));
    }
    if bytes.len() < BACKUP_MAGIC.len() + 1 {
        return Err(TrellisError::Deserialization(
            "backup payload truncated before header".to_string(),
        ));
    }
    let (magic, rest) = bytes.split_at(BACKUP_MAGIC.len());
    if magic != BACKUP_MAGIC.as_slice() {
        return Err(TrellisError::Deserialization(
            "bad backup magic bytes".to_string(),
        ));
    }
    let (&version, rest) = rest
        .split_first()
        .ok_or_else(|| TrellisError::Deserialization("missing backup version".to_string()))?;
    if version != BACKUP_VERSION {
        return Err(TrellisError::Deserialization(format!(
            "unsupported backup version {version}"
        )));
    }

    let (header, compressed): (BackupHeader, &[u8]) = postcard::take_from_bytes(rest)
        .map_err(|e| TrellisError::Deserialization(format!("backup header: {e}")))?;

    // Bound the claimed size before allocating anything for the body.
    if header.node_count > MAX_STRUCTURE_NODES as u64
        || header.edge_count > MAX_STRUCTURE_EDGES as u64
    {
        return Err(TrellisError::Deserialization(format!(
            "backup claims {} nodes / {} edges, over limits",
            header.node_count, header.edge_count
        )));
    }

    let body_bytes = decompress_bounded(compressed)?;
    let body: BackupBody = postcard::from_bytes(&body_bytes)
        .map_err(|e| TrellisError::Deserialization(format!("backup body: {e}")))?;

    if body.nodes.len() as u64 != header.node_count || body.edges.len() as u64 != header.edge_count
    {
        return Err(TrellisError::Consistency(format!(
            "backup header claims {} nodes / {} edges, body holds {} / {}",
            header.node_count,
            header.edge_count,
            body.nodes.len(),
            body.edges.len()
        )));
    }

    // Depth and path are never trusted from storage; revalidate.
    let set = StructureSet::validate(body.nodes, body.edges)?;
    if set.checksum() != header.checksum {
        return Err(TrellisError::Consistency(format!(
            "backup checksum mismatch: header {:#018x}, recomputed {:#018x}",
            header.checksum,
            set.checksum()
        )));
    }

    Ok(DecodedBackup {
        set,
        checksum: header.checksum,
    })
}

/// Decompress with a hard cap on the expanded size.
fn decompress_bounded(compressed: &[u8]) -> Result<Vec<u8>, TrellisError> {
    let decoder = zstd::Decoder::new(compressed)
        .map_err(|e| TrellisError::Deserialization(format!("backup decompression: {e}")))?;
    let mut out = Vec::new();
    let mut limited = decoder.take(MAX_BACKUP_PAYLOAD_SIZE as u64 + 1);
    limited
        .read_to_end(&mut out)
        .map_err(|e| TrellisError::Deserialization(format!("backup decompression: {e}")))?;
    if out.len() > MAX_BACKUP_PAYLOAD_SIZE {
        return Err(TrellisError::Deserialization(format!(
            "backup expands past maximum {MAX_BACKUP_PAYLOAD_SIZE} bytes"
        )));
    }
    Ok(out)
}

// =============================================================================
// TESTS
// =============================================================================
