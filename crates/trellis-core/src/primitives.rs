//! # Core Constants
//!
//! Hardcoded limits and format constants for the trellis store.
//!
//! These are compiled into the binary and immutable at runtime. Every
//! query and every deserialization path must be computationally bounded,
//! and these constants are where the bounds live.

/// Separator between segments of a materialized path.
pub const PATH_SEPARATOR: char = '.';

/// Magic bytes for the structure backup snapshot format.
///
/// File layout = Magic ("TRSB") + Version (u8) + header + compressed body.
pub const BACKUP_MAGIC: &[u8; 4] = b"TRSB";

/// Current backup snapshot format version.
///
/// Increment on breaking changes to the snapshot encoding.
pub const BACKUP_VERSION: u8 = 1;

/// Maximum depth of any association in the structure graph.
///
/// Bounds path computation and subtree collection; a structure source
/// that nests deeper than this is rejected as malformed.
pub const MAX_DEPTH: u32 = 64;

/// Maximum number of nodes accepted from a structure source or backup.
///
/// Validated before the rows are materialized to prevent memory
/// exhaustion from corrupted or hostile input.
pub const MAX_STRUCTURE_NODES: usize = 1_000_000;

/// Maximum number of associations accepted from a structure source or backup.
pub const MAX_STRUCTURE_EDGES: usize = 1_000_000;

/// Maximum decompressed size of the backup snapshot body (256 MB).
///
/// Checked before decompression so a tiny hostile snapshot cannot force
/// a huge allocation.
pub const MAX_BACKUP_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// zstd compression level for the backup snapshot.
pub const BACKUP_COMPRESSION_LEVEL: i32 = 3;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a node alias or kind tag.
pub const MAX_TAG_LENGTH: usize = 256;

/// Maximum length of a content payload body (1 MB).
pub const MAX_PAYLOAD_LENGTH: usize = 1024 * 1024;

/// Maximum number of nodes returned by a single subtree query.
pub const MAX_SUBTREE_NODES: usize = 10_000;

// =============================================================================
// TOKENIZER LIMITS
// =============================================================================

/// Minimum length of a word admitted to the inverted index.
pub const MIN_WORD_LENGTH: usize = 2;

/// Maximum length of a word admitted to the inverted index.
///
/// Longer tokens are truncated rather than dropped so prefix-heavy
/// identifiers stay searchable.
pub const MAX_WORD_LENGTH: usize = 64;
