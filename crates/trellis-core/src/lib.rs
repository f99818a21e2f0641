//! # trellis-core
//!
//! A layered content-graph store: one structural graph of nodes and
//! weighted parent→child associations, served from three cooperating
//! tiers.
//!
//! ## Tiers
//!
//! - **Structure Source** (`source`): authoritative plain-text shape,
//!   two TOML files, rewritten in normalized form on every sync
//! - **Durable Store** (`storage`): redb-backed content payloads per
//!   node/locale, plus a compressed checksummed structure backup
//! - **Cache Layer** (`cache`): ephemeral snapshot and inverted search
//!   index, the only read path for structure and search
//!
//! The `recovery` state machine rebuilds the cache from the durable
//! tiers; the `router` dispatches each query class to the tier that
//! owns it; the `engine` facade wires everything together.
//!
//! ## Architectural Constraints
//!
//! - The cache holds nothing that cannot be reconstructed
//! - Structure queries never fall back to the Durable Store
//! - Deterministic throughout: `BTreeMap`/`BTreeSet`, integer
//!   arithmetic only
//! - No async, no network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod edit;
pub mod engine;
pub mod formats;
pub mod index;
pub mod path;
pub mod primitives;
pub mod queue;
pub mod recovery;
pub mod router;
pub mod source;
pub mod storage;
pub mod structure;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Alias, Association, ChildRef, EdgeId, Locale, Node, NodeId, NodeKind, Payload, TrellisError,
};

pub use path::MaterializedPath;

// =============================================================================
// RE-EXPORTS: Tiers
// =============================================================================

pub use cache::StructureCache;
pub use source::SourceDir;
pub use storage::{DurableStore, StoreMetrics};
pub use structure::{EdgeDef, StructureSet};

// =============================================================================
// RE-EXPORTS: Operations
// =============================================================================

pub use edit::{apply_edits, DeletePolicy, EditOutcome, EditSet, StructuralOp};
pub use engine::{ContentGraph, EngineConfig, SyncReceipt};
pub use formats::{decode_backup, encode_backup, DecodedBackup};
pub use index::{tokenize, InvertedIndex};
pub use queue::{IndexQueue, IndexTask};
pub use recovery::{RecoveryManager, RecoveryOutcome, RecoveryState};
pub use router::{NodeRef, Query, QueryKind, QueryResult, QueryRouter, SubtreeEntry};
