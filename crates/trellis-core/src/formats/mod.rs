//! # Wire Formats
//!
//! Binary encodings used by the Durable Store. Everything here is
//! versioned behind magic bytes and bounded before deserialization.

pub mod backup;

pub use backup::{decode_backup, encode_backup, DecodedBackup};
