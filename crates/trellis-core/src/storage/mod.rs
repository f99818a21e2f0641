//! # Storage Layer
//!
//! The durable tier: content payloads and the structure backup on an
//! embedded redb database.

pub mod durable;

pub use durable::{DurableStore, StoreMetrics};
