//! # Inverted Word Index
//!
//! The cache layer's search structure: word -> set of node ids.
//!
//! Insertion is additive (a word maps to a growing set); removal is
//! explicit via [`InvertedIndex::deindex`], driven by the propagation
//! queue when content changes. The index is rebuilt from the Durable
//! Store during recovery and holds nothing that cannot be reconstructed.

use crate::primitives::{MAX_WORD_LENGTH, MIN_WORD_LENGTH};
use crate::NodeId;
use std::collections::{BTreeMap, BTreeSet};

/// In-memory inverted index over content words.
#[derive(Debug, Clone, Default)]
pub struct InvertedIndex {
    /// word -> nodes containing it
    words: BTreeMap<String, BTreeSet<NodeId>>,
    /// node -> words it was indexed under, for O(words) de-indexing
    postings: BTreeMap<NodeId, BTreeSet<String>>,
}

impl InvertedIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add words for a node. Additive: existing postings stay.
    pub fn index_words<I, S>(&mut self, node: NodeId, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            let word = word.as_ref();
            if word.is_empty() {
                continue;
            }
            self.words
                .entry(word.to_string())
                .or_default()
                .insert(node);
            self.postings
                .entry(node)
                .or_default()
                .insert(word.to_string());
        }
    }

    /// Remove every posting for a node.
    ///
    /// Called before re-indexing when the node's content changed.
    pub fn deindex(&mut self, node: NodeId) {
        if let Some(words) = self.postings.remove(&node) {
            for word in words {
                if let Some(set) = self.words.get_mut(&word) {
                    set.remove(&node);
                    if set.is_empty() {
                        self.words.remove(&word);
                    }
                }
            }
        }
    }

    /// Nodes indexed under a word. Empty set for unknown words.
    #[must_use]
    pub fn search_word(&self, word: &str) -> BTreeSet<NodeId> {
        self.words.get(word).cloned().unwrap_or_default()
    }

    /// Number of distinct indexed words.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Drop all postings.
    pub fn clear(&mut self) {
        self.words.clear();
        self.postings.clear();
    }
}

// =============================================================================
// TOKENIZER
// =============================================================================

/// Split a content body into indexable words.
///
/// Lowercased alphanumeric runs; words shorter than `MIN_WORD_LENGTH`
/// are dropped, words longer than `MAX_WORD_LENGTH` are truncated so
/// long identifiers remain searchable by prefix.
#[must_use]
pub fn tokenize(text: &str) -> BTreeSet<String> {
    let mut words = BTreeSet::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        // Character count, not byte length: a lone multibyte letter is
        // still a one-letter token.
        if raw.chars().count() < MIN_WORD_LENGTH {
            continue;
        }
        let mut word: String = raw.to_lowercase();
        if word.len() > MAX_WORD_LENGTH {
            let mut cut = MAX_WORD_LENGTH;
            while !word.is_char_boundary(cut) {
                cut -= 1;
            }
            word.truncate(cut);
        }
        words.insert(word);
    }
    words
}

// =============================================================================
// TESTS
// =============================================================================
