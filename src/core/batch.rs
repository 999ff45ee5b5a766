//! Token batches submitted to a model context for evaluation.
//!
//! A batch is an ordered list of `(token, position, sequence ids, wants logits)`
//! entries. The draft side rebuilds its batch on every call; the target batch is
//! owned by the caller and only appended to (and possibly truncated) by the
//! speculative decoder.
//!
//! ## Example
//!
//! ```
//! use nano_speculative::core::batch::Batch;
//!
//! let mut batch = Batch::new();
//! batch.add(42, 0, &[0], false);
//! batch.add(7, 1, &[0], true);
//!
//! assert_eq!(batch.len(), 2);
//! assert_eq!(batch.tokens(), vec![42, 7]);
//! assert_eq!(batch.num_logits(), 1);
//! ```

use crate::core::{SequenceId, TokenId};

/// One token slot in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Token to evaluate.
    pub token: TokenId,
    /// Position of the token in its sequence(s).
    pub pos: usize,
    /// Sequences the token belongs to.
    pub seq_ids: Vec<SequenceId>,
    /// Whether logits should be produced for this entry.
    pub logits: bool,
}

/// Mutable, ordered batch of tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    entries: Vec<BatchEntry>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Append a token.
    pub fn add(&mut self, token: TokenId, pos: usize, seq_ids: &[SequenceId], logits: bool) {
        self.entries.push(BatchEntry {
            token,
            pos,
            seq_ids: seq_ids.to_vec(),
            logits,
        });
    }

    /// Keep only the first `len` entries.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Option<&BatchEntry> {
        self.entries.get(index)
    }

    /// All entries in order.
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// Iterate over the entries.
    pub fn iter(&self) -> std::slice::Iter<'_, BatchEntry> {
        self.entries.iter()
    }

    /// Token ids in batch order.
    pub fn tokens(&self) -> Vec<TokenId> {
        self.entries.iter().map(|e| e.token).collect()
    }

    /// Positions in batch order.
    pub fn positions(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.pos).collect()
    }

    /// Number of entries requesting logits.
    pub fn num_logits(&self) -> usize {
        self.entries.iter().filter(|e| e.logits).count()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a BatchEntry;
    type IntoIter = std::slice::Iter<'a, BatchEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
