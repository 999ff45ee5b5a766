//! Model context and vocabulary contracts.
//!
//! A [`ModelContext`] is one loaded model plus its KV cache. The speculative
//! decoder drives the draft context exclusively through this trait, so any
//! backend that can evaluate a [`Batch`] and edit its cache by position can
//! serve as a draft model.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::core::{Batch, SequenceId, TokenId};
use crate::error::Result;

/// Tokenizer family of a vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VocabType {
    /// No tokenizer attached.
    None,
    /// SentencePiece byte-fallback BPE.
    Spm,
    /// Byte-level BPE.
    Bpe,
    /// WordPiece.
    Wpm,
    /// Unigram.
    Ugm,
    /// RWKV greedy trie.
    Rwkv,
}

/// Read-only view of a model's vocabulary.
pub trait Vocabulary {
    /// Tokenizer family.
    fn vocab_type(&self) -> VocabType;

    /// Number of token ids.
    fn n_vocab(&self) -> usize;

    /// Beginning-of-sequence token, if the vocabulary defines one.
    fn bos(&self) -> Option<TokenId>;

    /// End-of-sequence token, if the vocabulary defines one.
    fn eos(&self) -> Option<TokenId>;

    /// Whether the tokenizer prepends BOS.
    fn add_bos(&self) -> bool;

    /// Whether the tokenizer appends EOS.
    fn add_eos(&self) -> bool;

    /// Surface text of `id`, or `None` if out of range.
    fn token_text(&self, id: TokenId) -> Option<&[u8]>;
}

/// A model plus its KV cache.
///
/// Positions are logical; `to = None` in range arguments means "to the end".
pub trait ModelContext {
    /// Vocabulary of the loaded model.
    fn vocab(&self) -> &dyn Vocabulary;

    /// Maximum number of positions the cache can hold.
    fn capacity(&self) -> usize;

    /// Run a forward pass over `batch`, writing every entry into the cache.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Evaluation`] if the pass fails. Cache contents
    /// written by the failed call are unspecified.
    fn evaluate(&mut self, batch: &Batch) -> Result<()>;

    /// Logits `[n_vocab]` for entry `index` of the last evaluated batch.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::MissingLogits`] if that entry did not request
    /// logits.
    fn logits(&self, index: usize) -> Result<Tensor>;

    /// Drop every cached position of every sequence.
    fn cache_clear(&mut self);

    /// Remove positions `[from, to)` of `seq`.
    fn cache_remove(&mut self, seq: SequenceId, from: usize, to: Option<usize>);

    /// Add `delta` to the positions `[from, to)` of `seq`.
    fn cache_shift(&mut self, seq: SequenceId, from: usize, to: Option<usize>, delta: isize);

    /// Number of positions cached for `seq`.
    fn cache_len(&self, seq: SequenceId) -> usize;
}
