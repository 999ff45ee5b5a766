//! Bigram language model context.
//!
//! The smallest model that satisfies [`ModelContext`]: the next-token logits
//! depend only on the token being evaluated. The logits table is stored as a
//! `[n_vocab, n_vocab]` embedding, so a forward pass is a single lookup.
//! Cache bookkeeping goes through the arena [`KvCache`], which makes the model
//! a faithful stand-in for a transformer when exercising cache surgery.
//!
//! ## Forward Pass
//!
//! ```text
//! Batch tokens [n]
//!       │
//!       ▼
//! ┌───────────────┐
//! │  Embedding    │  n_vocab → n_vocab (row = next-token logits)
//! └───────────────┘
//!       │
//!       ▼
//! Logits [n, n_vocab]  (kept only for entries that request them)
//! ```

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::Embedding;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::context::{ModelContext, Vocabulary};
use super::vocab::SimpleVocab;
use crate::core::{Batch, KvCache, SequenceId};
use crate::error::{Error, Result};

/// Smallest probability kept when converting probabilities to logits.
const MIN_PROB: f32 = 1e-9;

/// Bigram model with a position-addressed KV cache.
#[derive(Debug, Clone)]
pub struct BigramModel {
    /// Vocabulary.
    vocab: SimpleVocab,
    /// Logits table `[n_vocab, n_vocab]`.
    table: Embedding,
    /// Cache index.
    cache: KvCache,
    /// Logits of the last evaluated batch, by batch index.
    logits: Vec<Option<Tensor>>,
    /// Number of successful `evaluate` calls.
    num_evaluations: usize,
    /// Number of tokens evaluated.
    num_tokens_evaluated: usize,
    /// Number of `evaluate` calls, failed ones included.
    num_attempts: usize,
    /// Zero-based `evaluate` call that fails.
    fail_at: Option<usize>,
    /// Device.
    device: Device,
}

impl BigramModel {
    /// Create a model from a `[n_vocab, n_vocab]` logits table.
    ///
    /// # Arguments
    ///
    /// * `vocab` - Vocabulary; its size must match the table
    /// * `logits` - Row `i` holds the logits of the token following `i`
    /// * `capacity` - Number of cache positions
    pub fn new(vocab: SimpleVocab, logits: Tensor, capacity: usize) -> Result<Self> {
        let n_vocab = vocab.n_vocab();
        if logits.dims() != [n_vocab, n_vocab] {
            return Err(Error::Config(format!(
                "logits table must be [{n_vocab}, {n_vocab}], got {:?}",
                logits.dims()
            )));
        }

        let device = logits.device().clone();
        let logits = logits.to_dtype(DType::F32)?;

        Ok(Self {
            vocab,
            table: Embedding::new(logits, n_vocab),
            cache: KvCache::new(capacity),
            logits: Vec::new(),
            num_evaluations: 0,
            num_tokens_evaluated: 0,
            num_attempts: 0,
            fail_at: None,
            device,
        })
    }

    /// Create a model from next-token probabilities, one row per token.
    ///
    /// Zero probabilities are clamped so the logits stay finite.
    pub fn from_probs(
        vocab: SimpleVocab,
        probs: &[Vec<f32>],
        capacity: usize,
        device: &Device,
    ) -> Result<Self> {
        let n_vocab = vocab.n_vocab();
        if probs.len() != n_vocab || probs.iter().any(|row| row.len() != n_vocab) {
            return Err(Error::Config(format!(
                "probability table must be {n_vocab} rows of {n_vocab}"
            )));
        }

        let values: Vec<f32> = probs
            .iter()
            .flatten()
            .map(|&p| p.max(MIN_PROB).ln())
            .collect();
        let logits = Tensor::from_vec(values, (n_vocab, n_vocab), device)?;
        Self::new(vocab, logits, capacity)
    }

    /// Create a seeded random model.
    ///
    /// Every row gets one preferred successor whose logit is raised by
    /// `sharpness`; larger values make the model more confident.
    pub fn random(
        vocab: SimpleVocab,
        capacity: usize,
        sharpness: f32,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        let n_vocab = vocab.n_vocab();
        let mut rng = StdRng::seed_from_u64(seed);

        let mut values = Vec::with_capacity(n_vocab * n_vocab);
        for _ in 0..n_vocab {
            let preferred = rng.gen_range(0..n_vocab);
            for col in 0..n_vocab {
                let base: f32 = rng.gen();
                values.push(if col == preferred { base + sharpness } else { base });
            }
        }

        let logits = Tensor::from_vec(values, (n_vocab, n_vocab), device)?;
        Self::new(vocab, logits, capacity)
    }

    /// Copy of this model with uniform noise in `[-scale, scale)` added to
    /// every logit and a fresh, empty cache of `capacity` positions.
    pub fn perturbed(&self, scale: f32, capacity: usize, seed: u64) -> Result<Self> {
        if scale.is_nan() || scale <= 0.0 {
            return Err(Error::Config(format!("noise scale must be positive, got {scale}")));
        }

        let n_vocab = self.vocab.n_vocab();
        let mut rng = StdRng::seed_from_u64(seed);

        let noise: Vec<f32> = (0..n_vocab * n_vocab)
            .map(|_| rng.gen_range(-scale..scale))
            .collect();
        let noise = Tensor::from_vec(noise, (n_vocab, n_vocab), &self.device)?;
        let logits = self.table.embeddings().add(&noise)?;
        Self::new(self.vocab.clone(), logits, capacity)
    }

    /// Make the `attempt`-th (zero-based) call to `evaluate` fail.
    pub fn with_evaluate_failure_at(mut self, attempt: usize) -> Self {
        self.fail_at = Some(attempt);
        self
    }

    /// The concrete vocabulary.
    pub fn simple_vocab(&self) -> &SimpleVocab {
        &self.vocab
    }

    /// The cache index.
    pub fn cache(&self) -> &KvCache {
        &self.cache
    }

    /// Number of successful `evaluate` calls.
    pub fn num_evaluations(&self) -> usize {
        self.num_evaluations
    }

    /// Number of tokens evaluated across all calls.
    pub fn num_tokens_evaluated(&self) -> usize {
        self.num_tokens_evaluated
    }

    /// Get the device.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

impl ModelContext for BigramModel {
    fn vocab(&self) -> &dyn Vocabulary {
        &self.vocab
    }

    fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    fn evaluate(&mut self, batch: &Batch) -> Result<()> {
        let attempt = self.num_attempts;
        self.num_attempts += 1;
        if self.fail_at == Some(attempt) {
            return Err(Error::Evaluation(format!(
                "injected failure on evaluation {attempt}"
            )));
        }
        if batch.is_empty() {
            return Err(Error::Evaluation("cannot evaluate an empty batch".into()));
        }

        let n_vocab = self.vocab.n_vocab();
        if let Some(entry) = batch.iter().find(|e| e.token as usize >= n_vocab) {
            return Err(Error::Evaluation(format!(
                "token {} out of vocabulary (n_vocab = {n_vocab})",
                entry.token
            )));
        }

        self.logits.clear();
        for entry in batch {
            for &seq in &entry.seq_ids {
                self.cache
                    .insert(seq, entry.pos, entry.token)
                    .map_err(|e| {
                        Error::Evaluation(format!("position {}: {e}", entry.pos))
                    })?;
            }
        }

        let ids = Tensor::new(batch.tokens().as_slice(), &self.device)?;
        let rows = self.table.forward(&ids)?;
        self.logits = batch
            .iter()
            .enumerate()
            .map(|(i, entry)| entry.logits.then(|| rows.get(i)).transpose())
            .collect::<candle_core::Result<_>>()?;

        self.num_evaluations += 1;
        self.num_tokens_evaluated += batch.len();
        Ok(())
    }

    fn logits(&self, index: usize) -> Result<Tensor> {
        self.logits
            .get(index)
            .and_then(|logits| logits.clone())
            .ok_or(Error::MissingLogits(index))
    }

    fn cache_clear(&mut self) {
        self.cache.clear();
    }

    fn cache_remove(&mut self, seq: SequenceId, from: usize, to: Option<usize>) {
        self.cache.remove(seq, from, to);
    }

    fn cache_shift(&mut self, seq: SequenceId, from: usize, to: Option<usize>, delta: isize) {
        self.cache.shift(seq, from, to, delta);
    }

    fn cache_len(&self, seq: SequenceId) -> usize {
        self.cache.len(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_model(n_vocab: usize, capacity: usize) -> BigramModel {
        let probs = vec![vec![1.0 / n_vocab as f32; n_vocab]; n_vocab];
        BigramModel::from_probs(SimpleVocab::synthetic(n_vocab), &probs, capacity, &Device::Cpu)
            .unwrap()
    }

    #[test]
    fn test_rejects_mismatched_table() {
        let logits = Tensor::zeros((4, 3), DType::F32, &Device::Cpu).unwrap();
        let result = BigramModel::new(SimpleVocab::synthetic(4), logits, 8);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_evaluate_caches_and_keeps_requested_logits() {
        let mut model = uniform_model(8, 16);
        let mut batch = Batch::new();
        batch.add(5, 0, &[0], false);
        batch.add(6, 1, &[0], true);

        model.evaluate(&batch).unwrap();

        assert_eq!(model.cache().tokens(0), vec![5, 6]);
        assert!(matches!(model.logits(0), Err(Error::MissingLogits(0))));
        assert_eq!(model.logits(1).unwrap().dims(), &[8]);
        assert_eq!(model.num_tokens_evaluated(), 2);
    }

    #[test]
    fn test_cache_full_is_evaluation_failure() {
        let mut model = uniform_model(8, 1);
        let mut batch = Batch::new();
        batch.add(5, 0, &[0], false);
        batch.add(6, 1, &[0], true);

        assert!(matches!(model.evaluate(&batch), Err(Error::Evaluation(_))));
    }

    #[test]
    fn test_injected_failure() {
        let mut model = uniform_model(8, 16).with_evaluate_failure_at(1);
        let mut batch = Batch::new();
        batch.add(5, 0, &[0], true);

        assert!(model.evaluate(&batch).is_ok());
        assert!(matches!(model.evaluate(&batch), Err(Error::Evaluation(_))));
        assert!(model.evaluate(&batch).is_ok());
        assert_eq!(model.num_evaluations(), 2);
    }

    #[test]
    fn test_random_is_reproducible() {
        let vocab = SimpleVocab::synthetic(16);
        let a = BigramModel::random(vocab.clone(), 8, 4.0, 7, &Device::Cpu).unwrap();
        let b = BigramModel::random(vocab, 8, 4.0, 7, &Device::Cpu).unwrap();

        let a: Vec<Vec<f32>> = a.table.embeddings().to_vec2().unwrap();
        let b: Vec<Vec<f32>> = b.table.embeddings().to_vec2().unwrap();
        assert_eq!(a, b);
    }
}
