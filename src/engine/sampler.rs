//! Candidate ranking for the draft model.
//!
//! The draft side never draws tokens at random: it ranks the candidates and
//! the speculative decoder takes rank 0 if it is confident enough. Ranking
//! applies, in order:
//!
//! - **Repetition penalty**: Damp logits of recently accepted tokens
//! - **Temperature**: Scale logits
//! - **Top-k**: Keep the k highest logits
//! - **Top-p (nucleus)**: Keep tokens covering p probability mass
//!
//! ## Ranking Pipeline
//!
//! ```text
//! Logits [vocab_size]
//!     │
//!     ▼ Repetition penalty (accepted history)
//!     │
//!     ▼ Temperature scaling
//! Logits / temperature
//!     │
//!     ▼ Top-k filtering (optional)
//! Keep top k tokens
//!     │
//!     ▼ Softmax
//! Probabilities
//!     │
//!     ▼ Top-p filtering (optional)
//! Cumulative prob ≤ p
//!     │
//!     ▼ Renormalize
//! Ranked candidates, descending
//! ```

use std::collections::VecDeque;

use candle_core::{DType, Tensor, D};

use crate::config::SamplingConfig;
use crate::core::TokenId;
use crate::error::Result;
use crate::model::ModelContext;

/// A ranked candidate token.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenProb {
    /// Token id.
    pub id: TokenId,
    /// Probability after filtering and renormalization.
    pub p: f32,
}

/// Ranks candidate tokens from a model context's logits.
pub trait TokenSampler {
    /// Forget the acceptance history.
    fn reset(&mut self);

    /// Rank candidates for entry `index` of the context's last batch,
    /// most probable first.
    fn sample(&mut self, ctx: &dyn ModelContext, index: usize) -> Result<Vec<TokenProb>>;

    /// Record `token` as accepted. With `apply_penalty`, the token enters the
    /// repetition-penalty window and shapes later rankings.
    fn accept(&mut self, token: TokenId, apply_penalty: bool);
}

/// Deterministic top-k / top-p ranker with a repetition penalty.
#[derive(Debug, Clone)]
pub struct Sampler {
    /// Temperature for scaling logits.
    temperature: f32,
    /// Top-k value (0 = disabled).
    top_k: usize,
    /// Top-p value (1.0 = disabled).
    top_p: f32,
    /// Repetition penalty (1.0 = disabled).
    repeat_penalty: f32,
    /// Penalty window length.
    penalty_last_n: usize,
    /// Recently accepted tokens, oldest first.
    history: VecDeque<TokenId>,
    /// Candidates from the last `sample` call.
    candidates: Vec<TokenProb>,
}

impl Sampler {
    /// Creates a new sampler with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::error::Error::Config) if the
    /// configuration fails [`SamplingConfig::validate`].
    pub fn new(config: &SamplingConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            temperature: config.temperature,
            top_k: config.top_k,
            top_p: config.top_p,
            repeat_penalty: config.repeat_penalty,
            penalty_last_n: config.penalty_last_n,
            history: VecDeque::with_capacity(config.penalty_last_n),
            candidates: Vec::new(),
        })
    }

    /// Rank candidates from raw logits `[vocab_size]` (or `[1, vocab_size]`).
    pub fn rank(&self, logits: &Tensor) -> Result<Vec<TokenProb>> {
        let device = logits.device();
        let mut values: Vec<f32> = logits.flatten_all()?.to_dtype(DType::F32)?.to_vec1()?;
        if values.is_empty() {
            return Ok(Vec::new());
        }

        self.apply_penalty(&mut values);
        if self.temperature != 1.0 {
            values.iter_mut().for_each(|v| *v /= self.temperature);
        }

        // Stable sort keeps lower ids first among equal logits
        let mut indexed: Vec<(TokenId, f32)> = values
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i as TokenId, v))
            .collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        if self.top_k > 0 && self.top_k < indexed.len() {
            indexed.truncate(self.top_k);
        }

        let kept: Vec<f32> = indexed.iter().map(|&(_, v)| v).collect();
        let kept = Tensor::from_vec(kept, indexed.len(), device)?;
        let probs: Vec<f32> = candle_nn::ops::softmax(&kept, D::Minus1)?.to_vec1()?;

        let cutoff = self.top_p_cutoff(&probs);
        let sum: f32 = probs[..cutoff].iter().sum();

        Ok(indexed
            .iter()
            .zip(&probs)
            .take(cutoff)
            .map(|(&(id, _), &p)| TokenProb { id, p: p / sum })
            .collect())
    }

    /// Candidates from the last `sample` call.
    pub fn candidates(&self) -> &[TokenProb] {
        &self.candidates
    }

    /// Tokens currently in the penalty window, oldest first.
    pub fn history(&self) -> impl Iterator<Item = TokenId> + '_ {
        self.history.iter().copied()
    }

    /// Number of leading candidates covering `top_p` of the mass.
    fn top_p_cutoff(&self, probs: &[f32]) -> usize {
        if self.top_p >= 1.0 {
            return probs.len();
        }

        let mut cumulative = 0.0f32;
        for (i, p) in probs.iter().enumerate() {
            cumulative += p;
            if cumulative > self.top_p {
                // Include the token that pushed us over
                return i + 1;
            }
        }
        probs.len()
    }

    fn apply_penalty(&self, logits: &mut [f32]) {
        if self.repeat_penalty == 1.0 {
            return;
        }

        let mut seen = std::collections::HashSet::new();
        for &token in &self.history {
            if !seen.insert(token) {
                continue;
            }
            if let Some(logit) = logits.get_mut(token as usize) {
                *logit = if *logit > 0.0 {
                    *logit / self.repeat_penalty
                } else {
                    *logit * self.repeat_penalty
                };
            }
        }
    }
}

impl TokenSampler for Sampler {
    fn reset(&mut self) {
        self.history.clear();
        self.candidates.clear();
    }

    fn sample(&mut self, ctx: &dyn ModelContext, index: usize) -> Result<Vec<TokenProb>> {
        let logits = ctx.logits(index)?;
        self.candidates = self.rank(&logits)?;
        Ok(self.candidates.clone())
    }

    fn accept(&mut self, token: TokenId, apply_penalty: bool) {
        if !apply_penalty || self.penalty_last_n == 0 {
            return;
        }
        if self.history.len() == self.penalty_last_n {
            self.history.pop_front();
        }
        self.history.push_back(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn plain_config() -> SamplingConfig {
        SamplingConfig {
            temperature: 1.0,
            top_k: 0,
            top_p: 1.0,
            repeat_penalty: 1.0,
            penalty_last_n: 64,
        }
    }

    #[test]
    fn test_rank_is_descending() {
        let sampler = Sampler::new(&plain_config()).unwrap();
        let logits = Tensor::new(&[0.1f32, 0.2, 0.3, 10.0, 0.4], &Device::Cpu).unwrap();

        let ranked = sampler.rank(&logits).unwrap();

        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].id, 3);
        assert!(ranked.windows(2).all(|w| w[0].p >= w[1].p));
        let total: f32 = ranked.iter().map(|c| c.p).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_top_k_renormalizes() {
        let config = SamplingConfig {
            top_k: 2,
            ..plain_config()
        };
        let sampler = Sampler::new(&config).unwrap();
        let logits = Tensor::new(&[0.0f32, 0.0, 0.0, 1.0, 1.0], &Device::Cpu).unwrap();

        let ranked = sampler.rank(&logits).unwrap();

        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, 3);
        assert_eq!(ranked[1].id, 4);
        assert!((ranked[0].p - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_top_p_cuts_tail() {
        let config = SamplingConfig {
            top_p: 0.5,
            ..plain_config()
        };
        let sampler = Sampler::new(&config).unwrap();
        let logits = Tensor::new(&[0.0f32, 0.0, 0.0, 10.0, 0.0], &Device::Cpu).unwrap();

        let ranked = sampler.rank(&logits).unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, 3);
        assert!((ranked[0].p - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_penalty_window_is_bounded() {
        let config = SamplingConfig {
            repeat_penalty: 2.0,
            penalty_last_n: 2,
            ..plain_config()
        };
        let mut sampler = Sampler::new(&config).unwrap();

        sampler.accept(1, true);
        sampler.accept(2, true);
        sampler.accept(3, true);
        sampler.accept(4, false);

        assert_eq!(sampler.history().collect::<Vec<_>>(), vec![2, 3]);

        sampler.reset();
        assert_eq!(sampler.history().count(), 0);
    }

    #[test]
    fn test_penalty_changes_ranking() {
        let config = SamplingConfig {
            repeat_penalty: 4.0,
            ..plain_config()
        };
        let mut sampler = Sampler::new(&config).unwrap();
        let logits = Tensor::new(&[1.0f32, 2.0, 0.5], &Device::Cpu).unwrap();

        assert_eq!(sampler.rank(&logits).unwrap()[0].id, 1);

        sampler.accept(1, true);
        assert_eq!(sampler.rank(&logits).unwrap()[0].id, 0);
    }
}
