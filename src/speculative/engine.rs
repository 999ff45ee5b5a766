//! Speculative decoding engine.
//!
//! Drives a draft model so that each target-model step can verify several
//! tokens at once instead of one.
//!
//! ## Workflow
//!
//! Once per target decoding step the caller hands over the full target prompt
//! and the last committed token:
//!
//! 1. **Reconcile**: Find the longest run of the target prompt that is already
//!    in the draft cache, cut the cache down to that run, shift it to position
//!    0, and evaluate only the tokens that are missing.
//! 2. **Draft**: Rank candidates with the draft sampler; push the top token
//!    into the caller's target batch while it is confident enough and the
//!    batch has room, feeding each accepted draft back into the draft model.
//! 3. **Floor**: If too few tokens were drafted, collapse the target batch to
//!    a single entry.
//!
//! ## Example
//!
//! ```text
//! Draft cache:   [The, quick, brown, fox, jumps]          (from last step)
//! Target prompt: [The, quick, brown, fox, runs]           + last = "fast"
//! Reconcile:     keep [The, quick, brown, fox], evaluate [runs, fast]
//! Draft:         "and" (0.97), "then" (0.93), "he" (0.41) -> stop
//! Target batch:  [fast, and, then]
//! ```
//!
//! The draft cache is mirrored by the shadow prompt: the tokens resident at
//! positions `[0, len)` of sequence 0. Both change only inside this module.

use tracing::debug;

use super::config::SpeculativeConfig;
use super::compat;
use crate::config::SamplingConfig;
use crate::core::{Batch, SequenceId, TokenId};
use crate::engine::{Sampler, TokenSampler};
use crate::error::{Error, Result};
use crate::model::ModelContext;

/// Sequence used in both the draft cache and the target batch.
const SEQ: SequenceId = 0;

/// Number of ranked candidates logged per draft round.
const LOGGED_CANDIDATES: usize = 3;

/// Why the drafting loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DraftStop {
    /// The top candidate was below `p_min`; it was not emitted.
    LowConfidence,
    /// The target batch grew past `n_draft` entries.
    Capacity,
    /// All `n_draft` rounds ran.
    Exhausted,
}

impl DraftStop {
    /// Get the stop reason as a static string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowConfidence => "low_confidence",
            Self::Capacity => "capacity",
            Self::Exhausted => "exhausted",
        }
    }
}

/// Result of reconciling the draft cache with a target prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// Offset in the previous shadow prompt where the reused run started.
    pub reuse_i: usize,
    /// Length of the reused run (0 = cache was cleared).
    pub reuse_n: usize,
    /// Draft position of the last committed token.
    pub n_past: usize,
    /// Number of prompt tokens that had to be evaluated.
    pub n_evaluated: usize,
}

/// Result of one [`SpeculativeDecoder::add_draft`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DraftOutcome {
    /// How the draft cache was reconciled.
    pub reconciliation: Reconciliation,
    /// Tokens pushed into the target batch by the drafting loop.
    pub drafted: usize,
    /// Drafted tokens still in the target batch after the floor collapse.
    pub exposed: usize,
    /// Why drafting stopped.
    pub stop: DraftStop,
    /// Whether the target batch was collapsed to one entry.
    pub collapsed: bool,
}

/// Running totals over the life of a decoder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeculativeStats {
    /// Number of `add_draft` calls that completed.
    pub calls: usize,
    /// Prompt tokens served from the draft cache.
    pub reused_tokens: usize,
    /// Prompt tokens evaluated by the draft model.
    pub evaluated_tokens: usize,
    /// Tokens drafted.
    pub drafted_tokens: usize,
    /// Tokens exposed to the caller.
    pub exposed_tokens: usize,
    /// Calls whose target batch was collapsed.
    pub collapses: usize,
    /// Full cache clears forced by a failed evaluation.
    pub forced_clears: usize,
}

/// Speculative decoder for one draft/target pairing.
///
/// Owns the draft context, its sampler, and the shadow prompt. Not reentrant:
/// every mutating call takes `&mut self`.
pub struct SpeculativeDecoder<C: ModelContext, S: TokenSampler = Sampler> {
    /// Configuration.
    config: SpeculativeConfig,
    /// Draft model context.
    ctx: C,
    /// Draft candidate ranker.
    sampler: S,
    /// Scratch batch for the draft model.
    batch: Batch,
    /// Tokens resident in the draft cache, by position.
    prompt: Vec<TokenId>,
    /// Set when an evaluation failed; forces a full clear on next use.
    cache_suspect: bool,
    /// Running totals.
    stats: SpeculativeStats,
}

impl<C: ModelContext> SpeculativeDecoder<C, Sampler> {
    /// Create a decoder with the default draft sampler (top-k 40, top-p 0.9).
    pub fn with_default_sampler<T>(target: &T, draft: C, config: SpeculativeConfig) -> Result<Self>
    where
        T: ModelContext + ?Sized,
    {
        Self::new(target, draft, Sampler::new(&SamplingConfig::default())?, config)
    }
}

impl<C: ModelContext, S: TokenSampler> SpeculativeDecoder<C, S> {
    /// Create a speculative decoder.
    ///
    /// # Arguments
    ///
    /// * `target` - Target context; only its vocabulary is inspected
    /// * `draft` - Draft context, owned by the decoder from now on
    /// * `sampler` - Draft candidate ranker
    /// * `config` - Speculative decoding configuration
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for invalid parameters or a draft cache too small
    /// to hold `n_draft` tokens, [`Error::IncompatibleModels`] if the draft
    /// cannot speculate for the target.
    pub fn new<T>(target: &T, draft: C, sampler: S, config: SpeculativeConfig) -> Result<Self>
    where
        T: ModelContext + ?Sized,
    {
        config.validate()?;
        if draft.capacity() <= config.n_draft {
            return Err(Error::Config(format!(
                "draft capacity {} must exceed n_draft {}",
                draft.capacity(),
                config.n_draft
            )));
        }
        compat::verify_contexts(target, &draft)?;

        Ok(Self {
            batch: Batch::with_capacity(config.n_draft.max(1)),
            config,
            ctx: draft,
            sampler,
            prompt: Vec::new(),
            cache_suspect: false,
            stats: SpeculativeStats::default(),
        })
    }

    /// Draft tokens for one target decoding step.
    ///
    /// Reconciles the draft cache with `prompt_tgt` + `id_last`, then appends
    /// up to `n_draft` draft tokens to `batch_tgt` at positions starting from
    /// `n_past_tgt`. The caller usually seeds `batch_tgt` with `id_last`
    /// itself; a floor collapse keeps only that first entry.
    ///
    /// The floor compares only the tokens drafted by this call against
    /// `n_min`; entries the caller put in `batch_tgt` beforehand do not count.
    /// With a one-token seed, a call drafting `n_min - 1` tokens collapses
    /// even though the batch then holds `n_min` entries.
    ///
    /// # Errors
    ///
    /// Any draft evaluation failure aborts the call. `batch_tgt` may already
    /// hold some draft tokens; the draft cache is cleared on the next call.
    pub fn add_draft(
        &mut self,
        batch_tgt: &mut Batch,
        prompt_tgt: &[TokenId],
        id_last: TokenId,
        n_past_tgt: usize,
    ) -> Result<DraftOutcome> {
        self.recover_if_suspect();

        let reconciliation = self.guarded(|s| s.reconcile_cache(prompt_tgt, id_last))?;
        let outcome =
            self.guarded(|s| s.generate(batch_tgt, reconciliation, n_past_tgt))?;

        self.stats.calls += 1;
        self.stats.drafted_tokens += outcome.drafted;
        self.stats.exposed_tokens += outcome.exposed;
        if outcome.collapsed {
            self.stats.collapses += 1;
        }

        Ok(outcome)
    }

    /// Reconcile the draft cache with a target prompt without drafting.
    ///
    /// Leaves the draft context holding logits for `id_last`.
    pub fn reconcile(&mut self, prompt_tgt: &[TokenId], id_last: TokenId) -> Result<Reconciliation> {
        self.recover_if_suspect();
        self.guarded(|s| s.reconcile_cache(prompt_tgt, id_last))
    }

    fn reconcile_cache(&mut self, prompt_tgt: &[TokenId], id_last: TokenId) -> Result<Reconciliation> {
        let n_ctx = self.ctx.capacity().saturating_sub(self.config.n_draft);
        let i_start = prompt_tgt.len().saturating_sub(n_ctx);
        let fits = prompt_tgt.len() <= n_ctx;

        let (reuse_i, reuse_n) =
            find_reusable_run(&self.prompt, &prompt_tgt[i_start..], self.config.n_reuse, fits);
        debug!(reuse_i, reuse_n, i_start, "reconciling draft cache");

        if reuse_n == 0 {
            self.ctx.cache_clear();
            self.prompt.clear();
        } else {
            self.ctx.cache_remove(SEQ, 0, Some(reuse_i));
            self.ctx.cache_remove(SEQ, reuse_i + reuse_n, None);
            self.ctx.cache_shift(SEQ, reuse_i, None, -(reuse_i as isize));

            self.prompt.truncate(reuse_i + reuse_n);
            self.prompt.drain(..reuse_i);
        }
        self.stats.reused_tokens += reuse_n;

        let missing = &prompt_tgt[i_start + reuse_n..];
        self.batch.clear();
        for (k, &token) in missing.iter().enumerate() {
            self.batch.add(token, reuse_n + k, &[SEQ], false);
        }
        if !self.batch.is_empty() {
            self.ctx.evaluate(&self.batch)?;
            self.prompt.extend_from_slice(missing);
            self.stats.evaluated_tokens += missing.len();
        }

        let n_past = prompt_tgt.len() - i_start;
        debug!(n_past, "evaluating last committed token");

        self.batch.clear();
        self.batch.add(id_last, n_past, &[SEQ], true);
        self.ctx.evaluate(&self.batch)?;
        self.prompt.push(id_last);
        debug_assert_eq!(self.ctx.cache_len(SEQ), self.prompt.len());

        Ok(Reconciliation {
            reuse_i,
            reuse_n,
            n_past,
            n_evaluated: missing.len(),
        })
    }

    fn generate(
        &mut self,
        batch_tgt: &mut Batch,
        reconciliation: Reconciliation,
        n_past_tgt: usize,
    ) -> Result<DraftOutcome> {
        let n_draft = self.config.n_draft;
        let n_past = reconciliation.n_past;
        let seed_len = batch_tgt.len();

        self.sampler.reset();

        let mut drafted = 0;
        let stop = loop {
            let i = drafted;

            // Every draft batch here holds one token, so its logits sit at index 0
            let candidates = self.sampler.sample(&self.ctx, 0)?;
            for (k, c) in candidates.iter().take(LOGGED_CANDIDATES).enumerate() {
                debug!(rank = k, pos = i, id = c.id, p = c.p, "draft candidate");
            }

            let top = match candidates.first() {
                Some(top) if top.p >= self.config.p_min => *top,
                _ => break DraftStop::LowConfidence,
            };

            self.sampler.accept(top.id, true);
            batch_tgt.add(top.id, n_past_tgt + i, &[SEQ], true);
            drafted += 1;

            if batch_tgt.len() > n_draft {
                break DraftStop::Capacity;
            }
            // Nothing samples the last draft's logits, and id_last already
            // took one of the n_draft reserved cache slots
            if drafted == n_draft {
                break DraftStop::Exhausted;
            }

            self.batch.clear();
            self.batch.add(top.id, n_past + i + 1, &[SEQ], true);
            self.ctx.evaluate(&self.batch)?;
            self.prompt.push(top.id);
            debug_assert_eq!(self.ctx.cache_len(SEQ), self.prompt.len());
        };

        // Applied the same way whichever condition ended the loop
        let collapsed = drafted < self.config.n_min && batch_tgt.len() > 1;
        if collapsed {
            batch_tgt.truncate(1);
        }
        let exposed = batch_tgt.len().saturating_sub(seed_len).min(drafted);

        debug!(
            drafted,
            exposed,
            stop = stop.as_str(),
            collapsed,
            "drafting finished"
        );

        Ok(DraftOutcome {
            reconciliation,
            drafted,
            exposed,
            stop,
            collapsed,
        })
    }

    /// Run `f`, marking the draft cache suspect if it fails.
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = f(self);
        if result.is_err() {
            self.cache_suspect = true;
        }
        result
    }

    fn recover_if_suspect(&mut self) {
        if self.cache_suspect {
            debug!("draft cache suspect after failed evaluation, clearing");
            self.ctx.cache_clear();
            self.prompt.clear();
            self.cache_suspect = false;
            self.stats.forced_clears += 1;
        }
    }

    /// Drop the draft cache and the shadow prompt.
    pub fn clear(&mut self) {
        self.ctx.cache_clear();
        self.prompt.clear();
        self.cache_suspect = false;
    }

    /// Tokens resident in the draft cache, by position.
    pub fn shadow_prompt(&self) -> &[TokenId] {
        &self.prompt
    }

    /// Whether the next call will start from an empty draft cache.
    pub fn is_cache_suspect(&self) -> bool {
        self.cache_suspect
    }

    /// Get the speculative configuration.
    pub fn config(&self) -> &SpeculativeConfig {
        &self.config
    }

    /// Running totals.
    pub fn stats(&self) -> &SpeculativeStats {
        &self.stats
    }

    /// Get reference to the draft context.
    pub fn draft_context(&self) -> &C {
        &self.ctx
    }

    /// Get reference to the draft sampler.
    pub fn sampler(&self) -> &S {
        &self.sampler
    }

    /// Tear the decoder down, returning the draft context and sampler.
    pub fn into_parts(self) -> (C, S) {
        (self.ctx, self.sampler)
    }
}

/// Longest run of `shadow` (starting anywhere) that matches the head of
/// `window`, as `(offset, length)`.
///
/// A run counts only if it is longer than `n_reuse`, unless the whole target
/// prompt fits (`fits`). Ties keep the earliest offset.
fn find_reusable_run(
    shadow: &[TokenId],
    window: &[TokenId],
    n_reuse: usize,
    fits: bool,
) -> (usize, usize) {
    let mut best = (0, 0);
    for i in 0..shadow.len() {
        let cur = shadow[i..]
            .iter()
            .zip(window)
            .take_while(|(a, b)| a == b)
            .count();

        if (cur > n_reuse || fits) && cur > best.1 {
            best = (i, cur);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_prefix_match() {
        assert_eq!(find_reusable_run(&[1, 2, 3, 4, 5], &[1, 2, 3, 4, 5, 6], 2, true), (0, 5));
    }

    #[test]
    fn test_match_at_offset() {
        // Target window lost its first two tokens to truncation
        let shadow = [7, 8, 1, 2, 3, 4];
        assert_eq!(find_reusable_run(&shadow, &[1, 2, 3, 4, 9], 2, false), (2, 4));
    }

    #[test]
    fn test_short_run_ignored_when_truncating() {
        let shadow = [7, 1, 2];
        assert_eq!(find_reusable_run(&shadow, &[1, 2, 3], 2, false), (0, 0));
        assert_eq!(find_reusable_run(&shadow, &[1, 2, 3], 1, false), (1, 2));
        assert_eq!(find_reusable_run(&shadow, &[1, 2, 3], 2, true), (1, 2));
    }

    #[test]
    fn test_ties_keep_earliest() {
        let shadow = [1, 2, 9, 1, 2, 9];
        assert_eq!(find_reusable_run(&shadow, &[1, 2, 3], 0, true), (0, 2));
    }

    #[test]
    fn test_no_overlap() {
        assert_eq!(find_reusable_run(&[9, 9, 9], &[1, 2, 3], 1, true), (0, 0));
        assert_eq!(find_reusable_run(&[], &[1, 2, 3], 0, true), (0, 0));
    }

    #[test]
    fn test_stop_names() {
        assert_eq!(DraftStop::LowConfidence.as_str(), "low_confidence");
        assert_eq!(DraftStop::Capacity.as_str(), "capacity");
    }
}
