//! Speculative decoding.
//!
//! This module implements draft-model speculative decoding for a single
//! sequence.
//!
//! ## How it works
//!
//! 1. **Compatibility**: At construction the draft vocabulary is checked
//!    against the target's; token ids must mean the same thing in both.
//!
//! 2. **Reconcile**: Each step, the draft KV cache is aligned with the target
//!    prompt, reusing the longest cached run and evaluating only what is new.
//!
//! 3. **Draft**: The draft model proposes up to `n_draft` tokens, stopping at
//!    the first low-confidence candidate. The tokens go into the caller's
//!    target batch for verification in a single target forward pass.
//!
//! ## Example
//!
//! ```text
//! Target prompt:  [p0 .. p99]  last = t
//! Draft cache:    [p0 .. p98, x]         -> keep [p0 .. p98], evaluate [p99, t]
//! Draft (n=4):    d1 (0.98) -> d2 (0.95) -> d3 (0.42) stop
//! Target batch:   [t, d1, d2]
//! ```
//!
//! ## Configuration
//!
//! - `n_draft`: 16 (tokens drafted per step, also reserved in the draft cache)
//! - `n_reuse`: 256 (overlap needed to reuse a truncated prompt)
//! - `n_min`: 5 (shorter drafts collapse to a single target token)
//! - `p_min`: 0.9 (confidence floor)

pub mod compat;
pub mod config;
pub mod engine;

pub use compat::{are_compatible, verify, verify_contexts};
pub use config::SpeculativeConfig;
pub use engine::{DraftOutcome, DraftStop, Reconciliation, SpeculativeDecoder, SpeculativeStats};
