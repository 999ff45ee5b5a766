//! Draft-side sampling.
//!
//! This module contains:
//! - TokenSampler, the ranking contract the speculative decoder relies on
//! - Sampler, the default top-k / top-p ranker

pub mod sampler;

pub use sampler::{Sampler, TokenProb, TokenSampler};
