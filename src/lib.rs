//! nano-speculative: draft-model speculative decoding in Rust.
//!
//! This crate implements the draft side of speculative decoding:
//! - Draft/target vocabulary compatibility checking
//! - Prefix-reusing reconciliation of the draft KV cache
//! - Confidence-gated drafting into the target model's batch
//! - An arena-indexed KV cache with position remove/shift

pub mod config;
pub mod error;

pub mod core;
pub mod engine;
pub mod model;
pub mod speculative;

pub use config::SamplingConfig;
pub use crate::core::{Batch, BatchEntry, KvCache, SequenceId, TokenId};
pub use engine::{Sampler, TokenProb, TokenSampler};
pub use error::{Error, Result};
pub use model::{BigramModel, ModelContext, SimpleVocab, VocabType, Vocabulary};
pub use speculative::{
    DraftOutcome, DraftStop, Reconciliation, SpeculativeConfig, SpeculativeDecoder,
    SpeculativeStats,
};
