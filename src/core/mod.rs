//! Core infrastructure for nano-speculative.
//!
//! This module contains the fundamental building blocks:
//! - Batch for submitting tokens to a model context
//! - KvCache for position-addressed cache bookkeeping

pub mod batch;
pub mod kv_cache;

pub use batch::{Batch, BatchEntry};
pub use kv_cache::KvCache;

/// Token id in a model vocabulary.
pub type TokenId = u32;

/// Identifier of a sequence inside a model context.
pub type SequenceId = u64;
