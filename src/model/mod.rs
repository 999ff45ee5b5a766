//! Model contexts.
//!
//! This module provides:
//! - ModelContext / Vocabulary traits the speculative decoder drives
//! - SimpleVocab, an in-memory vocabulary
//! - BigramModel, a lookup-table model with a position-addressed cache

pub mod bigram;
pub mod context;
pub mod vocab;

pub use bigram::BigramModel;
pub use context::{ModelContext, VocabType, Vocabulary};
pub use vocab::SimpleVocab;
