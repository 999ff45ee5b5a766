//! Speculative decoding configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for speculative decoding.
///
/// Fixed for the lifetime of a [`super::SpeculativeDecoder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeculativeConfig {
    /// Maximum number of draft tokens per call.
    /// Also reserved in the draft cache, so the usable prompt window is
    /// `capacity - n_draft`.
    pub n_draft: usize,

    /// Minimum overlap (exclusive) between the draft cache and a truncated
    /// target prompt before the cache is reused instead of recomputed.
    pub n_reuse: usize,

    /// Drafts shorter than this are not worth a multi-token verification;
    /// the target batch is collapsed back to one entry.
    pub n_min: usize,

    /// Confidence floor: drafting stops at the first top candidate whose
    /// probability is below this.
    pub p_min: f32,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            n_draft: 16,
            n_reuse: 256,
            n_min: 5,
            p_min: 0.9,
        }
    }
}

impl SpeculativeConfig {
    /// Create a config drafting up to `n_draft` tokens per call.
    pub fn new(n_draft: usize) -> Self {
        Self {
            n_draft,
            ..Default::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the number of draft tokens.
    pub fn n_draft(mut self, n_draft: usize) -> Self {
        self.n_draft = n_draft;
        self
    }

    /// Set the reuse threshold.
    pub fn n_reuse(mut self, n_reuse: usize) -> Self {
        self.n_reuse = n_reuse;
        self
    }

    /// Set the minimum draft length.
    pub fn n_min(mut self, n_min: usize) -> Self {
        self.n_min = n_min;
        self
    }

    /// Set the confidence floor.
    pub fn p_min(mut self, p_min: f32) -> Self {
        self.p_min = p_min;
        self
    }

    /// Check that every field is in range.
    pub fn validate(&self) -> Result<()> {
        if self.n_draft == 0 {
            return Err(Error::Config("n_draft must be greater than 0".into()));
        }
        if !(0.0..=1.0).contains(&self.p_min) {
            return Err(Error::Config(format!(
                "p_min must be in [0, 1], got {}",
                self.p_min
            )));
        }
        Ok(())
    }
}
