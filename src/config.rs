//! Configuration types for nano-speculative.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Draft sampler configuration.
///
/// The draft sampler only ranks candidates; it never draws randomly, so
/// there is no seed here. Defaults favour a narrow, confident candidate set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Temperature applied to logits before softmax (1.0 = no change).
    pub temperature: f32,
    /// Top-k filtering (0 = disabled).
    pub top_k: usize,
    /// Top-p (nucleus) filtering (1.0 = disabled).
    pub top_p: f32,
    /// Repetition penalty for recently accepted tokens (1.0 = disabled).
    pub repeat_penalty: f32,
    /// How many accepted tokens the penalty looks back over.
    pub penalty_last_n: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_k: 40,
            top_p: 0.9,
            repeat_penalty: 1.0,
            penalty_last_n: 64,
        }
    }
}

impl SamplingConfig {
    /// Check that every field is in range.
    pub fn validate(&self) -> Result<()> {
        if self.temperature.is_nan() || self.temperature <= 0.0 {
            return Err(Error::Config(format!(
                "temperature must be positive, got {}",
                self.temperature
            )));
        }
        if self.top_p.is_nan() || self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(Error::Config(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if self.repeat_penalty.is_nan() || self.repeat_penalty <= 0.0 {
            return Err(Error::Config(format!(
                "repeat_penalty must be positive, got {}",
                self.repeat_penalty
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sampling_config_is_valid() {
        let config = SamplingConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.top_k, 40);
    }

    #[test]
    fn test_rejects_bad_top_p() {
        let config = SamplingConfig {
            top_p: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
