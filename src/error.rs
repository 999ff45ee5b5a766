//! Error types for nano-speculative.

use thiserror::Error;

/// Result type alias for nano-speculative operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for nano-speculative.
#[derive(Error, Debug)]
pub enum Error {
    /// Draft and target models cannot be speculated together.
    ///
    /// Fatal for the session: the caller should disable speculation
    /// for this pairing.
    #[error("incompatible draft/target models: {reason}")]
    IncompatibleModels { reason: String },

    /// A forward evaluation on the model backend failed.
    ///
    /// The draft cache is only valid up to the last successful evaluation.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The KV cache has no free slots left.
    #[error("out of KV cache slots")]
    CacheFull,

    /// Requested logits row was not produced by the last evaluation.
    #[error("no logits for batch index {0}")]
    MissingLogits(usize),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error should disable speculation for the whole session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::IncompatibleModels { .. } | Self::Evaluation(_))
    }
}
