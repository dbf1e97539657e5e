//! Error types for the semantic search system.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for semantic search operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Maximum number of characters of the offending input echoed back in an
/// [`EmbeddingError::EmbeddingFailed`] error.
pub const MAX_ECHOED_INPUT_CHARS: usize = 100;

/// Coarse classification of an [`EmbeddingError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelNotLoaded,
    InvalidInput,
    EmbeddingFailed,
    ComputationFailed,
    DimensionMismatch,
}

/// Errors that can occur while embedding text or searching vectors.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// The embedding provider has not finished initializing.
    #[error("embedding model not loaded for provider `{provider}`")]
    ModelNotLoaded { provider: String },

    /// Malformed or empty arguments.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The underlying inference call failed.
    #[error("embedding failed for input {input:?}: {cause}")]
    EmbeddingFailed { input: String, cause: String },

    /// A mathematically undefined operation was attempted.
    #[error("computation failed: {0}")]
    ComputationFailed(String),

    /// Two vectors had unequal length.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Snapshot (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EmbeddingError {
    /// Build an [`EmbeddingError::EmbeddingFailed`], truncating the echoed
    /// input to [`MAX_ECHOED_INPUT_CHARS`] characters.
    pub fn embedding_failed(input: &str, cause: impl std::fmt::Display) -> Self {
        Self::EmbeddingFailed {
            input: truncate_chars(input, MAX_ECHOED_INPUT_CHARS),
            cause: cause.to_string(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// The kind tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModelNotLoaded { .. } => ErrorKind::ModelNotLoaded,
            Self::InvalidInput(_) | Self::Serialization(_) => ErrorKind::InvalidInput,
            Self::EmbeddingFailed { .. } => ErrorKind::EmbeddingFailed,
            Self::ComputationFailed(_) => ErrorKind::ComputationFailed,
            Self::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
