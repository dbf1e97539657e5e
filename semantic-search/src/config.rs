//! Configuration for similarity search and embedding providers.

use serde::{Deserialize, Serialize};

use crate::error::{EmbeddingError, Result};
use crate::similarity::DEFAULT_TOP_K;

/// Default number of texts sent to a provider per batch chunk.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default search configuration stored on a [`crate::SimilarityIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Maximum number of results to return.
    pub top_k: usize,

    /// Results scoring below this are dropped.
    pub threshold: f32,

    /// Chunk size used when embedding items for indexing.
    pub batch_size: usize,
}

impl IndexConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            threshold: 0.0,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set the maximum number of results.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the minimum score.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the batch chunk size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Check that every field holds a usable value.
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(EmbeddingError::invalid_input("top_k must be positive"));
        }
        if self.batch_size == 0 {
            return Err(EmbeddingError::invalid_input("batch_size must be positive"));
        }
        if !self.threshold.is_finite() {
            return Err(EmbeddingError::invalid_input(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Apply per-call overrides on top of this configuration.
    ///
    /// Fields set on `overrides` win; the result is validated.
    pub fn merged(&self, overrides: &SearchOverrides) -> Result<Self> {
        let merged = Self {
            top_k: overrides.top_k.unwrap_or(self.top_k),
            threshold: overrides.threshold.unwrap_or(self.threshold),
            batch_size: self.batch_size,
        };
        merged.validate()?;
        Ok(merged)
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-search overrides of the stored [`IndexConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOverrides {
    /// Overrides [`IndexConfig::top_k`].
    pub top_k: Option<usize>,

    /// Overrides [`IndexConfig::threshold`].
    pub threshold: Option<f32>,
}

impl SearchOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }
}

/// Configuration for the OpenAI-compatible HTTP provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// API base URL.
    pub base_url: String,

    /// Embedding model name.
    pub model: String,

    /// API key. Falls back to `OPENAI_API_KEY` when unset.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Requested output dimensions (if supported by the model).
    pub dimensions: Option<usize>,
}

impl OpenAIConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.openai.com/v1";
    pub const DEFAULT_MODEL: &'static str = "text-embedding-3-small";

    /// Create a config from defaults and the environment.
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            ..Self::default()
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output dimensions.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            api_key: None,
            dimensions: None,
        }
    }
}

/// Configuration for the in-memory embedding cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached embeddings.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
        }
    }
}
