//! # Semantic Search
//!
//! This crate provides vector math, embedding providers and an exact
//! similarity index for the Codex context system.
//!
//! ## Features
//!
//! - **Vector Math**: dot product, cosine similarity, distances, centroids
//! - **Top-k Retrieval**: exact ranking with stable tie-breaks
//! - **Embedding Providers**: in-process models or OpenAI-compatible APIs
//! - **Caching**: reuse embeddings for repeated texts
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Semantic Search                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  items ──► text extractor ──► EmbeddingProvider ──► Embedding   │
//! │                                      │                 │        │
//! │                                      ▼                 ▼        │
//! │                               CachedProvider    SimilarityIndex │
//! │                                                        │        │
//! │                                                        ▼        │
//! │                                                 top_k_similar   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use codex_semantic_search::{OpenAIProvider, SearchOverrides, SimilarityIndex};
//!
//! let mut index = SimilarityIndex::for_texts(OpenAIProvider::new());
//! index.index(&docs, false).await?;
//!
//! let hits = index.search("rust async runtimes", &SearchOverrides::default()).await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod provider;
pub mod similarity;

pub use cache::{CachedProvider, EmbeddingCache};
pub use config::{CacheConfig, IndexConfig, OpenAIConfig, SearchOverrides};
pub use error::{EmbeddingError, ErrorKind, Result};
pub use index::{IndexStats, IndexedItem, Metadata, RankedResult, SimilarityIndex};
pub use model::{EmbeddingModel, ModelLoader, PreloadedModel};
pub use provider::{
    BatchOptions, BatchProgress, EmbeddingProvider, EmbeddingResponse, LocalProvider,
    OpenAIProvider,
};
pub use similarity::{
    ScoredIndex, centroid, cosine_similarity, dot_product, euclidean_distance, magnitude,
    normalize, top_k_similar,
};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;
