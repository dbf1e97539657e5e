//! Embedding cache for efficient retrieval.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::Embedding;
use crate::config::CacheConfig;
use crate::error::{EmbeddingError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResponse, validate_text};

/// Cache entry for an embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The embedding vector.
    pub embedding: Embedding,

    /// Model used to generate the embedding.
    pub model: String,

    /// Insertion sequence number; lower is older.
    pub inserted: u64,
}

/// In-memory cache of embeddings keyed by model and text.
pub struct EmbeddingCache {
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,

    /// Maximum cache size.
    max_entries: usize,

    sequence: AtomicU64,
}

impl EmbeddingCache {
    /// Create a new in-memory cache.
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: Arc::new(RwLock::new(HashMap::new())),
            max_entries,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn with_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries)
    }

    /// Compute a hash for cache lookup.
    fn hash_key(text: &str, model: &str) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        model.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }

    /// Get an embedding from the cache.
    pub async fn get(&self, text: &str, model: &str) -> Option<Embedding> {
        let key = Self::hash_key(text, model);
        let cache = self.cache.read().await;
        cache.get(&key).map(|e| e.embedding.clone())
    }

    /// Put an embedding in the cache.
    pub async fn put(&self, text: &str, model: &str, embedding: Embedding) {
        if self.max_entries == 0 {
            return;
        }

        let key = Self::hash_key(text, model);
        let entry = CacheEntry {
            embedding,
            model: model.to_string(),
            inserted: self.sequence.fetch_add(1, Ordering::Relaxed),
        };

        let mut cache = self.cache.write().await;

        // Evict the oldest entry when a new key would exceed capacity.
        if !cache.contains_key(&key) && cache.len() >= self.max_entries {
            if let Some(oldest_key) = cache
                .iter()
                .min_by_key(|(_, v)| v.inserted)
                .map(|(k, _)| k.clone())
            {
                cache.remove(&oldest_key);
            }
        }

        cache.insert(key, entry);
        debug!("Cached embedding for text (model: {model})");
    }

    /// Check if an embedding is cached.
    pub async fn contains(&self, text: &str, model: &str) -> bool {
        let key = Self::hash_key(text, model);
        self.cache.read().await.contains_key(&key)
    }

    /// Remove an embedding from the cache.
    pub async fn remove(&self, text: &str, model: &str) {
        let key = Self::hash_key(text, model);
        self.cache.write().await.remove(&key);
    }

    /// Clear the entire cache.
    pub async fn clear(&self) {
        self.cache.write().await.clear();
        info!("Cleared embedding cache");
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let cache = self.cache.read().await;
        let mut models: Vec<String> = cache
            .values()
            .map(|e| e.model.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        models.sort();

        CacheStats {
            entries: cache.len(),
            max_entries: self.max_entries,
            models,
        }
    }
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in cache.
    pub entries: usize,

    /// Maximum cache size.
    pub max_entries: usize,

    /// Models with cached embeddings, sorted.
    pub models: Vec<String>,
}

/// A provider wrapper that serves repeated texts from an [`EmbeddingCache`].
pub struct CachedProvider<P> {
    provider: P,
    cache: EmbeddingCache,
}

impl<P> CachedProvider<P>
where
    P: EmbeddingProvider,
{
    /// Create a new cached provider.
    pub fn new(provider: P, cache: EmbeddingCache) -> Self {
        Self { provider, cache }
    }

    /// Get the underlying cache.
    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    /// Get the wrapped provider.
    pub fn inner(&self) -> &P {
        &self.provider
    }

    /// Cached entries are only served while the wrapped model is loaded.
    fn ensure_ready(&self) -> Result<()> {
        if self.provider.is_ready() {
            Ok(())
        } else {
            Err(EmbeddingError::ModelNotLoaded {
                provider: self.provider.name().to_string(),
            })
        }
    }
}

#[async_trait]
impl<P> EmbeddingProvider for CachedProvider<P>
where
    P: EmbeddingProvider,
{
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn model(&self) -> &str {
        self.provider.model()
    }

    fn is_ready(&self) -> bool {
        self.provider.is_ready()
    }

    async fn initialize(&self) -> Result<()> {
        self.provider.initialize().await
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        validate_text(text)?;
        self.ensure_ready()?;
        let model = self.provider.model();

        if let Some(embedding) = self.cache.get(text, model).await {
            debug!("Cache hit for embedding");
            return Ok(EmbeddingResponse::new(text, model, embedding));
        }

        let response = self.provider.embed(text).await?;
        self.cache
            .put(text, model, response.embedding.clone())
            .await;

        Ok(response)
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<EmbeddingResponse>> {
        self.ensure_ready()?;
        let model = self.provider.model();

        let mut slots: Vec<Option<EmbeddingResponse>> = Vec::with_capacity(texts.len());
        let mut misses: Vec<String> = Vec::new();
        for text in texts {
            let hit = self.cache.get(text, model).await;
            if hit.is_none() {
                misses.push(text.clone());
            }
            slots.push(hit.map(|embedding| EmbeddingResponse::new(text.clone(), model, embedding)));
        }

        debug!(
            "Embedding chunk: {} cached, {} to compute",
            texts.len() - misses.len(),
            misses.len()
        );

        if !misses.is_empty() {
            let computed = self.provider.embed_chunk(&misses).await?;
            let mut computed = computed.into_iter();
            for slot in slots.iter_mut().filter(|slot| slot.is_none()) {
                if let Some(response) = computed.next() {
                    self.cache
                        .put(&response.text, model, response.embedding.clone())
                        .await;
                    *slot = Some(response);
                }
            }
        }

        // A short inner response leaves `None` slots; the batch driver
        // reports the count mismatch.
        Ok(slots.into_iter().flatten().collect())
    }
}
