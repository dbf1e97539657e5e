//! Similarity index over embedded items.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::Embedding;
use crate::config::{IndexConfig, SearchOverrides};
use crate::error::{EmbeddingError, Result};
use crate::provider::{BatchOptions, BatchProgress, EmbeddingProvider, ProgressCallback};
use crate::similarity::top_k_similar;

/// Arbitrary per-item attributes used for filtering.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Strategy turning an item into the text that gets embedded.
pub type TextExtractor<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Strategy turning an item into its [`Metadata`].
pub type MetadataExtractor<T> = Arc<dyn Fn(&T) -> Metadata + Send + Sync>;

/// Bytes assumed per embedding component when estimating memory use.
const BYTES_PER_COMPONENT: usize = 8;

const BYTES_PER_MB: usize = 1024 * 1024;

/// An entry in the similarity index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedItem<T> {
    /// The caller's item.
    pub item: T,

    /// The embedding vector.
    pub embedding: Embedding,

    /// Associated metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult<T> {
    pub item: T,

    /// Cosine similarity against the query.
    pub score: f32,

    /// 1-based position among the results that passed the threshold.
    pub rank: usize,
}

/// Summary of what an index holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub item_count: usize,

    /// Length of the first stored embedding, 0 when empty.
    pub dimensions: usize,

    /// Human readable size estimate, e.g. `"12.00 KB"`.
    pub memory_estimate: String,
}

/// Format a byte count as KB below one MiB and MB from there up.
fn format_memory(bytes: usize) -> String {
    if bytes < BYTES_PER_MB {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / BYTES_PER_MB as f64)
    }
}

/// Exact nearest-neighbour index over items embedded by an
/// [`EmbeddingProvider`].
///
/// Items are kept in insertion order, which also breaks ties between equal
/// scores. Searches scan every stored embedding.
///
/// Mutating calls take `&mut self`; to share an index between tasks wrap it
/// in a `tokio::sync::RwLock`.
pub struct SimilarityIndex<T> {
    provider: Arc<dyn EmbeddingProvider>,

    /// Stored entries, in insertion order.
    items: Vec<IndexedItem<T>>,

    config: IndexConfig,

    text_extractor: TextExtractor<T>,

    metadata_extractor: MetadataExtractor<T>,

    on_progress: Option<ProgressCallback>,
}

impl<T> SimilarityIndex<T>
where
    T: AsRef<str> + 'static,
{
    /// Create an index over plain text items.
    pub fn for_texts(provider: impl EmbeddingProvider + 'static) -> Self {
        Self::new(provider, |item: &T| item.as_ref().to_string())
    }
}

impl<T: 'static> SimilarityIndex<T> {
    /// Create an empty index with the default [`IndexConfig`].
    pub fn new(
        provider: impl EmbeddingProvider + 'static,
        text_extractor: impl Fn(&T) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            provider: Arc::new(provider),
            items: Vec::new(),
            config: IndexConfig::default(),
            text_extractor: Arc::new(text_extractor),
            metadata_extractor: Arc::new(|_: &T| Metadata::new()),
            on_progress: None,
        }
    }

    /// Replace the default search configuration.
    pub fn with_config(mut self, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Set how metadata is derived from items.
    pub fn with_metadata_extractor(
        mut self,
        extractor: impl Fn(&T) -> Metadata + Send + Sync + 'static,
    ) -> Self {
        self.metadata_extractor = Arc::new(extractor);
        self
    }

    /// Report embedding progress while indexing.
    pub fn with_progress(
        mut self,
        callback: impl Fn(BatchProgress) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Get the number of entries in the index.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Read-only view of the stored entries.
    pub fn items(&self) -> &[IndexedItem<T>] {
        &self.items
    }

    /// Dimension of the stored embeddings, 0 when empty.
    pub fn dimension(&self) -> usize {
        self.items.first().map_or(0, |entry| entry.embedding.len())
    }

    /// Get index statistics.
    pub fn stats(&self) -> IndexStats {
        let bytes: usize = self
            .items
            .iter()
            .map(|entry| entry.embedding.len() * BYTES_PER_COMPONENT)
            .sum();

        IndexStats {
            item_count: self.items.len(),
            dimensions: self.dimension(),
            memory_estimate: format_memory(bytes),
        }
    }

    /// Clear the index.
    pub fn clear(&mut self) {
        self.items.clear();
        info!("Cleared similarity index");
    }
}

impl<T> SimilarityIndex<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Embed `items` and add them to the index.
    ///
    /// With `replace` the previous contents are dropped, but only after the
    /// whole batch embedded successfully; a failed call leaves the index
    /// untouched.
    pub async fn index(&mut self, items: &[T], replace: bool) -> Result<()> {
        if items.is_empty() {
            return Err(EmbeddingError::invalid_input(
                "items must be a non-empty sequence",
            ));
        }

        self.provider.initialize().await?;

        let texts: Vec<String> = items
            .iter()
            .map(|item| (self.text_extractor)(item))
            .collect();
        let options = BatchOptions {
            batch_size: self.config.batch_size,
            on_progress: self.on_progress.clone(),
        };
        let responses = self.provider.embed_batch(&texts, &options).await?;
        if responses.len() != items.len() {
            return Err(EmbeddingError::embedding_failed(
                &texts[0],
                format!(
                    "provider returned {} embeddings for {} items",
                    responses.len(),
                    items.len()
                ),
            ));
        }

        if replace {
            self.items.clear();
        }

        let existing = self.dimension();
        let mut entries = Vec::with_capacity(items.len());
        for (item, response) in items.iter().zip(responses) {
            if existing > 0 && response.embedding.len() != existing {
                warn!(
                    "Indexing a {}-dimensional embedding into a {existing}-dimensional index",
                    response.embedding.len()
                );
            }
            entries.push(IndexedItem {
                item: item.clone(),
                embedding: response.embedding,
                metadata: (self.metadata_extractor)(item),
            });
        }
        self.items.extend(entries);

        info!(
            "Indexed {} items ({} total, replace: {replace})",
            items.len(),
            self.items.len()
        );
        Ok(())
    }

    /// Find the stored items most similar to `query_text`.
    pub async fn search(
        &self,
        query_text: &str,
        overrides: &SearchOverrides,
    ) -> Result<Vec<RankedResult<T>>> {
        let view: Vec<&IndexedItem<T>> = self.items.iter().collect();
        self.search_view(query_text, &view, overrides).await
    }

    /// Like [`SimilarityIndex::search`], restricted to entries whose
    /// metadata satisfies `predicate`.
    ///
    /// An empty filtered set fails the same way as an empty index.
    pub async fn search_with_filter<F>(
        &self,
        query_text: &str,
        predicate: F,
        overrides: &SearchOverrides,
    ) -> Result<Vec<RankedResult<T>>>
    where
        F: Fn(&Metadata) -> bool + Send + Sync,
    {
        let view: Vec<&IndexedItem<T>> = self
            .items
            .iter()
            .filter(|entry| predicate(&entry.metadata))
            .collect();
        debug!(
            "Filter kept {} of {} entries",
            view.len(),
            self.items.len()
        );
        self.search_view(query_text, &view, overrides).await
    }

    /// Search using the text of `item` as the query.
    pub async fn find_similar(
        &self,
        item: &T,
        overrides: &SearchOverrides,
    ) -> Result<Vec<RankedResult<T>>> {
        let text = (self.text_extractor)(item);
        self.search(&text, overrides).await
    }

    async fn search_view(
        &self,
        query_text: &str,
        view: &[&IndexedItem<T>],
        overrides: &SearchOverrides,
    ) -> Result<Vec<RankedResult<T>>> {
        if view.is_empty() {
            return Err(EmbeddingError::invalid_input("index is empty"));
        }
        let config = self.config.merged(overrides)?;

        self.provider.initialize().await?;
        let query = self.provider.embed(query_text).await?;

        let candidates: Vec<&[f32]> = view
            .iter()
            .map(|entry| entry.embedding.as_slice())
            .collect();
        let scored = top_k_similar(&query.embedding, &candidates, config.top_k)?;

        let results: Vec<RankedResult<T>> = scored
            .into_iter()
            .filter(|hit| hit.score != f32::NEG_INFINITY && hit.score >= config.threshold)
            .enumerate()
            .map(|(position, hit)| RankedResult {
                item: view[hit.index].item.clone(),
                score: hit.score,
                rank: position + 1,
            })
            .collect();

        debug!(
            "Search over {} entries returned {} results (top_k: {}, threshold: {})",
            view.len(),
            results.len(),
            config.top_k,
            config.threshold
        );
        Ok(results)
    }

    /// Copy of every stored entry.
    pub fn export_index(&self) -> Vec<IndexedItem<T>> {
        self.items.clone()
    }

    /// Replace the stored entries with `snapshot`.
    pub fn import_index(&mut self, snapshot: Vec<IndexedItem<T>>) {
        self.items = snapshot;
        info!("Imported {} entries into similarity index", self.items.len());
    }
}

impl<T> SimilarityIndex<T>
where
    T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static,
{
    /// Serialize the stored entries to JSON.
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.items)?)
    }

    /// Replace the stored entries with a snapshot produced by
    /// [`SimilarityIndex::export_json`].
    pub fn import_json(&mut self, json: &str) -> Result<()> {
        let snapshot: Vec<IndexedItem<T>> = serde_json::from_str(json)?;
        self.import_index(snapshot);
        Ok(())
    }
}
