//! Embedding providers.
//!
//! A provider turns text into vectors. [`LocalProvider`] drives an
//! in-process model through the [`crate::model`] seams and
//! [`OpenAIProvider`] calls an OpenAI-compatible embeddings endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::Embedding;
use crate::config::{DEFAULT_BATCH_SIZE, OpenAIConfig};
use crate::error::{EmbeddingError, Result};
use crate::model::{EmbeddingModel, ModelLoader};
use crate::similarity::normalize;

/// Response from embedding generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// The generated embedding.
    pub embedding: Embedding,

    /// The text that was embedded.
    pub text: String,

    /// Model used to generate the embedding.
    pub model: String,

    /// Dimension of the embedding.
    pub dimension: usize,
}

impl EmbeddingResponse {
    pub fn new(text: impl Into<String>, model: impl Into<String>, embedding: Embedding) -> Self {
        Self {
            dimension: embedding.len(),
            embedding,
            text: text.into(),
            model: model.into(),
        }
    }
}

/// Progress of a batch embedding call, reported after each chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Texts embedded so far.
    pub completed: usize,

    /// Texts in the batch.
    pub total: usize,
}

/// Callback invoked with [`BatchProgress`] after every chunk.
pub type ProgressCallback = Arc<dyn Fn(BatchProgress) + Send + Sync>;

/// Options for [`EmbeddingProvider::embed_batch`].
#[derive(Clone)]
pub struct BatchOptions {
    /// Number of texts per chunk.
    pub batch_size: usize,

    /// Optional progress reporting.
    pub on_progress: Option<ProgressCallback>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            on_progress: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_progress(
        mut self,
        callback: impl Fn(BatchProgress) + Send + Sync + 'static,
    ) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOptions")
            .field("batch_size", &self.batch_size)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Reject empty or whitespace-only text.
pub(crate) fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(EmbeddingError::invalid_input("text must be a non-empty string"));
    }
    Ok(())
}

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Get the model this provider embeds with.
    fn model(&self) -> &str;

    /// Whether [`EmbeddingProvider::initialize`] has completed.
    fn is_ready(&self) -> bool;

    /// Prepare the provider.
    ///
    /// Idempotent: once it has succeeded, later calls return immediately,
    /// and concurrent callers share a single in-flight initialization.
    async fn initialize(&self) -> Result<()>;

    /// Generate an embedding for the given text.
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse>;

    /// Embed one chunk of texts, in order.
    ///
    /// The default embeds sequentially; providers with a native batch
    /// endpoint override this.
    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<EmbeddingResponse>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Generate embeddings for multiple texts.
    ///
    /// Texts are processed in chunks of `options.batch_size`; progress is
    /// reported after each chunk. Output order matches input order.
    async fn embed_batch(
        &self,
        texts: &[String],
        options: &BatchOptions,
    ) -> Result<Vec<EmbeddingResponse>> {
        if texts.is_empty() {
            return Err(EmbeddingError::invalid_input("texts must be a non-empty sequence"));
        }
        if options.batch_size == 0 {
            return Err(EmbeddingError::invalid_input("batch_size must be positive"));
        }

        let total = texts.len();
        let mut results = Vec::with_capacity(total);

        for chunk in texts.chunks(options.batch_size) {
            let embedded = self.embed_chunk(chunk).await?;
            if embedded.len() != chunk.len() {
                return Err(EmbeddingError::embedding_failed(
                    &chunk[0],
                    format!(
                        "provider returned {} embeddings for {} texts",
                        embedded.len(),
                        chunk.len()
                    ),
                ));
            }
            results.extend(embedded);

            debug!("Embedded {}/{total} texts with {}", results.len(), self.name());
            if let Some(on_progress) = &options.on_progress {
                on_progress(BatchProgress {
                    completed: results.len(),
                    total,
                });
            }
        }

        Ok(results)
    }
}

#[async_trait]
impl<P> EmbeddingProvider for Arc<P>
where
    P: EmbeddingProvider + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    async fn initialize(&self) -> Result<()> {
        (**self).initialize().await
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        (**self).embed(text).await
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<EmbeddingResponse>> {
        (**self).embed_chunk(texts).await
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        options: &BatchOptions,
    ) -> Result<Vec<EmbeddingResponse>> {
        (**self).embed_batch(texts, options).await
    }
}

/// Provider backed by an in-process model.
///
/// The model is loaded lazily by [`EmbeddingProvider::initialize`]; until
/// that succeeds every embed call fails with
/// [`EmbeddingError::ModelNotLoaded`].
pub struct LocalProvider<L> {
    loader: L,
    model: OnceCell<Arc<dyn EmbeddingModel>>,
    normalize_output: bool,
}

impl<L> LocalProvider<L>
where
    L: ModelLoader,
{
    /// Create a new local provider.
    pub fn new(loader: L) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
            normalize_output: false,
        }
    }

    /// Scale every produced embedding to unit length.
    pub fn with_normalization(mut self, enabled: bool) -> Self {
        self.normalize_output = enabled;
        self
    }

    /// Dimension of the loaded model, if any.
    pub fn dimension(&self) -> Option<usize> {
        self.model.get().map(|model| model.dimension())
    }

    fn loaded_model(&self) -> Result<Arc<dyn EmbeddingModel>> {
        self.model
            .get()
            .cloned()
            .ok_or_else(|| EmbeddingError::ModelNotLoaded {
                provider: self.name().to_string(),
            })
    }
}

#[async_trait]
impl<L> EmbeddingProvider for LocalProvider<L>
where
    L: ModelLoader,
{
    fn name(&self) -> &str {
        "local"
    }

    fn model(&self) -> &str {
        self.loader.model_name()
    }

    fn is_ready(&self) -> bool {
        self.model.initialized()
    }

    async fn initialize(&self) -> Result<()> {
        self.model
            .get_or_try_init(|| async {
                info!("Loading embedding model {}", self.loader.model_name());
                let model = self.loader.load().await.map_err(|err| {
                    EmbeddingError::ModelNotLoaded {
                        provider: format!("{}: {err:#}", self.name()),
                    }
                })?;
                info!(
                    "Loaded embedding model {} ({} dimensions)",
                    self.loader.model_name(),
                    model.dimension()
                );
                Ok::<_, EmbeddingError>(Arc::from(model))
            })
            .await?;
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        let model = self.loaded_model()?;
        validate_text(text)?;

        let owned = text.to_string();
        let inference = Arc::clone(&model);
        let embedding = tokio::task::spawn_blocking(move || inference.embed(&owned))
            .await
            .map_err(|err| EmbeddingError::embedding_failed(text, err))?
            .map_err(|err| EmbeddingError::embedding_failed(text, format!("{err:#}")))?;

        if embedding.len() != model.dimension() {
            return Err(EmbeddingError::embedding_failed(
                text,
                format!(
                    "model produced {} dimensions, expected {}",
                    embedding.len(),
                    model.dimension()
                ),
            ));
        }

        let embedding = if self.normalize_output {
            normalize(&embedding)?
        } else {
            embedding
        };

        Ok(EmbeddingResponse::new(text, self.model(), embedding))
    }
}

/// OpenAI embedding provider.
pub struct OpenAIProvider {
    config: OpenAIConfig,

    /// HTTP client.
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from defaults and `OPENAI_API_KEY`.
    pub fn new() -> Self {
        Self::with_config(OpenAIConfig::from_env())
    }

    /// Create a provider from an explicit configuration.
    pub fn with_config(config: OpenAIConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| EmbeddingError::ModelNotLoaded {
                provider: self.name().to_string(),
            })
    }

    async fn request(&self, texts: &[String]) -> Result<OpenAIEmbeddingResponse> {
        let api_key = self.api_key()?;
        let first = texts.first().map(String::as_str).unwrap_or_default();

        let mut body = serde_json::json!({
            "input": texts,
            "model": self.config.model,
        });
        if let Some(dims) = self.config.dimensions {
            body["dimensions"] = serde_json::json!(dims);
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|err| EmbeddingError::embedding_failed(first, err))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);

            return Err(EmbeddingError::embedding_failed(
                first,
                format!("rate limit exceeded, retry after {retry_after}s"),
            ));
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::embedding_failed(
                first,
                format!("API error ({status}): {error_text}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|err| EmbeddingError::embedding_failed(first, err))
    }
}

impl Default for OpenAIProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn is_ready(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn initialize(&self) -> Result<()> {
        self.api_key().map(|_| ())
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        let texts = [text.to_string()];
        self.embed_chunk(&texts)
            .await?
            .pop()
            .ok_or_else(|| EmbeddingError::embedding_failed(text, "no embedding in response"))
    }

    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<EmbeddingResponse>> {
        self.api_key()?;
        for text in texts {
            validate_text(text)?;
        }

        debug!(
            "Requesting {} embeddings with model: {}",
            texts.len(),
            self.config.model
        );

        let mut result = self.request(texts).await?;
        let first = texts.first().map(String::as_str).unwrap_or_default();
        if result.data.len() != texts.len() {
            return Err(EmbeddingError::embedding_failed(
                first,
                format!(
                    "response held {} embeddings for {} inputs",
                    result.data.len(),
                    texts.len()
                ),
            ));
        }

        result.data.sort_by_key(|item| item.index);
        if let Some(tokens) = result.usage.map(|u| u.total_tokens) {
            debug!("Embedding request used {tokens} tokens");
        }

        let model = result.model;
        Ok(texts
            .iter()
            .zip(result.data)
            .map(|(text, item)| EmbeddingResponse::new(text.clone(), model.clone(), item.embedding))
            .collect())
    }
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingData>,
    model: String,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    total_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::PreloadedModel;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps text length and vowel count onto a 2-d vector.
    struct LengthModel;

    impl EmbeddingModel for LengthModel {
        fn dimension(&self) -> usize {
            2
        }

        fn embed(&self, text: &str) -> anyhow::Result<Embedding> {
            if text == "explode" {
                anyhow::bail!("inference crashed");
            }
            let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
            Ok(vec![text.len() as f32, vowels as f32])
        }
    }

    struct CountingLoader {
        loads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ModelLoader for CountingLoader {
        fn model_name(&self) -> &str {
            "length-model"
        }

        async fn load(&self) -> anyhow::Result<Box<dyn EmbeddingModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(Box::new(LengthModel))
        }
    }

    struct FailingLoader;

    #[async_trait]
    impl ModelLoader for FailingLoader {
        fn model_name(&self) -> &str {
            "missing-model"
        }

        async fn load(&self) -> anyhow::Result<Box<dyn EmbeddingModel>> {
            anyhow::bail!("weights not found")
        }
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn test_embed_before_initialize_fails() {
        let provider = LocalProvider::new(PreloadedModel::new("length-model", LengthModel));
        let err = provider.embed("hello").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelNotLoaded);
        assert!(!provider.is_ready());
    }

    #[tokio::test]
    async fn test_embed_after_initialize() {
        let provider = LocalProvider::new(PreloadedModel::new("length-model", LengthModel));
        provider.initialize().await.unwrap();
        provider.initialize().await.unwrap();

        let response = provider.embed("hello").await.unwrap();
        assert_eq!(response.embedding, vec![5.0, 2.0]);
        assert_eq!(response.text, "hello");
        assert_eq!(response.model, "length-model");
        assert_eq!(response.dimension, 2);
        assert_eq!(provider.dimension(), Some(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_initialize_loads_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(LocalProvider::new(CountingLoader {
            loads: Arc::clone(&loads),
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = Arc::clone(&provider);
                tokio::spawn(async move { provider.initialize().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(provider.is_ready());
    }

    #[tokio::test]
    async fn test_failed_load_reports_model_not_loaded() {
        let provider = LocalProvider::new(FailingLoader);
        let err = provider.initialize().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelNotLoaded);
        assert!(err.to_string().contains("weights not found"));
        assert!(!provider.is_ready());
    }

    #[tokio::test]
    async fn test_embed_rejects_blank_text() {
        let provider = LocalProvider::new(PreloadedModel::new("length-model", LengthModel));
        provider.initialize().await.unwrap();
        let err = provider.embed("   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_inference_error_becomes_embedding_failed() {
        let provider = LocalProvider::new(PreloadedModel::new("length-model", LengthModel));
        provider.initialize().await.unwrap();
        match provider.embed("explode").await.unwrap_err() {
            EmbeddingError::EmbeddingFailed { input, cause } => {
                assert_eq!(input, "explode");
                assert!(cause.contains("inference crashed"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_normalized_output() {
        let provider = LocalProvider::new(PreloadedModel::new("length-model", LengthModel))
            .with_normalization(true);
        provider.initialize().await.unwrap();

        // "abc" -> [3, 1]
        let response = provider.embed("abc").await.unwrap();
        let norm = (10.0f32).sqrt();
        assert!((response.embedding[0] - 3.0 / norm).abs() < 1e-6);
        assert!((response.embedding[1] - 1.0 / norm).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_embed_batch_chunks_and_reports_progress() {
        let provider = LocalProvider::new(PreloadedModel::new("length-model", LengthModel));
        provider.initialize().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let options = BatchOptions::new()
            .with_batch_size(2)
            .with_progress(move |progress| sink.lock().unwrap().push(progress));

        let input = texts(&["a", "bb", "ccc", "dddd", "eeeee"]);
        let results = provider.embed_batch(&input, &options).await.unwrap();

        let lengths: Vec<f32> = results.iter().map(|r| r.embedding[0]).collect();
        assert_eq!(lengths, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

        let progress: Vec<(usize, usize)> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|p| (p.completed, p.total))
            .collect();
        assert_eq!(progress, vec![(2, 5), (4, 5), (5, 5)]);
    }

    #[tokio::test]
    async fn test_embed_batch_rejects_empty_input() {
        let provider = LocalProvider::new(PreloadedModel::new("length-model", LengthModel));
        provider.initialize().await.unwrap();
        let err = provider
            .embed_batch(&[], &BatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_openai_provider_not_ready_without_key() {
        let provider = OpenAIProvider::with_config(OpenAIConfig::default());
        assert!(!provider.is_ready());
        assert_eq!(provider.model(), "text-embedding-3-small");
    }
}
