//! Seams for plugging an inference runtime into [`crate::LocalProvider`].
//!
//! The runtime itself (weights, tokenizer, device selection) lives outside
//! this crate. A [`ModelLoader`] produces a ready [`EmbeddingModel`] once,
//! and the provider drives inference through it.

use async_trait::async_trait;

use crate::Embedding;

/// A loaded model that maps text to a fixed-dimension vector.
pub trait EmbeddingModel: Send + Sync {
    /// Output dimension of every embedding this model produces.
    fn dimension(&self) -> usize;

    /// Run inference for a single text.
    ///
    /// This may be CPU-bound; the provider calls it off the async runtime.
    fn embed(&self, text: &str) -> anyhow::Result<Embedding>;
}

/// Loads an [`EmbeddingModel`].
#[async_trait]
pub trait ModelLoader: Send + Sync {
    /// Name of the model this loader produces.
    fn model_name(&self) -> &str;

    /// Load the model. Called at most once per successful provider init.
    async fn load(&self) -> anyhow::Result<Box<dyn EmbeddingModel>>;
}

/// Loader wrapping an already constructed model.
pub struct PreloadedModel<M> {
    name: String,
    model: std::sync::Mutex<Option<M>>,
}

impl<M> PreloadedModel<M>
where
    M: EmbeddingModel + 'static,
{
    pub fn new(name: impl Into<String>, model: M) -> Self {
        Self {
            name: name.into(),
            model: std::sync::Mutex::new(Some(model)),
        }
    }
}

#[async_trait]
impl<M> ModelLoader for PreloadedModel<M>
where
    M: EmbeddingModel + 'static,
{
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> anyhow::Result<Box<dyn EmbeddingModel>> {
        let model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("model slot poisoned"))?
            .take()
            .ok_or_else(|| anyhow::anyhow!("model `{}` was already handed out", self.name))?;
        Ok(Box::new(model))
    }
}
