// Application wiring
// Connects the model services, opens or builds the index and hands out the engine

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::embeddings::{Embedder, OllamaClient};
use crate::index::{VectorIndex, open_or_build};
use crate::rag::{Generator, RagEngine};
use crate::{RagError, Result};

/// Everything needed to answer questions, ready before the first request
pub struct AppContext {
    config: Config,
    engine: RagEngine,
}

impl AppContext {
    /// Connect to Ollama, validating both models, then open or build the index
    #[inline]
    pub async fn initialize(config: Config) -> Result<Self> {
        let client = Arc::new(OllamaClient::connect(&config.ollama)?);
        let embedder: Arc<dyn Embedder> = Arc::clone(&client) as Arc<dyn Embedder>;
        Self::with_services(config, embedder, client).await
    }

    /// Build the context around caller-supplied model services
    #[inline]
    pub async fn with_services(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RagError::Config(e.to_string()))?;

        let index = open_or_build(&config, embedder.as_ref()).await?;
        let engine = RagEngine::new(index, embedder, generator, &config)?;

        info!(
            "Ready: {} chunks indexed, generating with {}",
            engine.index().len(),
            config.ollama.generation_model
        );
        Ok(Self { config, engine })
    }

    #[inline]
    pub fn engine(&self) -> &RagEngine {
        &self.engine
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn index(&self) -> &dyn VectorIndex {
        self.engine.index()
    }

    #[inline]
    pub fn index_len(&self) -> usize {
        self.engine.index().len()
    }
}
