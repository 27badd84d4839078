// Embeddings module
// Ollama integration and content chunking

pub mod chunking;
pub mod ollama;

pub use chunking::{Chunk, ChunkingConfig, chunk_document, chunk_documents, estimate_token_count};
pub use ollama::OllamaClient;

use crate::{RagError, Result};

/// Maps text to fixed-length vectors with a single named model.
///
/// Implementations must be deterministic for a given model and input, and
/// `embed_batch` must return exactly one vector per input, in input order.
pub trait Embedder: Send + Sync {
    /// Identifier of the embedding model
    fn model(&self) -> &str;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| RagError::Embedding("model returned no vector".to_string()))
    }
}
