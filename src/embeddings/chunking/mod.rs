#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::loader::Document;
use crate::{RagError, Result};

/// A bounded slice of one document, the unit stored in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// The chunk text, verbatim from the source document
    pub text: String,
    /// Path of the document this chunk came from
    pub source_id: String,
    /// Position of this chunk within its document
    pub sequence: usize,
    /// Character offset of the chunk start within the document
    pub start_offset: usize,
    /// Number of leading characters shared with the previous chunk
    pub overlap: usize,
}

impl Chunk {
    /// Length of the chunk in characters
    #[inline]
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// The part of the chunk not repeated from its predecessor
    #[inline]
    pub fn fresh_text(&self) -> &str {
        self.text
            .char_indices()
            .nth(self.overlap)
            .map_or("", |(byte, _)| self.text.get(byte..).unwrap_or_default())
    }
}

/// Configuration for content chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters repeated at the start of each following chunk
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 150,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Split boundaries, highest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Sentence,
    Word,
}

impl Boundary {
    const PRIORITY: [Self; 3] = [Self::Paragraph, Self::Sentence, Self::Word];

    /// Whether a chunk ending just before `chars[end]` ends on this boundary
    fn matches(self, chars: &[char], end: usize) -> bool {
        let last = chars[end - 1];
        let before = end.checked_sub(2).map(|i| chars[i]);
        match self {
            Self::Paragraph => last == '\n' && before == Some('\n'),
            Self::Sentence => {
                last == '\n'
                    || (last.is_whitespace() && matches!(before, Some('.' | '!' | '?')))
            }
            Self::Word => last.is_whitespace(),
        }
    }
}

/// Chunk every document in order
#[inline]
pub fn chunk_documents(documents: &[Document], config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let mut chunks = Vec::new();
    for document in documents {
        chunks.extend(chunk_document(document, config)?);
    }

    debug!(
        "Split {} documents into {} chunks (size={}, overlap={}, avg {} tokens)",
        documents.len(),
        chunks.len(),
        config.chunk_size,
        config.chunk_overlap,
        chunks
            .iter()
            .map(|c| estimate_token_count(&c.text))
            .sum::<usize>()
            / chunks.len().max(1)
    );

    Ok(chunks)
}

/// Split one document into overlapping chunks of at most `chunk_size` characters
#[inline]
pub fn chunk_document(document: &Document, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    config.validate()?;

    let text = document.raw_text.as_str();
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let offsets: Vec<usize> = text
        .char_indices()
        .map(|(byte, _)| byte)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = if total - start <= config.chunk_size {
            total
        } else {
            find_split(&chars, start, config)
        };

        let piece = text.get(offsets[start]..offsets[end]).ok_or_else(|| {
            RagError::InvalidInput(format!(
                "chunk boundary {start}..{end} does not fall on a character boundary"
            ))
        })?;

        chunks.push(Chunk {
            text: piece.to_string(),
            source_id: document.source_id.clone(),
            sequence: chunks.len(),
            start_offset: start,
            overlap: if chunks.is_empty() {
                0
            } else {
                config.chunk_overlap
            },
        });

        if end == total {
            break;
        }
        start = end - config.chunk_overlap;
    }

    Ok(chunks)
}

/// Pick the end of the chunk starting at `start`.
///
/// Takes the latest boundary of the best available kind inside the window, never
/// earlier than half a window in and always past the overlap so the scan advances.
fn find_split(chars: &[char], start: usize, config: &ChunkingConfig) -> usize {
    let window_end = start + config.chunk_size;
    let min_end = start + (config.chunk_overlap + 1).max(config.chunk_size / 2);

    Boundary::PRIORITY
        .iter()
        .find_map(|&boundary| {
            (min_end..=window_end)
                .rev()
                .find(|&end| boundary.matches(chars, end))
        })
        .unwrap_or(window_end)
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
