use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to ingest {}: {reason}", .path.display())]
    Ingestion { path: PathBuf, reason: String },

    #[error("No documents found in {}. Add .txt, .md, or .pdf files", .0.display())]
    EmptyCorpus(PathBuf),

    #[error("Cannot build an index from an empty chunk set")]
    EmptyInput,

    #[error("No persisted index found at {}", .0.display())]
    IndexNotFound(PathBuf),

    #[error("An index already exists at {}; reset it before rebuilding", .0.display())]
    IndexExists(PathBuf),

    #[error("Index location {} is locked by another build", .0.display())]
    IndexLocked(PathBuf),

    #[error("Index storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Invalid question: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod app;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod index;
pub mod loader;
pub mod rag;
pub mod scrub;
