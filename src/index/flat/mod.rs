// Exact-scan index backend
// Keeps every record in memory and scores the whole set per query


use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{
    IndexManifest, IndexedChunk, RetrievalResult, ScoredChunk, VectorIndex, cosine_similarity,
    rank_hits, validate_dimension, validate_k, write_synced,
};
use crate::{RagError, Result};

pub const RECORDS_FILE: &str = "records.json";

pub struct FlatIndex {
    location: PathBuf,
    manifest: IndexManifest,
    records: Vec<IndexedChunk>,
}

impl FlatIndex {
    #[inline]
    pub fn open(location: &Path, manifest: IndexManifest) -> Result<Self> {
        let path = location.join(RECORDS_FILE);
        let content = fs::read_to_string(&path)?;
        let records: Vec<IndexedChunk> = serde_json::from_str(&content).map_err(|e| {
            RagError::Storage(format!("Invalid records file {}: {}", path.display(), e))
        })?;

        if records.len() != manifest.chunk_count {
            return Err(RagError::Storage(format!(
                "Manifest lists {} chunks but {} holds {}",
                manifest.chunk_count,
                path.display(),
                records.len()
            )));
        }

        debug!("Opened flat index with {} records", records.len());
        Ok(Self {
            location: location.to_path_buf(),
            manifest,
            records,
        })
    }
}

#[async_trait]
impl VectorIndex for FlatIndex {
    #[inline]
    fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    #[inline]
    fn location(&self) -> &Path {
        &self.location
    }

    #[inline]
    async fn query(&self, vector: &[f32], k: usize) -> Result<RetrievalResult> {
        validate_k(k)?;
        validate_dimension(&self.manifest, vector)?;

        let hits = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| {
                (
                    position,
                    ScoredChunk {
                        chunk: record.chunk.clone(),
                        score: cosine_similarity(vector, &record.vector),
                    },
                )
            })
            .collect();

        Ok(rank_hits(hits, k))
    }
}

/// Persist `records` in insertion order under `dir`
#[inline]
pub fn write_records(dir: &Path, records: &[IndexedChunk]) -> Result<()> {
    let content = serde_json::to_string(records)
        .map_err(|e| RagError::Storage(format!("Failed to serialize records: {}", e)))?;
    write_synced(&dir.join(RECORDS_FILE), content.as_bytes())
}
