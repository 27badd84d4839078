// LanceDB index backend
// Stores chunk vectors in a LanceDB table and searches by cosine distance

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use tracing::{debug, info};

use super::{
    IndexManifest, IndexedChunk, RetrievalResult, ScoredChunk, VectorIndex, rank_hits,
    validate_dimension, validate_k,
};
use crate::embeddings::Chunk;
use crate::{RagError, Result};

/// Subdirectory holding the LanceDB database
pub const DATA_DIR: &str = "lance";
pub const TABLE_NAME: &str = "chunks";

/// Extra rows fetched past `k` so equal-distance neighbours can be re-ordered by position
const TIE_SLACK: usize = 8;

pub struct LanceIndex {
    location: PathBuf,
    manifest: IndexManifest,
    table: Table,
}

impl LanceIndex {
    #[inline]
    pub async fn open(location: &Path, manifest: IndexManifest) -> Result<Self> {
        let connection = connect(&location.join(DATA_DIR)).await?;
        let table = connection
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map_err(|e| RagError::Storage(format!("Failed to open table: {}", e)))?;

        debug!("Opened LanceDB table at {}", location.display());
        Ok(Self {
            location: location.to_path_buf(),
            manifest,
            table,
        })
    }

    /// Count rows in the underlying table
    #[inline]
    pub async fn count_rows(&self) -> Result<usize> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Storage(format!("Failed to count rows: {}", e)))
    }
}

#[async_trait]
impl VectorIndex for LanceIndex {
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

        let limit = k.saturating_add(TIE_SLACK);
        debug!("Searching LanceDB for {} nearest chunks", limit);

        let mut results = self
            .table
            .vector_search(vector)
            .map_err(|e| RagError::Retrieval(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| RagError::Retrieval(format!("Failed to execute search: {}", e)))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| RagError::Retrieval(format!("Failed to read result stream: {}", e)))?
        {
            hits.extend(parse_search_batch(&batch)?);
        }

        Ok(rank_hits(hits, k))
    }
}

async fn connect(path: &Path) -> Result<Connection> {
    let uri = path.to_string_lossy();
    lancedb::connect(&uri)
        .execute()
        .await
        .map_err(|e| RagError::Storage(format!("Failed to connect to LanceDB: {}", e)))
}

fn create_schema(dimension: i32) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                dimension,
            ),
            false,
        ),
        Field::new("source_id", DataType::Utf8, false),
        Field::new("sequence", DataType::UInt32, false),
        Field::new("start_offset", DataType::UInt32, false),
        Field::new("overlap", DataType::UInt32, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("position", DataType::UInt32, false),
    ]))
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| RagError::Storage(format!("{} {} does not fit the index schema", what, value)))
}

/// Build a RecordBatch from records; `position` keeps insertion order
fn create_record_batch(records: &[IndexedChunk]) -> Result<RecordBatch> {
    let len = records.len();
    let dimension = records.first().map_or(0, |record| record.vector.len());
    let list_size = i32::try_from(dimension).map_err(|_| {
        RagError::Storage(format!("Vector dimension {} is too large", dimension))
    })?;

    let mut ids = Vec::with_capacity(len);
    let mut flat_values = Vec::with_capacity(len * dimension);
    let mut source_ids = Vec::with_capacity(len);
    let mut sequences = Vec::with_capacity(len);
    let mut start_offsets = Vec::with_capacity(len);
    let mut overlaps = Vec::with_capacity(len);
    let mut texts = Vec::with_capacity(len);
    let mut positions = Vec::with_capacity(len);

    for (position, record) in records.iter().enumerate() {
        let chunk = &record.chunk;
        ids.push(format!("{}#{}", chunk.source_id, chunk.sequence));
        flat_values.extend_from_slice(&record.vector);
        source_ids.push(chunk.source_id.as_str());
        sequences.push(to_u32(chunk.sequence, "sequence")?);
        start_offsets.push(to_u32(chunk.start_offset, "start offset")?);
        overlaps.push(to_u32(chunk.overlap, "overlap")?);
        texts.push(chunk.text.as_str());
        positions.push(to_u32(position, "position")?);
    }

    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array = FixedSizeListArray::try_new(
        field,
        list_size,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| RagError::Storage(format!("Failed to create vector array: {}", e)))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(source_ids)),
        Arc::new(UInt32Array::from(sequences)),
        Arc::new(UInt32Array::from(start_offsets)),
        Arc::new(UInt32Array::from(overlaps)),
        Arc::new(StringArray::from(texts)),
        Arc::new(UInt32Array::from(positions)),
    ];

    RecordBatch::try_new(create_schema(list_size), arrays)
        .map_err(|e| RagError::Storage(format!("Failed to create record batch: {}", e)))
}

/// Create the chunk table under `dir` and insert every record
#[inline]
pub async fn write_records(dir: &Path, records: &[IndexedChunk]) -> Result<()> {
    let record_batch = create_record_batch(records)?;
    let connection = connect(&dir.join(DATA_DIR)).await?;

    let table = connection
        .create_empty_table(TABLE_NAME, record_batch.schema())
        .execute()
        .await
        .map_err(|e| RagError::Storage(format!("Failed to create table: {}", e)))?;

    let schema = record_batch.schema();
    let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
    table
        .add(reader)
        .execute()
        .await
        .map_err(|e| RagError::Storage(format!("Failed to insert chunks: {}", e)))?;

    info!("Stored {} chunk vectors in LanceDB", records.len());
    Ok(())
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Retrieval(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| RagError::Retrieval(format!("Invalid {} column type", name)))
}

/// Parse one batch of search results into positioned hits
fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<(usize, ScoredChunk)>> {
    let source_ids = column::<StringArray>(batch, "source_id")?;
    let sequences = column::<UInt32Array>(batch, "sequence")?;
    let start_offsets = column::<UInt32Array>(batch, "start_offset")?;
    let overlaps = column::<UInt32Array>(batch, "overlap")?;
    let texts = column::<StringArray>(batch, "text")?;
    let positions = column::<UInt32Array>(batch, "position")?;
    let distances = column::<Float32Array>(batch, "_distance")?;

    let hits = (0..batch.num_rows())
        .map(|row| {
            let chunk = Chunk {
                text: texts.value(row).to_string(),
                source_id: source_ids.value(row).to_string(),
                sequence: sequences.value(row) as usize,
                start_offset: start_offsets.value(row) as usize,
                overlap: overlaps.value(row) as usize,
            };

            // Cosine distance to similarity, higher is better
            let score = 1.0 - distances.value(row);

            (positions.value(row) as usize, ScoredChunk { chunk, score })
        })
        .collect();

    Ok(hits)
}
