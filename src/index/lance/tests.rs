use super::*;
use crate::embeddings::ChunkingConfig;
use crate::index::IndexBackend;
use chrono::Utc;
use tempfile::TempDir;

fn record(sequence: usize, text: &str, vector: Vec<f32>) -> IndexedChunk {
    IndexedChunk {
        chunk: Chunk {
            text: text.to_string(),
            source_id: "handbook.md".to_string(),
            sequence,
            start_offset: sequence * 10,
            overlap: usize::from(sequence > 0),
        },
        vector,
    }
}

fn manifest(chunk_count: usize) -> IndexManifest {
    IndexManifest {
        backend: IndexBackend::Lance,
        embedding_model: "test-embed".to_string(),
        dimension: 3,
        chunk_count,
        chunking: ChunkingConfig::default(),
        created_at: Utc::now(),
    }
}

async fn open_with(records: &[IndexedChunk]) -> (LanceIndex, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    write_records(temp_dir.path(), records)
        .await
        .expect("should write records");
    let index = LanceIndex::open(temp_dir.path(), manifest(records.len()))
        .await
        .expect("should open lance index");
    (index, temp_dir)
}

#[test]
fn record_batch_matches_schema() {
    let records = vec![
        record(0, "alpha", vec![1.0, 0.0, 0.0]),
        record(1, "beta", vec![0.0, 1.0, 0.0]),
    ];

    let batch = create_record_batch(&records).expect("should build batch");

    assert_eq!(batch.num_rows(), 2);
    assert_eq!(batch.schema(), create_schema(3));
    let positions = column::<UInt32Array>(&batch, "position").expect("position column");
    assert_eq!(positions.values().to_vec(), vec![0, 1]);
}

#[tokio::test]
async fn stores_every_record() {
    let (index, _temp_dir) = open_with(&[
        record(0, "alpha", vec![1.0, 0.0, 0.0]),
        record(1, "beta", vec![0.0, 1.0, 0.0]),
        record(2, "gamma", vec![0.0, 0.0, 1.0]),
    ])
    .await;

    assert_eq!(index.count_rows().await.expect("should count rows"), 3);
    assert_eq!(index.len(), 3);
    assert_eq!(index.backend(), IndexBackend::Lance);
}

#[tokio::test]
async fn query_returns_nearest_first() {
    let (index, _temp_dir) = open_with(&[
        record(0, "alpha", vec![1.0, 0.0, 0.0]),
        record(1, "beta", vec![0.0, 1.0, 0.0]),
        record(2, "alpha-ish", vec![0.9, 0.1, 0.0]),
    ])
    .await;

    let result = index
        .query(&[1.0, 0.0, 0.0], 2)
        .await
        .expect("query should succeed");

    assert_eq!(result.texts(), vec!["alpha", "alpha-ish"]);
    assert!(result.hits[0].score >= result.hits[1].score);
    assert!((result.hits[0].score - 1.0).abs() < 1e-4);

    let top = &result.hits[0].chunk;
    assert_eq!(top.source_id, "handbook.md");
    assert_eq!(top.sequence, 0);
}

#[tokio::test]
async fn query_validates_input() {
    let (index, _temp_dir) = open_with(&[record(0, "alpha", vec![1.0, 0.0, 0.0])]).await;

    assert!(matches!(
        index.query(&[1.0, 0.0, 0.0], 0).await,
        Err(RagError::InvalidInput(_))
    ));
    assert!(matches!(
        index.query(&[1.0, 0.0], 1).await,
        Err(RagError::Retrieval(_))
    ));
}

#[tokio::test]
async fn equal_distances_keep_insertion_order() {
    let records: Vec<IndexedChunk> = (0..200)
        .map(|i| record(i, &format!("c{}", i), vec![1.0, 0.0, 0.0]))
        .collect();
    let (index, _temp_dir) = open_with(&records).await;

    let result = index
        .query(&[1.0, 0.0, 0.0], 4)
        .await
        .expect("query should succeed");

    assert_eq!(result.texts(), vec!["c0", "c1", "c2", "c3"]);
}
