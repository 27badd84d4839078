use super::*;
use crate::index::IndexBackend;
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

#[derive(Default)]
struct CountingEmbedder {
    calls: AtomicUsize,
}

impl Embedder for CountingEmbedder {
    fn model(&self) -> &str {
        "counting"
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| vec![text.len() as f32, 1.0])
            .collect())
    }
}

struct EchoGenerator;

impl Generator for EchoGenerator {
    fn model(&self) -> &str {
        "echo"
    }

    fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String> {
        Ok("ok".to_string())
    }
}

fn config_in(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.paths.docs_folder = temp_dir.path().join("docs");
    config.paths.index_path = temp_dir.path().join("index");
    config.retrieval.backend = IndexBackend::Flat;
    config
}

#[tokio::test]
async fn builds_then_reuses_index() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = config_in(&temp_dir);
    fs::create_dir_all(config.docs_folder()).expect("should create docs folder");
    fs::write(
        config.docs_folder().join("fees.txt"),
        "Tuition is due on the 5th of each month.",
    )
    .expect("should write doc");

    let embedder = Arc::new(CountingEmbedder::default());
    let app = AppContext::with_services(
        config.clone(),
        Arc::clone(&embedder) as Arc<dyn Embedder>,
        Arc::new(EchoGenerator),
    )
    .await
    .expect("first start should build");
    assert_eq!(app.index_len(), 1);
    assert_eq!(app.config(), &config);
    let calls_after_build = embedder.calls.load(Ordering::SeqCst);
    assert!(calls_after_build > 0);

    let app = AppContext::with_services(
        config,
        Arc::clone(&embedder) as Arc<dyn Embedder>,
        Arc::new(EchoGenerator),
    )
    .await
    .expect("second start should load");
    assert_eq!(app.index_len(), 1);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), calls_after_build);
    assert_eq!(app.index().backend(), IndexBackend::Flat);
}

#[tokio::test]
async fn empty_docs_folder_is_empty_corpus() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = config_in(&temp_dir);
    fs::create_dir_all(config.docs_folder()).expect("should create docs folder");

    let result = AppContext::with_services(
        config,
        Arc::new(CountingEmbedder::default()),
        Arc::new(EchoGenerator),
    )
    .await;

    assert!(matches!(result, Err(RagError::EmptyCorpus(_))));
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = config_in(&temp_dir);
    config.retrieval.k = 0;

    let result = AppContext::with_services(
        config,
        Arc::new(CountingEmbedder::default()),
        Arc::new(EchoGenerator),
    )
    .await;

    assert!(matches!(result, Err(RagError::Config(_))));
}
