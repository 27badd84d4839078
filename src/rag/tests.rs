use super::*;
use crate::embeddings::{Chunk, ChunkingConfig};
use crate::index::{BuildOptions, IndexBackend, build_index};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Two-dimensional embedding: does the text mention fees or parking?
#[derive(Default)]
struct TopicEmbedder {
    calls: AtomicUsize,
    fail: bool,
}

impl Embedder for TopicEmbedder {
    fn model(&self) -> &str {
        "topics"
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RagError::Embedding("embedding server down".to_string()));
        }
        Ok(texts
            .iter()
            .map(|text| {
                let text = text.to_lowercase();
                let fees = if text.contains("tuition") { 1.0 } else { 0.1 };
                let parking = if text.contains("parking") { 1.0 } else { 0.1 };
                vec![fees, parking]
            })
            .collect())
    }
}

/// Replies with a fixed text and records each prompt
struct RecordingGenerator {
    reply: Result<String>,
    prompts: Mutex<Vec<(String, f32)>>,
}

impl RecordingGenerator {
    fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            reply: Err(RagError::Other(anyhow::anyhow!("connection reset"))),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<(String, f32)> {
        self.prompts.lock().expect("lock should not be poisoned").clone()
    }
}

impl Generator for RecordingGenerator {
    fn model(&self) -> &str {
        "recording"
    }

    fn generate(&self, prompt: &str, temperature: f32) -> Result<String> {
        self.prompts
            .lock()
            .expect("lock should not be poisoned")
            .push((prompt.to_string(), temperature));
        match &self.reply {
            Ok(reply) => Ok(reply.clone()),
            Err(e) => Err(RagError::Other(anyhow::anyhow!("{}", e))),
        }
    }
}

fn chunk(source_id: &str, text: &str) -> Chunk {
    Chunk {
        text: text.to_string(),
        source_id: source_id.to_string(),
        sequence: 0,
        start_offset: 0,
        overlap: 0,
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.retrieval.k = 1;
    config.generation.temperature = 0.3;
    config.generation.max_question_chars = 40;
    config.generation.max_history_turns = 1;
    config
}

async fn engine(
    embedder: Arc<TopicEmbedder>,
    generator: Arc<RecordingGenerator>,
) -> (RagEngine, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let chunks = vec![
        chunk("fees.txt", "Tuition is due on the 5th of each month."),
        chunk("campus.txt", "Parking is free for students."),
    ];
    let index = build_index(
        &temp_dir.path().join("index"),
        &chunks,
        &TopicEmbedder::default(),
        &BuildOptions {
            backend: IndexBackend::Flat,
            batch_size: 8,
            chunking: ChunkingConfig::default(),
        },
    )
    .await
    .expect("should build index");

    let engine =
        RagEngine::new(index, embedder, generator, &test_config()).expect("should create engine");
    (engine, temp_dir)
}

#[tokio::test]
async fn answer_builds_prompt_from_retrieved_context() {
    let generator = Arc::new(RecordingGenerator::replying(
        "<think>The context mentions the 5th.</think>\nThe 5th of each month.",
    ));
    let (engine, _temp_dir) =
        engine(Arc::new(TopicEmbedder::default()), Arc::clone(&generator)).await;

    let answer = engine
        .answer("  When is tuition due?  ")
        .await
        .expect("should answer");

    assert_eq!(answer.question, "When is tuition due?");
    assert_eq!(answer.answer, "The 5th of each month.");
    assert_eq!(answer.status, AnswerStatus::Answered);
    assert_eq!(answer.sources, vec!["fees.txt".to_string()]);

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    let (prompt, temperature) = &prompts[0];
    assert!((temperature - 0.3).abs() < f32::EPSILON);
    assert!(prompt.contains("CONTEXT:\nTuition is due on the 5th of each month.\n\nQUESTION:"));
    assert!(prompt.contains("QUESTION:\nWhen is tuition due?\n"));
    assert!(!prompt.contains("Parking"));
    assert!(!prompt.contains("CHAT HISTORY"));
}

#[tokio::test]
async fn fallback_reply_is_flagged() {
    let reply = format!(
        "Please contact {}.",
        test_config().assistant.fallback_contact
    );
    let generator = Arc::new(RecordingGenerator::replying(&reply));
    let (engine, _temp_dir) = engine(Arc::new(TopicEmbedder::default()), generator).await;

    let answer = engine
        .answer("What is the capital of France?")
        .await
        .expect("should answer");

    assert_eq!(answer.status, AnswerStatus::Fallback);
    assert_eq!(answer.answer, reply);
}

#[tokio::test]
async fn invalid_questions_never_reach_retrieval() {
    let embedder = Arc::new(TopicEmbedder::default());
    let generator = Arc::new(RecordingGenerator::replying("unused"));
    let (engine, _temp_dir) = engine(Arc::clone(&embedder), Arc::clone(&generator)).await;

    let long = "x".repeat(41);
    for question in ["", "   \n", long.as_str()] {
        let result = engine.answer(question).await;
        assert!(
            matches!(result, Err(RagError::Validation(_))),
            "{:?} should be rejected",
            question
        );
    }

    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    assert!(generator.prompts().is_empty());
    assert!(engine.validate_question(&"x".repeat(40)).is_ok());
}

#[tokio::test]
async fn embedding_failure_is_a_retrieval_error() {
    let embedder = Arc::new(TopicEmbedder {
        fail: true,
        ..TopicEmbedder::default()
    });
    let generator = Arc::new(RecordingGenerator::replying("unused"));
    let (engine, _temp_dir) = engine(embedder, Arc::clone(&generator)).await;

    let result = engine.answer("When is tuition due?").await;

    assert!(matches!(result, Err(RagError::Retrieval(_))));
    assert!(generator.prompts().is_empty());
}

#[tokio::test]
async fn generator_failure_is_a_generation_error() {
    let generator = Arc::new(RecordingGenerator::failing());
    let (engine, _temp_dir) = engine(Arc::new(TopicEmbedder::default()), generator).await;

    let result = engine.answer("When is tuition due?").await;
    assert!(matches!(result, Err(RagError::Generation(_))));
}

#[tokio::test]
async fn history_is_rendered_and_recorded() {
    let generator = Arc::new(RecordingGenerator::replying("Free."));
    let (engine, _temp_dir) =
        engine(Arc::new(TopicEmbedder::default()), Arc::clone(&generator)).await;
    let mut memory = ConversationMemory::new();

    engine
        .answer_with_history("Is parking free?", &mut memory)
        .await
        .expect("first turn should succeed");
    engine
        .answer_with_history("And for staff?", &mut memory)
        .await
        .expect("second turn should succeed");

    assert_eq!(memory.len(), 2);
    assert_eq!(memory.turns()[0].question, "Is parking free?");
    assert_eq!(memory.turns()[1].question, "And for staff?");

    let prompts = generator.prompts();
    assert!(prompts[0].0.contains("CHAT HISTORY:\nNone.\n"));
    assert!(
        prompts[1]
            .0
            .contains("CHAT HISTORY:\nUser: Is parking free?\nAssistant: Free.\n")
    );
}

#[tokio::test]
async fn failed_turn_is_not_recorded() {
    let generator = Arc::new(RecordingGenerator::failing());
    let (engine, _temp_dir) = engine(Arc::new(TopicEmbedder::default()), generator).await;
    let mut memory = ConversationMemory::new();
    memory.push(ConversationTurn::new("earlier", "answer"));

    let result = engine.answer_with_history("Is parking free?", &mut memory).await;

    assert!(result.is_err());
    assert_eq!(memory.len(), 1);
}

#[test]
fn answer_status_display() {
    assert_eq!(AnswerStatus::Answered.to_string(), "answered");
    assert_eq!(AnswerStatus::Fallback.to_string(), "fallback");
}
