// Shared fakes for integration tests
#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use docs_rag::config::Config;
use docs_rag::embeddings::Embedder;
use docs_rag::index::IndexBackend;
use docs_rag::rag::Generator;
use docs_rag::{RagError, Result};

const DIMENSION: usize = 64;

/// Deterministic bag-of-words embedding: each word hashes into one of 64 buckets
#[derive(Default)]
pub struct HashingEmbedder {
    batches: AtomicUsize,
}

impl HashingEmbedder {
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

fn bucket(word: &str) -> usize {
    // FNV-1a
    let hash = word.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    });
    (hash % (DIMENSION as u64 - 1)) as usize + 1
}

pub fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        "hashing-test"
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0_f32; DIMENSION];
                // Bias bucket keeps every vector non-zero
                vector[0] = 0.1;
                for word in words(text) {
                    vector[bucket(&word)] += 1.0;
                }
                vector
            })
            .collect())
    }
}

/// Stands in for the LLM: answers with the first context sentence sharing a
/// significant word with the question, otherwise redirects to the fallback
/// contact. Every reply starts with a reasoning block.
pub struct ScriptedGenerator {
    fallback_contact: String,
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(config: &Config) -> Self {
        Self {
            fallback_contact: config.assistant.fallback_contact.clone(),
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail whenever the question contains `word`
    pub fn failing_on(mut self, word: &str) -> Self {
        self.fail_on = Some(word.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn section<'a>(prompt: &'a str, start: &str, end: &str) -> &'a str {
    prompt
        .split_once(start)
        .and_then(|(_, rest)| rest.split_once(end))
        .map_or("", |(section, _)| section)
}

impl Generator for ScriptedGenerator {
    fn model(&self) -> &str {
        "scripted-test"
    }

    fn generate(&self, prompt: &str, _temperature: f32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let question = section(prompt, "QUESTION:\n", "\n\nANSWER:");
        if let Some(word) = &self.fail_on {
            if question.contains(word.as_str()) {
                return Err(RagError::Generation("model crashed".to_string()));
            }
        }

        let context = section(prompt, "CONTEXT:\n", "\n\nQUESTION:");
        let keywords: Vec<String> = words(question).filter(|word| word.len() >= 5).collect();

        let sentence = context
            .split_inclusive(['.', '\n'])
            .map(str::trim)
            .find(|sentence| words(sentence).any(|word| keywords.contains(&word)));

        Ok(match sentence {
            Some(sentence) => format!(
                "<think>\nThe context says: {}\n</think>\n\n{}",
                sentence, sentence
            ),
            None => format!(
                "<think>Nothing relevant.</think>I can only help with college questions. \
                 Please contact {}.",
                self.fallback_contact
            ),
        })
    }
}

pub fn write_doc(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("should create parent dirs");
    }
    fs::write(path, contents).expect("should write doc");
}

/// Configuration rooted in `root`, with docs under `root/docs`
pub fn test_config(root: &Path, backend: IndexBackend) -> Config {
    let mut config = Config {
        base_dir: root.to_path_buf(),
        ..Config::default()
    };
    config.paths.docs_folder = root.join("docs");
    config.paths.index_path = root.join("index");
    config.retrieval.backend = backend;
    config.chunking.chunk_size = 200;
    config.chunking.chunk_overlap = 20;
    config
}
