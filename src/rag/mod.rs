// RAG orchestration
// Validates a question, retrieves context, prompts the generator and scrubs the reply

#[cfg(test)]
mod tests;

pub mod memory;
pub mod prompt;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::Config;
use crate::embeddings::Embedder;
use crate::index::{RetrievalResult, VectorIndex};
use crate::scrub::strip_reasoning;
use crate::{RagError, Result};

pub use memory::{ConversationMemory, ConversationTurn};
pub use prompt::{PromptSlots, PromptTemplate, Slot};

/// Separator between retrieved chunks in the prompt context
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Text completion backend
pub trait Generator: Send + Sync {
    /// Identifier of the generation model
    fn model(&self) -> &str;

    fn generate(&self, prompt: &str, temperature: f32) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerStatus {
    Answered,
    /// The reply redirects the user to the fallback contact
    Fallback,
}

impl fmt::Display for AnswerStatus {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answered => f.write_str("answered"),
            Self::Fallback => f.write_str("fallback"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub question: String,
    pub answer: String,
    pub status: AnswerStatus,
    /// Distinct source documents of the retrieved context, in rank order
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Received,
    Validated,
    Retrieved,
    Prompted,
    Generated,
    Scrubbed,
    Returned,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Retrieved => "retrieved",
            Self::Prompted => "prompted",
            Self::Generated => "generated",
            Self::Scrubbed => "scrubbed",
            Self::Returned => "returned",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-request tunables taken from configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub k: usize,
    pub temperature: f32,
    pub max_question_chars: usize,
    pub max_history_turns: usize,
    pub fallback_contact: String,
}

impl EngineSettings {
    #[inline]
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.retrieval.k,
            temperature: config.generation.temperature,
            max_question_chars: config.generation.max_question_chars,
            max_history_turns: config.generation.max_history_turns,
            fallback_contact: config.assistant.fallback_contact.clone(),
        }
    }
}

/// Answers questions against one loaded index
pub struct RagEngine {
    index: Box<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    plain: PromptTemplate,
    conversational: PromptTemplate,
    settings: EngineSettings,
}

impl RagEngine {
    #[inline]
    pub fn new(
        index: Box<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            index,
            embedder,
            generator,
            plain: PromptTemplate::plain(&config.assistant)?,
            conversational: PromptTemplate::conversational(&config.assistant)?,
            settings: EngineSettings::from_config(config),
        })
    }

    #[inline]
    pub fn index(&self) -> &dyn VectorIndex {
        self.index.as_ref()
    }

    #[inline]
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Answer a standalone question
    #[inline]
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        self.run(question, None).await
    }

    /// Answer a follow-up question, recording the turn in `memory` on success
    #[inline]
    pub async fn answer_with_history(
        &self,
        question: &str,
        memory: &mut ConversationMemory,
    ) -> Result<Answer> {
        let history = memory.render(self.settings.max_history_turns);
        let answer = self.run(question, Some(&history)).await?;
        memory.push(ConversationTurn::new(
            answer.question.clone(),
            answer.answer.clone(),
        ));
        Ok(answer)
    }

    /// Trim and bound-check a question
    #[inline]
    pub fn validate_question<'a>(&self, question: &'a str) -> Result<&'a str> {
        let trimmed = question.trim();
        if trimmed.is_empty() {
            return Err(RagError::Validation("Question cannot be empty".to_string()));
        }

        let length = trimmed.chars().count();
        if length > self.settings.max_question_chars {
            return Err(RagError::Validation(format!(
                "Question is too long ({} characters, max {})",
                length, self.settings.max_question_chars
            )));
        }

        Ok(trimmed)
    }

    async fn run(&self, question: &str, history: Option<&str>) -> Result<Answer> {
        log_stage(Stage::Received);
        let result = self.pipeline(question, history).await;
        match &result {
            Ok(answer) => {
                log_stage(Stage::Returned);
                info!("Answered question ({})", answer.status);
            }
            Err(e) => {
                log_stage(Stage::Failed);
                debug!("Question failed: {}", e);
            }
        }
        result
    }

    async fn pipeline(&self, question: &str, history: Option<&str>) -> Result<Answer> {
        let question = self.validate_question(question)?;
        log_stage(Stage::Validated);

        let retrieved = self.retrieve(question).await?;
        log_stage(Stage::Retrieved);
        debug!("Retrieved {} chunks", retrieved.len());

        let context = retrieved.texts().join(CONTEXT_SEPARATOR);
        let template = if history.is_some() {
            &self.conversational
        } else {
            &self.plain
        };
        let prompt = template.render(&PromptSlots {
            context: &context,
            question,
            chat_history: history,
        })?;
        log_stage(Stage::Prompted);

        let raw = self
            .generator
            .generate(&prompt, self.settings.temperature)
            .map_err(|e| match e {
                RagError::Generation(_) => e,
                other => RagError::Generation(other.to_string()),
            })?;
        log_stage(Stage::Generated);

        let answer = strip_reasoning(&raw);
        log_stage(Stage::Scrubbed);

        let status = self.classify(&answer);
        Ok(Answer {
            question: question.to_string(),
            answer,
            status,
            sources: distinct_sources(&retrieved),
        })
    }

    async fn retrieve(&self, question: &str) -> Result<RetrievalResult> {
        let vector = self
            .embedder
            .embed(question)
            .map_err(|e| RagError::Retrieval(format!("Failed to embed question: {}", e)))?;

        self.index
            .query(&vector, self.settings.k)
            .await
            .map_err(|e| match e {
                RagError::Retrieval(_) => e,
                other => RagError::Retrieval(other.to_string()),
            })
    }

    fn classify(&self, answer: &str) -> AnswerStatus {
        if answer.contains(self.settings.fallback_contact.as_str()) {
            AnswerStatus::Fallback
        } else {
            AnswerStatus::Answered
        }
    }
}

fn log_stage(stage: Stage) {
    debug!("Request stage: {}", stage);
}

fn distinct_sources(retrieved: &RetrievalResult) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for hit in retrieved.iter() {
        if !sources.contains(&hit.chunk.source_id) {
            sources.push(hit.chunk.source_id.clone());
        }
    }
    sources
}
