// Prompt templates
// Fixed assistant instructions with slots for retrieved context, the question and history


use std::sync::LazyLock;

use fancy_regex::Regex;

use crate::config::AssistantConfig;
use crate::{RagError, Result};

static SLOT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("valid regex"));

const PLAIN_TEMPLATE: &str = "You are an assistant for {institution}, an educational institute.
Your goal is to answer users' questions regarding {topics} based on the provided CONTEXT.

Guidelines:

Provide a direct and concise answer.
If the answer is present in the CONTEXT, respond exactly as stated.
Do not include reasoning, explanations, or any analysis of the context.
If the CONTEXT does not answer the question or if the query is unrelated to {topics}, redirect the user to {fallback_contact}.
Never use \"Assistant:\" or \"Answer:\" before your response. Answer directly and clearly.

CONTEXT:
{context}

QUESTION:
{question}

ANSWER:";

const CONVERSATIONAL_TEMPLATE: &str = "You are an assistant for {institution}, an educational institute.
Your goal is to answer users' questions regarding {topics} based on the provided CONTEXT.

Guidelines:

Provide a direct and concise answer.
Use the CHAT HISTORY only to understand what a follow-up question refers to. Facts must come from the CONTEXT.
If the answer is present in the CONTEXT, respond exactly as stated.
Do not include reasoning, explanations, or any analysis of the context.
If the CONTEXT does not answer the question or if the query is unrelated to {topics}, redirect the user to {fallback_contact}.
Never use \"Assistant:\" or \"Answer:\" before your response. Answer directly and clearly.

CHAT HISTORY:
{chat_history}

CONTEXT:
{context}

QUESTION:
{question}

ANSWER:";

/// Values filled in per request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptSlots<'a> {
    pub context: &'a str,
    pub question: &'a str,
    pub chat_history: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Context,
    Question,
    ChatHistory,
}

impl Slot {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "context" => Some(Self::Context),
            "question" => Some(Self::Question),
            "chat_history" => Some(Self::ChatHistory),
            _ => None,
        }
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Question => "question",
            Self::ChatHistory => "chat_history",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(Slot),
}

/// A parsed template with the persona already bound.
///
/// Filled values are copied in verbatim; braces inside them are never
/// treated as slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: &'static str,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Single-question template: `context` and `question`
    #[inline]
    pub fn plain(persona: &AssistantConfig) -> Result<Self> {
        Self::parse("plain", PLAIN_TEMPLATE, persona)
    }

    /// Follow-up aware template: adds `chat_history`
    #[inline]
    pub fn conversational(persona: &AssistantConfig) -> Result<Self> {
        Self::parse("conversational", CONVERSATIONAL_TEMPLATE, persona)
    }

    fn parse(name: &'static str, text: &str, persona: &AssistantConfig) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut last = 0;

        for captures in SLOT_PATTERN.captures_iter(text) {
            let captures = captures
                .map_err(|e| RagError::Other(anyhow::anyhow!("Failed to scan template: {}", e)))?;
            let (Some(whole), Some(slot_name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };

            literal.push_str(text.get(last..whole.start()).unwrap_or_default());
            last = whole.end();

            match slot_name.as_str() {
                "institution" => literal.push_str(&persona.institution),
                "topics" => literal.push_str(&persona.topics),
                "fallback_contact" => literal.push_str(&persona.fallback_contact),
                other => match Slot::from_name(other) {
                    Some(slot) => {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        segments.push(Segment::Slot(slot));
                    }
                    None => literal.push_str(whole.as_str()),
                },
            }
        }

        literal.push_str(text.get(last..).unwrap_or_default());
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { name, segments })
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Slots in the order they appear
    #[inline]
    pub fn slots(&self) -> Vec<Slot> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Slot(slot) => Some(*slot),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Fill every slot. A slot without a value is an error.
    #[inline]
    pub fn render(&self, values: &PromptSlots<'_>) -> Result<String> {
        let mut prompt = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => prompt.push_str(text),
                Segment::Slot(Slot::Context) => prompt.push_str(values.context),
                Segment::Slot(Slot::Question) => prompt.push_str(values.question),
                Segment::Slot(Slot::ChatHistory) => {
                    let history = values.chat_history.ok_or_else(|| {
                        RagError::InvalidInput(format!(
                            "The {} template needs a value for {}",
                            self.name,
                            Slot::ChatHistory.name()
                        ))
                    })?;
                    prompt.push_str(history);
                }
            }
        }

        Ok(prompt)
    }
}
