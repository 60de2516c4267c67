//! LLM-backed answer generation
//!
//! This module handles:
//! - Talking to Ollama and OpenAI-compatible services
//! - Building the answer prompt from retrieved context
//! - Retrying failed generations

mod client;
mod prompts;

pub use client::{CompletionModel, LlmClient, LlmConfig, LlmProvider, LlmResponse, MockLlmClient};
pub use prompts::{AnswerPrompt, INSUFFICIENT_INFORMATION};

use crate::index::SearchHit;
use crate::storage::{CardDetails, RuleWithChildren};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Everything the model sees for one question
#[derive(Debug, Clone, Default)]
pub struct AnswerRequest {
    pub question: String,
    /// Cards recognized in the question, with rulings
    pub cards: Vec<CardDetails>,
    /// Rules the question cites by number
    pub rules: Vec<RuleWithChildren>,
    /// Passages from the vector index, best first
    pub passages: Vec<SearchHit>,
}

impl AnswerRequest {
    /// Create a request with no context yet
    pub fn new(question: &str) -> Self {
        Self {
            question: question.to_string(),
            ..Default::default()
        }
    }

    /// Generate the prompt for this request
    pub fn to_prompt(&self) -> String {
        AnswerPrompt::generate(&self.question, &self.cards, &self.rules, &self.passages)
    }
}

/// A generated answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub tokens_used: Option<usize>,
}

impl Answer {
    /// Whether the model declined for lack of context
    pub fn is_insufficient(&self) -> bool {
        self.text.contains(INSUFFICIENT_INFORMATION)
    }
}

/// Answers requests through a completion model
pub struct AnswerGenerator<'a> {
    model: &'a dyn CompletionModel,
    max_retries: usize,
}

impl<'a> AnswerGenerator<'a> {
    /// Create a new answer generator
    pub fn new(model: &'a dyn CompletionModel, max_retries: usize) -> Self {
        Self { model, max_retries }
    }

    /// Generate an answer for a request
    pub async fn generate(&self, request: &AnswerRequest) -> Result<Answer> {
        let prompt = request.to_prompt();
        tracing::debug!("Answer prompt is {} characters", prompt.len());

        let response = self
            .model
            .complete_with_retry(&prompt, self.max_retries)
            .await?;

        Ok(Answer {
            text: response.content.trim().to_string(),
            tokens_used: response.tokens_used,
        })
    }
}
