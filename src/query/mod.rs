//! Retrieval-augmented question answering
//!
//! A query runs through fixed stages:
//! - Recognition: propose card names mentioned in the question
//! - Resolution: look the candidates up in the store
//! - Context assembly: build the retrieval representation
//! - Retrieval: probe the vector index with the question and its spans
//! - Generation: ask the language model, grounded in what was found

mod chunk;
mod recognize;

pub use chunk::{chunk_query, extract_rule_numbers};
pub use recognize::{
    decode_bio, tokenize_query, BioTag, CardRecognizer, PatternRecognizer, TaggerRecognizer,
    TokenTagger,
};

use crate::index::{EmbeddingProvider, Retriever, SearchHit, VectorIndex};
use crate::llm::{Answer, AnswerGenerator, AnswerRequest, CompletionModel};
use crate::storage::{CardDetails, Database, RuleWithChildren};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// A query failure, tagged with the stage that failed
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Card recognition failed: {0}")]
    Recognition(String),

    #[error("Card resolution failed: {0}")]
    Resolution(String),

    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Answer generation failed: {0}")]
    Generation(String),
}

impl QueryError {
    /// Name of the failed stage
    pub fn stage(&self) -> &'static str {
        match self {
            QueryError::Recognition(_) => "recognition",
            QueryError::Resolution(_) => "resolution",
            QueryError::Retrieval(_) => "retrieval",
            QueryError::Generation(_) => "generation",
        }
    }
}

/// Tuning for one pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Hits requested per probe
    pub top_k: usize,
    /// Hits scoring below this are dropped
    pub min_score: f64,
    /// Cap on merged passages handed to the model
    pub max_context_docs: usize,
    /// Sentences longer than this are split into clauses
    pub chunk_max_chars: usize,
    pub max_retries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.0,
            max_context_docs: 8,
            chunk_max_chars: 120,
            max_retries: 3,
        }
    }
}

/// Everything retrieved for one question
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalContext {
    /// Names the recognizer proposed
    pub candidates: Vec<String>,
    /// Candidates that matched a stored card
    pub cards: Vec<CardDetails>,
    /// Candidates that matched nothing and are not part of a matched name
    pub unresolved: Vec<String>,
    /// Rules the question cites by number
    pub rules: Vec<RuleWithChildren>,
    /// Merged index hits, best first
    pub passages: Vec<SearchHit>,
    /// Text embedded for the main probe
    pub representation: String,
}

/// Result of a successful query
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub id: String,
    pub question: String,
    pub answer: Answer,
    pub context: RetrievalContext,
    pub answered_at: DateTime<Utc>,
}

/// Question-answering pipeline over a store, an index and a language model
///
/// Holds no per-query state; a failed query leaves it ready for the next.
pub struct QueryPipeline<'a> {
    db: &'a Database,
    index: &'a VectorIndex,
    embedder: &'a dyn EmbeddingProvider,
    model: &'a dyn CompletionModel,
    recognizer: Box<dyn CardRecognizer + 'a>,
    config: PipelineConfig,
}

impl<'a> QueryPipeline<'a> {
    /// Create a pipeline with the pattern recognizer and default tuning
    pub fn new(
        db: &'a Database,
        index: &'a VectorIndex,
        embedder: &'a dyn EmbeddingProvider,
        model: &'a dyn CompletionModel,
    ) -> Self {
        Self {
            db,
            index,
            embedder,
            model,
            recognizer: Box::new(PatternRecognizer::new()),
            config: PipelineConfig::default(),
        }
    }

    /// Use a different card recognizer
    pub fn with_recognizer(mut self, recognizer: Box<dyn CardRecognizer + 'a>) -> Self {
        self.recognizer = recognizer;
        self
    }

    /// Use custom tuning
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage except generation
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalContext, QueryError> {
        let candidates = self
            .recognizer
            .recognize(question)
            .map_err(|e| QueryError::Recognition(format!("{:#}", e)))?;
        tracing::debug!("Recognized candidates: {:?}", candidates);

        let (cards, unresolved) = self.resolve_cards(&candidates)?;
        let rules = self.lookup_cited_rules(question)?;
        let representation = build_representation(question, &cards);
        let passages = self.retrieve_passages(question, &representation).await?;

        tracing::info!(
            "Retrieved {} cards, {} cited rules, {} passages",
            cards.len(),
            rules.len(),
            passages.len()
        );

        Ok(RetrievalContext {
            candidates,
            cards,
            unresolved,
            rules,
            passages,
            representation,
        })
    }

    /// Answer a question
    pub async fn answer(&self, question: &str) -> Result<QueryOutcome, QueryError> {
        let result = self.answer_inner(question).await;
        if let Err(ref e) = result {
            tracing::error!("Query failed at {} stage: {}", e.stage(), e);
        }
        result
    }

    async fn answer_inner(&self, question: &str) -> Result<QueryOutcome, QueryError> {
        let context = self.retrieve(question).await?;

        let request = AnswerRequest {
            question: question.to_string(),
            cards: context.cards.clone(),
            rules: context.rules.clone(),
            passages: context.passages.clone(),
        };

        let answer = AnswerGenerator::new(self.model, self.config.max_retries)
            .generate(&request)
            .await
            .map_err(|e| QueryError::Generation(format!("{:#}", e)))?;

        Ok(QueryOutcome {
            id: uuid::Uuid::new_v4().to_string(),
            question: question.to_string(),
            answer,
            context,
            answered_at: Utc::now(),
        })
    }

    /// Look up every candidate; names with no stored card are dropped
    ///
    /// A miss is logged as a warning unless the candidate is a fragment of a
    /// card that did resolve, such as "Jace" next to "Jace, the Mind Sculptor".
    fn resolve_cards(
        &self,
        candidates: &[String],
    ) -> Result<(Vec<CardDetails>, Vec<String>), QueryError> {
        let mut seen = HashSet::new();
        let mut cards = Vec::new();
        let mut misses = Vec::new();

        for name in candidates {
            let matches = self
                .db
                .get_cards_by_name(name)
                .map_err(|e| QueryError::Resolution(format!("{:#}", e)))?;

            if matches.is_empty() {
                misses.push(name.clone());
            }

            for card in matches {
                if seen.insert(card.card.oracle_id.clone()) {
                    cards.push(card);
                }
            }
        }

        let resolved_names: Vec<String> =
            cards.iter().map(|card| card.card.name.to_lowercase()).collect();
        let unresolved: Vec<String> = misses
            .into_iter()
            .filter(|name| {
                let name = name.to_lowercase();
                !resolved_names.iter().any(|resolved| resolved.contains(&name))
            })
            .collect();

        for name in &unresolved {
            tracing::warn!("No card named '{}', dropping it", name);
        }

        Ok((cards, unresolved))
    }

    fn lookup_cited_rules(&self, question: &str) -> Result<Vec<RuleWithChildren>, QueryError> {
        let mut rules = Vec::new();

        for number in extract_rule_numbers(question) {
            match self.db.get_rule_with_children(&number) {
                Ok(Some(rule)) => rules.push(rule),
                Ok(None) => tracing::warn!("Question cites rule {} which is not stored", number),
                Err(e) => return Err(QueryError::Retrieval(format!("{:#}", e))),
            }
        }

        Ok(rules)
    }

    /// Probe the index with the representation, the question and each span
    ///
    /// Hits are merged by content keeping the best score, then capped.
    async fn retrieve_passages(
        &self,
        question: &str,
        representation: &str,
    ) -> Result<Vec<SearchHit>, QueryError> {
        let retriever = Retriever::new(self.config.top_k, self.config.min_score);

        let mut probes = vec![representation.to_string(), question.to_string()];
        probes.extend(chunk_query(question, self.config.chunk_max_chars));

        let mut seen_probes = HashSet::new();
        let mut merged: Vec<SearchHit> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();

        for probe in probes {
            if probe.trim().is_empty() || !seen_probes.insert(probe.clone()) {
                continue;
            }

            let hits = retriever
                .retrieve(self.index, &probe, self.embedder)
                .await
                .map_err(|e| QueryError::Retrieval(e.to_string()))?;

            for hit in hits {
                match positions.get(&hit.content) {
                    Some(&i) => {
                        if hit.score > merged[i].score {
                            merged[i] = hit;
                        }
                    }
                    None => {
                        positions.insert(hit.content.clone(), merged.len());
                        merged.push(hit);
                    }
                }
            }
        }

        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        merged.truncate(self.config.max_context_docs);

        Ok(merged)
    }
}

/// Resolved card details followed by the question, or the bare question
fn build_representation(question: &str, cards: &[CardDetails]) -> String {
    if cards.is_empty() {
        return question.to_string();
    }

    let mut text = cards
        .iter()
        .map(CardDetails::to_context)
        .collect::<Vec<_>>()
        .join("\n\n");
    text.push_str("\n\n");
    text.push_str(question);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Card, Document, Rule, Ruling};
    use crate::index::MockEmbedding;
    use crate::llm::MockLlmClient;

    struct FailingRecognizer;

    impl CardRecognizer for FailingRecognizer {
        fn recognize(&self, _question: &str) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("tagger offline")
        }
    }

    fn store() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_card(&Card {
            oracle_id: "abc".to_string(),
            name: "Serra Angel".to_string(),
            type_line: Some("Creature — Angel".to_string()),
            oracle_text: Some("Flying, vigilance".to_string()),
            ..Default::default()
        })
        .unwrap();
        db.insert_ruling(&Ruling {
            oracle_id: "abc".to_string(),
            comment: "Vigilance means attacking doesn't cause it to tap.".to_string(),
            ..Default::default()
        })
        .unwrap();
        db.upsert_rule(&Rule::new("702.20", "Vigilance")).unwrap();
        db.upsert_rule(&Rule::new("702.20a", "Vigilance is a static ability.")).unwrap();
        db
    }

    async fn index(embedder: &MockEmbedding) -> VectorIndex {
        let documents = vec![
            Document::Rule(Rule::new("702.20a", "Vigilance is a static ability. Attacking doesn't cause creatures with vigilance to tap.")).normalize(),
            Document::Rule(Rule::new("702.9a", "Flying is an evasion ability.")).normalize(),
            Document::Rule(Rule::new("104.3a", "A player can concede the game at any time.")).normalize(),
        ];
        VectorIndex::build("mtg", &documents, embedder, 10).await.unwrap()
    }

    #[tokio::test]
    async fn test_retrieve_resolves_cards_and_rules() {
        let db = store();
        let embedder = MockEmbedding::new(256);
        let index = index(&embedder).await;
        let model = MockLlmClient::new();

        let pipeline = QueryPipeline::new(&db, &index, &embedder, &model);
        let context = pipeline
            .retrieve("Does Serra Angel tap when attacking? See rule 702.20.")
            .await
            .unwrap();

        assert!(context.candidates.contains(&"Serra Angel".to_string()));
        assert_eq!(context.cards.len(), 1);
        assert!(context.representation.starts_with("Serra Angel"));
        assert_eq!(context.rules.len(), 1);
        assert_eq!(context.rules[0].children.len(), 1);
        assert_eq!(context.passages[0].id, "rule_702_20a");

        let contents: HashSet<&str> = context.passages.iter().map(|p| p.content.as_str()).collect();
        assert_eq!(contents.len(), context.passages.len());
    }

    #[tokio::test]
    async fn test_unknown_names_are_dropped() {
        let db = store();
        let embedder = MockEmbedding::new(256);
        let index = index(&embedder).await;
        let model = MockLlmClient::new();

        let context = QueryPipeline::new(&db, &index, &embedder, &model)
            .retrieve("Can Imaginary Card concede?")
            .await
            .unwrap();

        assert_eq!(context.candidates, vec!["Imaginary Card"]);
        assert!(context.cards.is_empty());
        assert_eq!(context.unresolved, vec!["Imaginary Card"]);
        assert_eq!(context.representation, "Can Imaginary Card concede?");
    }

    #[tokio::test]
    async fn test_comma_name_resolves_with_legality_in_prompt() {
        let db = store();
        let mut legalities = std::collections::BTreeMap::new();
        legalities.insert("modern".to_string(), "banned".to_string());
        legalities.insert("legacy".to_string(), "legal".to_string());
        db.upsert_card(&Card {
            oracle_id: "jtms".to_string(),
            name: "Jace, the Mind Sculptor".to_string(),
            type_line: Some("Legendary Planeswalker — Jace".to_string()),
            legalities,
            ..Default::default()
        })
        .unwrap();

        let embedder = MockEmbedding::new(256);
        let index = index(&embedder).await;
        let model = MockLlmClient::new();

        let outcome = QueryPipeline::new(&db, &index, &embedder, &model)
            .answer("Is Jace, the Mind Sculptor legal in Modern?")
            .await
            .unwrap();

        assert_eq!(outcome.context.candidates[0], "Jace, the Mind Sculptor");
        assert_eq!(outcome.context.cards.len(), 1);
        assert_eq!(outcome.context.cards[0].card.oracle_id, "jtms");
        assert!(outcome.context.unresolved.contains(&"Modern".to_string()));
        assert!(!outcome.context.unresolved.contains(&"Jace".to_string()));
        assert!(model.prompts()[0].contains("modern: banned"));
    }

    #[tokio::test]
    async fn test_answer_uses_context() {
        let db = store();
        let embedder = MockEmbedding::new(256);
        let index = index(&embedder).await;
        let mut model = MockLlmClient::new();
        model.add_response("Flying, vigilance", "No, vigilance means it stays untapped.");

        let outcome = QueryPipeline::new(&db, &index, &embedder, &model)
            .answer("Does Serra Angel tap when it attacks?")
            .await
            .unwrap();

        assert_eq!(outcome.answer.text, "No, vigilance means it stays untapped.");
        assert!(!outcome.id.is_empty());
        assert!(model.prompts()[0].contains("Vigilance means attacking doesn't cause it to tap."));
    }

    #[tokio::test]
    async fn test_stage_failures_are_reported() {
        let db = store();
        let embedder = MockEmbedding::new(256);
        let index = index(&embedder).await;

        let model = MockLlmClient::new();
        let pipeline = QueryPipeline::new(&db, &index, &embedder, &model)
            .with_recognizer(Box::new(FailingRecognizer));
        let err = pipeline.answer("Anything?").await.unwrap_err();
        assert_eq!(err.stage(), "recognition");

        let failing = MockLlmClient::failing();
        let pipeline = QueryPipeline::new(&db, &index, &embedder, &failing).with_config(PipelineConfig {
            max_retries: 1,
            ..Default::default()
        });
        let err = pipeline.answer("Can a player concede?").await.unwrap_err();
        assert!(matches!(err, QueryError::Generation(_)));

        let wrong_dimension = MockEmbedding::new(8);
        let pipeline = QueryPipeline::new(&db, &index, &wrong_dimension, &model);
        let err = pipeline.answer("Can a player concede?").await.unwrap_err();
        assert_eq!(err.stage(), "retrieval");

        // The pipeline is stateless, so a good query still works afterwards
        let pipeline = QueryPipeline::new(&db, &index, &embedder, &model);
        assert!(pipeline.answer("Can a player concede?").await.is_ok());
    }
}
