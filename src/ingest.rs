//! Ingestion of the reference sources
//!
//! Each source is read and parsed on its own blocking task. A source that
//! cannot be read produces no documents and is reported as a failure; the
//! other sources still go through.

use crate::extract::cards::{load_cards, load_rulings};
use crate::extract::document::{normalize_cards, normalize_glossary, normalize_rules};
use crate::extract::{
    combine_cards_and_rulings, parse_glossary, parse_rules, Document, NormalizedDocument,
    SourceKind, SourceOutput, Warning,
};
use crate::storage::Database;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Locations of the four input files
#[derive(Debug, Clone)]
pub struct SourcePaths {
    pub cards: PathBuf,
    pub rulings: PathBuf,
    pub rules: PathBuf,
    pub glossary: PathBuf,
}

/// A source that produced nothing because it could not be read
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: SourceKind,
    pub error: String,
}

/// Everything one ingestion run produced
#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub outputs: Vec<SourceOutput>,
    pub failures: Vec<SourceFailure>,
}

/// Row counts written to the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub cards: usize,
    /// Rulings not already present
    pub rulings_inserted: usize,
    pub rules: usize,
    pub glossary_terms: usize,
}

/// Serializable overview of a report
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub cards: usize,
    pub rules: usize,
    pub glossary_terms: usize,
    pub warnings: Vec<Warning>,
    pub failures: Vec<SourceFailure>,
}

impl IngestReport {
    /// Parsed documents in cards, rules, glossary order
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        [SourceKind::Cards, SourceKind::Rules, SourceKind::Glossary]
            .into_iter()
            .flat_map(move |kind| {
                self.outputs
                    .iter()
                    .filter(move |output| output.kind == kind)
                    .flat_map(|output| output.documents.iter())
            })
    }

    /// Documents ready for the vector index
    pub fn normalized(&self) -> Vec<NormalizedDocument> {
        self.documents().map(Document::normalize).collect()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.outputs.iter().flat_map(|output| output.warnings.iter())
    }

    fn count(&self, kind: SourceKind) -> usize {
        self.outputs
            .iter()
            .filter(|output| output.kind == kind)
            .map(|output| output.documents.len())
            .sum()
    }

    pub fn summary(&self) -> IngestSummary {
        IngestSummary {
            cards: self.count(SourceKind::Cards),
            rules: self.count(SourceKind::Rules),
            glossary_terms: self.count(SourceKind::Glossary),
            warnings: self.warnings().cloned().collect(),
            failures: self.failures.clone(),
        }
    }

    fn record(&mut self, kind: SourceKind, result: Result<SourceOutput>) {
        match result {
            Ok(output) => {
                tracing::info!(
                    "Source {}: {} documents, {} skipped",
                    kind,
                    output.documents.len(),
                    output.warnings.len()
                );
                self.outputs.push(output);
            }
            Err(e) => {
                tracing::warn!("Source {} failed: {:#}", kind, e);
                self.outputs.push(SourceOutput::new(kind));
                self.failures.push(SourceFailure {
                    source: kind,
                    error: format!("{:#}", e),
                });
            }
        }
    }
}

/// Parse card and ruling JSON into card documents
pub fn cards_from_text(cards_text: &str, rulings_text: &str) -> SourceOutput {
    let (cards, card_warnings) = load_cards(cards_text);
    let (rulings, ruling_warnings) = load_rulings(rulings_text);

    let mut output = normalize_cards(combine_cards_and_rulings(cards, rulings));
    for warning in card_warnings.into_iter().chain(ruling_warnings) {
        output.warn(warning);
    }
    output
}

/// Parse comprehensive rules text into rule documents
pub fn rules_from_text(text: &str) -> SourceOutput {
    normalize_rules(parse_rules(text))
}

/// Parse glossary text into glossary documents
pub fn glossary_from_text(text: &str) -> SourceOutput {
    let (terms, warnings) = parse_glossary(text);
    let mut output = normalize_glossary(terms);
    for warning in warnings {
        output.warn(warning);
    }
    output
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
}

async fn run_blocking<F>(task: F) -> Result<SourceOutput>
where
    F: FnOnce() -> Result<SourceOutput> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .context("Ingestion task panicked")?
}

/// Read and parse every source concurrently
pub async fn ingest_sources(paths: &SourcePaths) -> IngestReport {
    let cards = {
        let (cards_path, rulings_path) = (paths.cards.clone(), paths.rulings.clone());
        run_blocking(move || {
            let cards = read_source(&cards_path)?;
            let rulings = read_source(&rulings_path)?;
            Ok(cards_from_text(&cards, &rulings))
        })
    };

    let rules = {
        let path = paths.rules.clone();
        run_blocking(move || Ok(rules_from_text(&read_source(&path)?)))
    };

    let glossary = {
        let path = paths.glossary.clone();
        run_blocking(move || Ok(glossary_from_text(&read_source(&path)?)))
    };

    let (cards, rules, glossary) = tokio::join!(cards, rules, glossary);

    let mut report = IngestReport::default();
    report.record(SourceKind::Cards, cards);
    report.record(SourceKind::Rules, rules);
    report.record(SourceKind::Glossary, glossary);
    report
}

/// Write every parsed record to the store
///
/// Cards, rules and glossary terms are upserted and rulings deduplicated, so
/// writing the same report twice leaves the store unchanged.
pub fn write_store(db: &Database, report: &IngestReport) -> Result<StoreCounts> {
    let mut counts = StoreCounts::default();

    for document in report.documents() {
        match document {
            Document::Card(card) => {
                db.upsert_card(&card.card)?;
                for ruling in &card.rulings {
                    if db.insert_ruling(ruling)? {
                        counts.rulings_inserted += 1;
                    }
                }
                counts.cards += 1;
            }
            Document::Rule(rule) => {
                db.upsert_rule(rule)?;
                counts.rules += 1;
            }
            Document::Glossary(term) => {
                db.upsert_glossary_term(term)?;
                counts.glossary_terms += 1;
            }
        }
    }

    tracing::info!(
        "Stored {} cards, {} new rulings, {} rules, {} glossary terms",
        counts.cards,
        counts.rulings_inserted,
        counts.rules,
        counts.glossary_terms
    );

    Ok(counts)
}
