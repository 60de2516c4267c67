//! Source parsing and normalization
//!
//! This module turns the four reference sources into uniform documents:
//! - Comprehensive rules text (numbered rule hierarchy)
//! - Glossary text (terms with rule cross-references)
//! - Card and ruling JSON (joined by oracle id)

pub mod cards;
pub mod document;
pub mod glossary;
pub mod rules;

pub use cards::{combine_cards_and_rulings, Card, CardWithRulings, Ruling};
pub use document::{
    sanitize_metadata, Document, DocumentKind, Metadata, MetadataValue, NormalizedDocument,
};
pub use glossary::{parse_glossary, GlossaryTerm};
pub use rules::{parse_rules, Rule};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compute a stable hash for content
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Which reference source a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Cards,
    Rules,
    Glossary,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Cards => write!(f, "cards"),
            SourceKind::Rules => write!(f, "rules"),
            SourceKind::Glossary => write!(f, "glossary"),
        }
    }
}

/// A record that was skipped while parsing or normalizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Source the record belonged to
    pub source: SourceKind,
    /// Position or identifier of the record, when known
    pub location: Option<String>,
    /// What was wrong with it
    pub message: String,
}

impl Warning {
    pub fn new(source: SourceKind, message: impl Into<String>) -> Self {
        Self {
            source,
            location: None,
            message: message.into(),
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location {
            Some(ref loc) => write!(f, "[{}] {}: {}", self.source, loc, self.message),
            None => write!(f, "[{}] {}", self.source, self.message),
        }
    }
}

/// Documents produced by one source, plus whatever had to be skipped
#[derive(Debug, Clone)]
pub struct SourceOutput {
    pub kind: SourceKind,
    pub documents: Vec<Document>,
    pub warnings: Vec<Warning>,
}

impl SourceOutput {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            documents: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record a skipped entry and log it
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!("Skipping record: {}", warning);
        self.warnings.push(warning);
    }
}
