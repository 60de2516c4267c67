//! Normalized documents
//!
//! Rules, glossary terms and cards share one shape for indexing: a rendered
//! content string plus a flat map of scalar metadata.

use super::cards::CardWithRulings;
use super::glossary::GlossaryTerm;
use super::rules::Rule;
use super::{SourceKind, SourceOutput, Warning};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Scalar metadata value
///
/// Lists and maps never appear here; they are JSON-encoded into `String`
/// before they reach a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert a JSON value, stringifying lists and maps
    ///
    /// Returns `None` for `null` and for numbers that cannot be stored.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Null => None,
            Value::Bool(b) => Some(MetadataValue::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(MetadataValue::Integer)
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(MetadataValue::Float)),
            Value::String(s) => Some(MetadataValue::String(s.clone())),
            Value::Array(_) | Value::Object(_) => {
                serde_json::to_string(value).ok().map(MetadataValue::String)
            }
        }
    }
}

impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{}", b),
            MetadataValue::Integer(i) => write!(f, "{}", i),
            MetadataValue::Float(x) => write!(f, "{}", x),
            MetadataValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Integer(value)
    }
}

/// Flat metadata map, ordered by key
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Build metadata from a JSON object
///
/// Structured values are stringified. A value that is not an object (or a
/// string holding one) cannot be represented and yields an empty map.
pub fn sanitize_metadata(value: &serde_json::Value) -> Metadata {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .filter_map(|(k, v)| MetadataValue::from_json(v).map(|v| (k.clone(), v)))
            .collect(),
        serde_json::Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .filter(|parsed| parsed.is_object())
            .map(|parsed| sanitize_metadata(&parsed))
            .unwrap_or_default(),
        _ => Metadata::new(),
    }
}

/// Document type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Rule,
    Glossary,
    Card,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Rule => "rule",
            DocumentKind::Glossary => "glossary",
            DocumentKind::Card => "card",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of the reference corpus
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    Rule(Rule),
    Glossary(GlossaryTerm),
    Card(CardWithRulings),
}

impl Document {
    pub fn kind(&self) -> DocumentKind {
        match self {
            Document::Rule(_) => DocumentKind::Rule,
            Document::Glossary(_) => DocumentKind::Glossary,
            Document::Card(_) => DocumentKind::Card,
        }
    }

    /// Stable identifier within the corpus
    pub fn id(&self) -> &str {
        match self {
            Document::Rule(rule) => &rule.id,
            Document::Glossary(term) => &term.id,
            Document::Card(card) => &card.card.oracle_id,
        }
    }

    /// Key that links the document back to its relational record
    ///
    /// For cards this is the oracle id, so a hit never has to be matched back
    /// to its card through the rendered text.
    pub fn link_key(&self) -> Option<&str> {
        match self {
            Document::Card(card) => Some(&card.card.oracle_id),
            Document::Rule(rule) => Some(&rule.rule_number),
            Document::Glossary(_) => None,
        }
    }

    /// Human-readable content used for embedding and prompting
    pub fn render(&self) -> String {
        match self {
            Document::Rule(rule) => format!("Rule {}: {}", rule.rule_number, rule.content),
            Document::Glossary(term) => format!(
                "Glossary Term: {}\nDefinition: {}",
                term.term, term.definition
            ),
            Document::Card(card) => {
                let mut content = format!(
                    "Card: {}\nOracle Text: {}",
                    card.card.name,
                    card.card.oracle_text.as_deref().unwrap_or_default()
                );
                if card.has_rulings() {
                    content.push_str("\nRulings:\n");
                    let comments: Vec<&str> =
                        card.rulings.iter().map(|r| r.comment.as_str()).collect();
                    content.push_str(&comments.join("\n"));
                }
                content
            }
        }
    }

    /// Flat scalar metadata, always including `document_type`
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("document_type".into(), self.kind().as_str().into());

        match self {
            Document::Rule(rule) => {
                metadata.insert("id".into(), rule.id.as_str().into());
                metadata.insert("rule_number".into(), rule.rule_number.as_str().into());
                metadata.insert("base_rule".into(), rule.base_rule.as_str().into());
                metadata.insert(
                    "parent_rule".into(),
                    rule.parent_rule.clone().unwrap_or_default().into(),
                );
            }
            Document::Glossary(term) => {
                metadata.insert("id".into(), term.id.as_str().into());
                metadata.insert("term".into(), term.term.as_str().into());
                metadata.insert("rule_refs".into(), term.rule_refs.join(",").into());
            }
            Document::Card(card) => {
                if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(&card.card) {
                    for (key, value) in &fields {
                        if let Some(value) = MetadataValue::from_json(value) {
                            metadata.insert(key.clone(), value);
                        }
                    }
                }
                metadata.insert("id".into(), card.card.oracle_id.as_str().into());
                metadata.insert("has_rulings".into(), card.has_rulings().into());
                metadata.insert("ruling_count".into(), (card.ruling_count() as i64).into());
            }
        }

        if let Some(key) = self.link_key() {
            metadata.insert("link_key".into(), key.into());
        }

        metadata
    }

    /// Flatten into the shape the vector index stores
    pub fn normalize(&self) -> NormalizedDocument {
        NormalizedDocument {
            id: self.id().to_string(),
            content: self.render(),
            metadata: self.metadata(),
        }
    }
}

/// The unit the vector index embeds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedDocument {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
}

impl NormalizedDocument {
    pub fn kind(&self) -> Option<&str> {
        self.metadata.get("document_type").and_then(MetadataValue::as_str)
    }
}

/// Wrap parsed rules, skipping records without a number or text
pub fn normalize_rules(rules: Vec<Rule>) -> SourceOutput {
    let mut output = SourceOutput::new(SourceKind::Rules);

    for rule in rules {
        if rule.rule_number.is_empty() {
            output.warn(Warning::new(SourceKind::Rules, "rule without a number"));
        } else if rule.content.is_empty() {
            output.warn(
                Warning::new(SourceKind::Rules, "rule has no text").at(rule.rule_number.clone()),
            );
        } else {
            output.documents.push(Document::Rule(rule));
        }
    }

    output
}

/// Wrap parsed glossary terms, skipping records without a term or definition
pub fn normalize_glossary(terms: Vec<GlossaryTerm>) -> SourceOutput {
    let mut output = SourceOutput::new(SourceKind::Glossary);

    for term in terms {
        if term.term.is_empty() || term.definition.is_empty() {
            output.warn(
                Warning::new(SourceKind::Glossary, "term missing name or definition")
                    .at(term.id.clone()),
            );
        } else {
            output.documents.push(Document::Glossary(term));
        }
    }

    output
}

/// Wrap combined cards, skipping records without an oracle id or name
pub fn normalize_cards(cards: Vec<CardWithRulings>) -> SourceOutput {
    let mut output = SourceOutput::new(SourceKind::Cards);

    for card in cards {
        if card.card.oracle_id.is_empty() || card.card.name.is_empty() {
            output.warn(Warning::new(SourceKind::Cards, "card missing oracle id or name"));
        } else {
            output.documents.push(Document::Card(card));
        }
    }

    output
}
