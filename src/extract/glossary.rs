//! Glossary parsing
//!
//! Glossary entries are blocks separated by a blank line. The first line of a
//! block is the term and the remaining lines form its definition.

use super::{SourceKind, Warning};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static RULE_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"See rule (\d+(?:\.\d+)*[a-z]?)").expect("valid rule reference pattern")
});

/// A glossary entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    /// Slug of the term, unique within one parse
    pub id: String,
    /// Term as written in the entry heading
    pub term: String,
    /// Definition lines joined by spaces
    pub definition: String,
    /// Rule numbers referenced with "See rule N", first occurrence order
    pub rule_refs: Vec<String>,
}

impl GlossaryTerm {
    /// Create a term, extracting rule references from the definition
    pub fn new(term: &str, definition: &str) -> Self {
        Self {
            id: slugify(term),
            term: term.trim().to_string(),
            definition: definition.trim().to_string(),
            rule_refs: extract_rule_refs(definition),
        }
    }
}

/// Lower-cased term with spaces turned into underscores
///
/// Characters other than letters, digits, `_` and `-` are dropped.
pub fn slugify(term: &str) -> String {
    term.trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_alphanumeric() || c == '_' || c == '-' => Some(c),
            _ => None,
        })
        .collect()
}

/// Collect every "See rule N" reference, without duplicates
pub fn extract_rule_refs(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    RULE_REFERENCE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|number| seen.insert(number.clone()))
        .collect()
}

/// Parse glossary text into terms
///
/// Returns the parsed terms plus a warning for every block that had no term
/// or no definition. Ids are slugs; a repeated slug gets a `_2`, `_3`...
/// suffix so ids stay unique.
pub fn parse_glossary(text: &str) -> (Vec<GlossaryTerm>, Vec<Warning>) {
    let mut terms = Vec::new();
    let mut warnings = Vec::new();
    let mut slug_counts: HashMap<String, usize> = HashMap::new();

    for (index, block) in split_entries(text).into_iter().enumerate() {
        let mut lines = block.into_iter();
        let term = lines.next().map(str::trim).unwrap_or_default();
        let definition = lines
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let location = format!("entry {}", index + 1);
        if term.is_empty() {
            warnings.push(Warning::new(SourceKind::Glossary, "entry has no term").at(location));
            continue;
        }
        if definition.is_empty() {
            warnings.push(
                Warning::new(SourceKind::Glossary, format!("term '{}' has no definition", term))
                    .at(location),
            );
            continue;
        }

        let mut entry = GlossaryTerm::new(term, &definition);
        let count = slug_counts.entry(entry.id.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            entry.id = format!("{}_{}", entry.id, count);
        }

        terms.push(entry);
    }

    tracing::debug!("Parsed {} glossary terms", terms.len());
    (terms, warnings)
}

/// Split text into entry blocks
///
/// A new entry starts at a non-indented line that follows a blank line.
/// Indented lines after a blank line continue the current entry.
fn split_entries(text: &str) -> Vec<Vec<&str>> {
    let mut entries: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut after_blank = false;

    for line in text.lines() {
        if line.trim().is_empty() {
            after_blank = true;
            continue;
        }

        let starts_entry = !line.starts_with(char::is_whitespace);
        if after_blank && starts_entry && !current.is_empty() {
            entries.push(std::mem::take(&mut current));
        }
        current.push(line);
        after_blank = false;
    }

    if !current.is_empty() {
        entries.push(current);
    }

    entries
}
