//! Question splitting for retrieval probes

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.?!]+(?:\s+|$)").expect("valid sentence pattern"));

static CITED_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\brules?\s+(\d+(?:\.\d+)*[a-z]?)|\b(\d{3}\.\d+[a-z]?)\b")
        .expect("valid cited rule pattern")
});

/// Split a question into short spans
///
/// The question is cut into sentences; a sentence longer than `max_chars`
/// is cut further at `;` and `,`. Empty and repeated spans are dropped.
pub fn chunk_query(question: &str, max_chars: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut chunks = Vec::new();

    let mut push = |span: &str| {
        let span = span.trim();
        if !span.is_empty() && seen.insert(span.to_lowercase()) {
            chunks.push(span.to_string());
        }
    };

    let mut start = 0;
    let mut sentences = Vec::new();
    for m in SENTENCE_END.find_iter(question) {
        sentences.push(question[start..m.end()].trim());
        start = m.end();
    }
    sentences.push(question[start..].trim());

    for sentence in sentences {
        if sentence.chars().count() <= max_chars {
            push(sentence);
        } else {
            for clause in sentence.split([';', ',']) {
                push(clause);
            }
        }
    }

    chunks
}

/// Rule numbers cited in a question
///
/// Picks up `rule 702` style citations and bare dotted numbers such as
/// `702.19b`, in order of appearance and without duplicates.
pub fn extract_rule_numbers(question: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    CITED_RULE
        .captures_iter(question)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_lowercase())
        .filter(|number| seen.insert(number.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_sentences() {
        let chunks = chunk_query("My opponent attacks with a 3/3. Can I block with two creatures?", 120);
        assert_eq!(
            chunks,
            vec!["My opponent attacks with a 3/3.", "Can I block with two creatures?"]
        );
    }

    #[test]
    fn test_long_sentence_is_split_into_clauses() {
        let chunks = chunk_query(
            "If my creature has deathtouch, and it is blocked by two creatures; how much damage do I assign?",
            40,
        );
        assert_eq!(
            chunks,
            vec![
                "If my creature has deathtouch",
                "and it is blocked by two creatures",
                "how much damage do I assign?"
            ]
        );
    }

    #[test]
    fn test_empty_question() {
        assert!(chunk_query("   ", 100).is_empty());
    }

    #[test]
    fn test_extract_rule_numbers() {
        assert_eq!(
            extract_rule_numbers("What does rule 702.19b say? And Rule 100, and 510.1c. Also 702.19b again."),
            vec!["702.19b", "100", "510.1c"]
        );
        assert!(extract_rule_numbers("I have 20 life and 3 cards").is_empty());
    }
}
