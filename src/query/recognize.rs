//! Card-name recognition
//!
//! Recognizers only propose candidate names. Whether a candidate is a real
//! card is decided later by looking it up in the store, so recognition is
//! allowed to be generous.

use anyhow::Result;
use regex::Regex;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::LazyLock;

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[([^\[\]]+)\]\]").expect("valid bracket pattern"));

static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]+)"|“([^”]+)”"#).expect("valid quote pattern")
});

static QUERY_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\w']+'s|\w+|[.,!?;]").expect("valid token pattern"));

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\S+").expect("valid word pattern"));

/// Text between two runs that still belongs to one name: a comma or a
/// possessive, then any connectors
static NAME_BRIDGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:'s?\s+|(?:'s?)?,\s+)(?:(?:of|the|and|to|in|from|a)\s+)*$")
        .expect("valid bridge pattern")
});

/// Lowercase words allowed inside a capitalized name ("Jace of the Mind")
const CONNECTORS: &[&str] = &["of", "the", "and", "to", "in", "from", "a"];

/// Capitalized words that open a question rather than name a card
const QUESTION_WORDS: &[&str] = &[
    "what", "how", "when", "why", "who", "whom", "which", "where", "does", "do", "did", "can",
    "could", "is", "are", "was", "will", "would", "should", "if", "i", "my", "in", "on", "with",
    "so", "and", "but", "or", "the", "a", "an", "let's", "suppose", "say",
];

/// Proposes card names mentioned in a question
pub trait CardRecognizer: Send + Sync {
    /// Candidate names in order of first appearance, without duplicates
    fn recognize(&self, question: &str) -> Result<Vec<String>>;
}

/// Heuristic recognizer based on brackets, quotes and capitalization
#[derive(Debug, Clone, Default)]
pub struct PatternRecognizer;

impl PatternRecognizer {
    pub fn new() -> Self {
        Self
    }
}

impl CardRecognizer for PatternRecognizer {
    fn recognize(&self, question: &str) -> Result<Vec<String>> {
        let question = normalize_apostrophes(question);
        let mut candidates = Vec::new();

        for caps in BRACKETED.captures_iter(&question) {
            if let Some(name) = caps.get(1) {
                candidates.push(name.as_str().to_string());
            }
        }

        let without_brackets = BRACKETED.replace_all(&question, " . ");
        for caps in QUOTED.captures_iter(&without_brackets) {
            if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                candidates.push(name.as_str().to_string());
            }
        }

        let remaining = QUOTED.replace_all(&without_brackets, " . ");
        candidates.extend(capitalized_runs(&remaining));

        Ok(dedup_names(candidates))
    }
}

/// A run of capitalized words and its byte range in the source text
#[derive(Debug)]
struct Run {
    start: usize,
    end: usize,
    text: String,
}

/// Candidate names from capitalized words
///
/// Runs separated only by a comma or a possessive, optionally followed by
/// connectors, are also proposed joined back together with their original
/// punctuation, so "Jace, the Mind Sculptor" and "Elspeth, Sun's Champion"
/// are offered whole before their fragments.
fn capitalized_runs(text: &str) -> Vec<String> {
    let runs = split_runs(text);
    let mut names = Vec::new();
    let mut chain_start = 0;

    for (i, run) in runs.iter().enumerate() {
        let continues = runs
            .get(i + 1)
            .is_some_and(|next| NAME_BRIDGE.is_match(&text[run.end..next.start]));
        if continues {
            continue;
        }

        if i > chain_start {
            let joined = &text[runs[chain_start].start..run.end];
            names.push(joined.split_whitespace().collect::<Vec<_>>().join(" "));
        }
        names.extend(runs[chain_start..=i].iter().map(|run| run.text.clone()));
        chain_start = i + 1;
    }

    names
}

/// Split text into runs of capitalized words
///
/// A run may contain connector words between capitalized words and ends at
/// punctuation or a possessive. The first word of a sentence is dropped when
/// it is a question word.
fn split_runs(text: &str) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut pending_connectors: Vec<&str> = Vec::new();
    let mut span = (0, 0);
    let mut sentence_start = true;

    let mut flush = |current: &mut Vec<&str>, pending: &mut Vec<&str>, span: (usize, usize)| {
        pending.clear();
        if !current.is_empty() {
            runs.push(Run {
                start: span.0,
                end: span.1,
                text: current.join(" "),
            });
            current.clear();
        }
    };

    for raw in WORD.find_iter(text) {
        let word = raw.as_str().trim_start_matches(|c: char| !c.is_alphanumeric());
        let offset = raw.end() - word.len();
        let ends_clause = word.ends_with(|c: char| matches!(c, ',' | ';' | ':'));
        let ends_sentence = word.ends_with(|c: char| matches!(c, '.' | '?' | '!'));
        let trimmed = word.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '\'');
        let word = strip_possessive(trimmed);
        let possessive = word.len() != trimmed.len();

        if word.is_empty() {
            flush(&mut current, &mut pending_connectors, span);
        } else if is_capitalized(word) {
            let opener = word == "I"
                || (sentence_start && QUESTION_WORDS.contains(&word.to_lowercase().as_str()));
            if opener {
                flush(&mut current, &mut pending_connectors, span);
            } else {
                if current.is_empty() {
                    span.0 = offset;
                }
                current.append(&mut pending_connectors);
                current.push(word);
                span.1 = offset + word.len();
            }
        } else if !current.is_empty() && CONNECTORS.contains(&word) {
            pending_connectors.push(word);
        } else {
            flush(&mut current, &mut pending_connectors, span);
        }

        sentence_start = word.is_empty() || ends_sentence;
        if ends_clause || ends_sentence || possessive {
            flush(&mut current, &mut pending_connectors, span);
        }
    }
    flush(&mut current, &mut pending_connectors, span);

    runs
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_uppercase())
}

fn strip_possessive(word: &str) -> &str {
    word.strip_suffix("'s")
        .or_else(|| word.strip_suffix('\''))
        .unwrap_or(word)
}

fn normalize_apostrophes(text: &str) -> String {
    text.replace('’', "'")
}

fn dedup_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| strip_possessive(name.trim()).trim().to_string())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect()
}

/// Tag of one token in a BIO sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BioTag {
    /// `B-CARD`: first token of a card name
    Begin,
    /// `I-CARD`: continuation of a card name
    Inside,
    /// `O`: not part of a card name
    Outside,
}

impl FromStr for BioTag {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "B-CARD" => Ok(BioTag::Begin),
            "I-CARD" => Ok(BioTag::Inside),
            "O" => Ok(BioTag::Outside),
            other => anyhow::bail!("Unknown BIO tag '{}'", other),
        }
    }
}

impl std::fmt::Display for BioTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BioTag::Begin => write!(f, "B-CARD"),
            BioTag::Inside => write!(f, "I-CARD"),
            BioTag::Outside => write!(f, "O"),
        }
    }
}

/// External sequence labeler, such as a token-classification model
pub trait TokenTagger: Send + Sync {
    /// One tag per token
    fn tag(&self, tokens: &[String]) -> Result<Vec<BioTag>>;
}

/// Split a question into the tokens the tagger was trained on
pub fn tokenize_query(question: &str) -> Vec<String> {
    let normalized = normalize_apostrophes(question);
    QUERY_TOKEN
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Collect the token spans a BIO sequence marks as card names
///
/// An `I-CARD` without a preceding `B-CARD` starts a new span.
pub fn decode_bio(tokens: &[String], tags: &[BioTag]) -> Vec<String> {
    let mut spans: Vec<Vec<&str>> = Vec::new();
    let mut in_span = false;

    for (token, tag) in tokens.iter().zip(tags) {
        match tag {
            BioTag::Begin => {
                spans.push(vec![token.as_str()]);
                in_span = true;
            }
            BioTag::Inside if in_span => {
                if let Some(span) = spans.last_mut() {
                    span.push(token);
                }
            }
            BioTag::Inside => {
                spans.push(vec![token.as_str()]);
                in_span = true;
            }
            BioTag::Outside => in_span = false,
        }
    }

    spans.into_iter().map(|span| join_tokens(&span)).collect()
}

fn join_tokens(tokens: &[&str]) -> String {
    let mut text = String::new();
    for token in tokens {
        let punctuation = matches!(*token, "." | "," | "!" | "?" | ";");
        if !text.is_empty() && !punctuation {
            text.push(' ');
        }
        text.push_str(token);
    }
    text
}

/// Recognizer backed by a `TokenTagger`
pub struct TaggerRecognizer<T> {
    tagger: T,
}

impl<T: TokenTagger> TaggerRecognizer<T> {
    pub fn new(tagger: T) -> Self {
        Self { tagger }
    }
}

impl<T: TokenTagger> CardRecognizer for TaggerRecognizer<T> {
    fn recognize(&self, question: &str) -> Result<Vec<String>> {
        let tokens = tokenize_query(question);
        let tags = self.tagger.tag(&tokens)?;

        if tags.len() != tokens.len() {
            anyhow::bail!(
                "Tagger returned {} tags for {} tokens",
                tags.len(),
                tokens.len()
            );
        }

        Ok(dedup_names(decode_bio(&tokens, &tags)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognize(question: &str) -> Vec<String> {
        PatternRecognizer::new().recognize(question).unwrap()
    }

    #[test]
    fn test_capitalized_names() {
        assert_eq!(
            recognize("Can Serra Angel block Llanowar Elves?"),
            vec!["Serra Angel", "Llanowar Elves"]
        );
    }

    #[test]
    fn test_question_word_is_not_a_name() {
        assert_eq!(recognize("What does First Strike do?"), vec!["First Strike"]);
        assert!(recognize("How does trample work?").is_empty());
    }

    #[test]
    fn test_connectors_inside_names() {
        assert_eq!(
            recognize("Does Elspeth, Sun's Champion work with Sword of Fire and Ice?"),
            vec![
                "Elspeth, Sun's Champion",
                "Elspeth",
                "Sun",
                "Champion",
                "Sword of Fire and Ice"
            ]
        );
        assert_eq!(recognize("I cast Rite of the Dragoncaller"), vec!["Rite of the Dragoncaller"]);
    }

    #[test]
    fn test_comma_names_are_kept_whole() {
        assert_eq!(
            recognize("Can Jace, the Mind Sculptor fateseal an opponent?"),
            vec!["Jace, the Mind Sculptor", "Jace", "Mind Sculptor"]
        );
        assert_eq!(
            recognize("What happens when Kozilek, Butcher of Truth is milled?"),
            vec!["Kozilek, Butcher of Truth", "Kozilek", "Butcher of Truth"]
        );
        assert_eq!(
            recognize("Does Jace,  the Mind Sculptor’s ability target?"),
            vec!["Jace, the Mind Sculptor", "Jace", "Mind Sculptor"]
        );
    }

    #[test]
    fn test_sentence_break_does_not_join_names() {
        assert_eq!(
            recognize("I cast Serra Angel. Fog resolves?"),
            vec!["Serra Angel", "Fog"]
        );
        assert_eq!(recognize("Is Tarmogoyf's power counted?"), vec!["Tarmogoyf"]);
    }

    #[test]
    fn test_possessive_is_stripped() {
        assert_eq!(
            recognize("Is Tarmogoyf's power counted in the graveyard?"),
            vec!["Tarmogoyf"]
        );
        assert_eq!(recognize("Is Tarmogoyf’s power fixed?"), vec!["Tarmogoyf"]);
    }

    #[test]
    fn test_brackets_and_quotes() {
        assert_eq!(
            recognize("If I copy [[Fury]] with \"Mirror Gallery\" what happens?"),
            vec!["Fury", "Mirror Gallery"]
        );
        assert_eq!(recognize("does [[Fury]] and Fury stack"), vec!["Fury"]);
    }

    #[test]
    fn test_tokenize_query() {
        assert_eq!(
            tokenize_query("Can Serra Angel’s ability, trigger?"),
            vec!["Can", "Serra", "Angel's", "ability", ",", "trigger", "?"]
        );
        assert_eq!(tokenize_query("don't"), vec!["don", "t"]);
    }

    #[test]
    fn test_decode_bio() {
        let tokens: Vec<String> = ["Does", "Serra", "Angel", "beat", "Grizzly", "Bears", "?"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let tags = vec![
            BioTag::Outside,
            BioTag::Begin,
            BioTag::Inside,
            BioTag::Outside,
            BioTag::Inside,
            BioTag::Inside,
            BioTag::Outside,
        ];
        assert_eq!(decode_bio(&tokens, &tags), vec!["Serra Angel", "Grizzly Bears"]);
    }

    struct FixedTagger(Vec<&'static str>);

    impl TokenTagger for FixedTagger {
        fn tag(&self, _tokens: &[String]) -> Result<Vec<BioTag>> {
            self.0.iter().map(|t| t.parse()).collect()
        }
    }

    #[test]
    fn test_tagger_recognizer() {
        let recognizer = TaggerRecognizer::new(FixedTagger(vec!["O", "B-CARD", "I-CARD", "O"]));
        assert_eq!(
            recognizer.recognize("Is Serra Angel's good").unwrap(),
            vec!["Serra Angel"]
        );

        let short = TaggerRecognizer::new(FixedTagger(vec!["O"]));
        assert!(short.recognize("two tokens").is_err());

        let bad = TaggerRecognizer::new(FixedTagger(vec!["X"]));
        assert!(bad.recognize("one").is_err());
    }
}
