//! Comprehensive rules parsing
//!
//! The rules document is flat text where every rule starts on its own line
//! with a number such as `100`, `100.1` or `100.1a`. The number alone defines
//! the hierarchy:
//! - `100` is a base rule with no parent
//! - `100.1` has parent `100`
//! - `100.1a` has parent `100.1`

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::LazyLock;

/// Rule number at the start of a line, optionally followed by a period
static RULE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(\d+(?:\.\d+)*[a-z]?)\.?[ \t]+").expect("valid rule marker pattern")
});

/// Lettered sub-rule that ended up inline in its parent's text
static INLINE_SUBRULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s)(\d+\.\d+[a-z])\.?\s+([A-Z])").expect("valid sub-rule pattern")
});

static RULE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)*[a-z]?$").expect("valid rule number pattern"));

/// A node of the comprehensive rules hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Document id (`rule_100_1a`)
    pub id: String,
    /// Rule number (`100.1a`)
    pub rule_number: String,
    /// Rule text, trimmed
    pub content: String,
    /// Top-level section (`100`)
    pub base_rule: String,
    /// Immediate parent, `None` for top-level rules
    pub parent_rule: Option<String>,
}

impl Rule {
    /// Create a rule, deriving id, base and parent from the number
    pub fn new(rule_number: &str, content: &str) -> Self {
        let base_rule = rule_number
            .split('.')
            .next()
            .unwrap_or(rule_number)
            .to_string();

        Self {
            id: rule_id(rule_number),
            rule_number: rule_number.to_string(),
            content: content.trim().to_string(),
            base_rule,
            parent_rule: parent_rule_number(rule_number),
        }
    }

    /// Number of dotted components (`100` is 1, `100.1a` is 2)
    pub fn depth(&self) -> usize {
        self.rule_number.split('.').count()
    }
}

/// Document id for a rule number
pub fn rule_id(rule_number: &str) -> String {
    format!("rule_{}", rule_number.replace('.', "_"))
}

/// Check that a string looks like a rule number
pub fn is_rule_number(value: &str) -> bool {
    RULE_NUMBER.is_match(value)
}

/// Derive the immediate parent of a rule number
///
/// A lettered rule's parent is the same number without the letter; otherwise
/// the last dotted component is dropped. Top-level numbers have no parent.
pub fn parent_rule_number(rule_number: &str) -> Option<String> {
    if rule_number.ends_with(|c: char| c.is_ascii_lowercase()) {
        let trimmed = rule_number.trim_end_matches(|c: char| c.is_ascii_lowercase());
        if trimmed.contains('.') {
            return Some(trimmed.to_string());
        }
    }

    rule_number
        .rsplit_once('.')
        .map(|(parent, _)| parent.to_string())
}

/// Order rule numbers numerically (`100.2` before `100.10`)
pub fn compare_rule_numbers(a: &str, b: &str) -> Ordering {
    fn key(number: &str) -> (Vec<u64>, String) {
        let letters: String = number
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_lowercase())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let digits = &number[..number.len() - letters.len()];
        let parts = digits
            .split('.')
            .map(|part| part.parse::<u64>().unwrap_or(u64::MAX))
            .collect();
        (parts, letters)
    }

    key(a).cmp(&key(b))
}

/// Parse the comprehensive rules text into rule records, in document order
///
/// Purely pattern driven: numbering is not validated, and text without any
/// rule markers yields an empty list.
pub fn parse_rules(text: &str) -> Vec<Rule> {
    let markers: Vec<(String, usize, usize)> = RULE_MARKER
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let number = caps.get(1)?;
            Some((number.as_str().to_string(), whole.start(), whole.end()))
        })
        .collect();

    let mut rules = Vec::with_capacity(markers.len());

    for (i, (number, _, content_start)) in markers.iter().enumerate() {
        let content_end = markers
            .get(i + 1)
            .map(|(_, start, _)| *start)
            .unwrap_or(text.len());
        let rule = Rule::new(number, &text[*content_start..content_end]);

        let lettered = number.ends_with(|c: char| c.is_ascii_lowercase());
        if rule.depth() == 2 && !lettered {
            rules.extend(split_inline_subrules(rule));
        } else {
            rules.push(rule);
        }
    }

    tracing::debug!("Parsed {} rules", rules.len());
    rules
}

/// Split lettered sub-rules that appear inline in a rule's text
///
/// Only sub-rules of this very rule are split (`100.1a` inside `100.1`), so
/// cross-references such as "See rule 702.19b" stay in the text.
fn split_inline_subrules(rule: Rule) -> Vec<Rule> {
    let content = rule.content.clone();
    let mut cuts: Vec<(String, usize, usize)> = Vec::new();

    for caps in INLINE_SUBRULE.captures_iter(&content) {
        let (Some(number), Some(rest)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let belongs = number
            .as_str()
            .strip_prefix(rule.rule_number.as_str())
            .is_some_and(|suffix| suffix.len() == 1);
        if belongs {
            cuts.push((number.as_str().to_string(), number.start(), rest.start()));
        }
    }

    if cuts.is_empty() {
        return vec![rule];
    }

    let mut records = Vec::with_capacity(cuts.len() + 1);
    let head = content[..cuts[0].1].trim().to_string();
    records.push(Rule {
        content: head,
        ..rule.clone()
    });

    for (i, (number, _, text_start)) in cuts.iter().enumerate() {
        let text_end = cuts.get(i + 1).map(|(_, start, _)| *start).unwrap_or(content.len());
        records.push(Rule {
            id: rule_id(number),
            rule_number: number.clone(),
            content: content[*text_start..text_end].trim().to_string(),
            base_rule: rule.base_rule.clone(),
            parent_rule: Some(rule.rule_number.clone()),
        });
    }

    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_level_hierarchy() {
        let text = "100. General\n100.1 A game...\n100.1a A turn-based...";
        let rules = parse_rules(text);

        assert_eq!(rules.len(), 3);
        assert!(rules.iter().all(|r| r.base_rule == "100"));

        assert_eq!(rules[0].rule_number, "100");
        assert_eq!(rules[0].parent_rule, None);
        assert_eq!(rules[1].rule_number, "100.1");
        assert_eq!(rules[1].parent_rule.as_deref(), Some("100"));
        assert_eq!(rules[2].rule_number, "100.1a");
        assert_eq!(rules[2].parent_rule.as_deref(), Some("100.1"));
        assert_eq!(rules[2].content, "A turn-based...");
    }

    #[test]
    fn test_official_numbering_with_periods() {
        let text = r#"702. Keyword Abilities

702.7. First Strike

702.7a First strike is a static ability that modifies the rules for the combat damage step. See rule 510, "Combat Damage Step."

702.7b If at least one attacking or blocking creature has first strike or double strike as the combat damage step begins, the only creatures that assign combat damage in that step are those with first strike or double strike.
"#;
        let rules = parse_rules(text);
        let numbers: Vec<&str> = rules.iter().map(|r| r.rule_number.as_str()).collect();
        assert_eq!(numbers, vec!["702", "702.7", "702.7a", "702.7b"]);

        assert_eq!(rules[1].content, "First Strike");
        assert_eq!(rules[2].parent_rule.as_deref(), Some("702.7"));
        assert!(rules[2].content.starts_with("First strike is a static ability"));
        assert!(rules[2].content.ends_with("\"Combat Damage Step.\""));
        assert_eq!(rules[3].id, "rule_702_7b");
    }

    #[test]
    fn test_content_is_recovered_verbatim() {
        let body = "Multiline rule text\nthat continues on a second line.";
        let text = format!("601.2. {}\n601.3. Next rule", body);
        let rules = parse_rules(&text);
        assert_eq!(rules[0].content, body);
        assert_eq!(rules[1].content, "Next rule");
    }

    #[test]
    fn test_inline_subrules_are_split() {
        let text = "508. Declare Attackers Step\n508.1. First, the active player declares attackers. 508.1a The active player chooses which creatures will attack. 508.1b If the defending player controls planeswalkers, the active player announces which one each creature attacks.";
        let rules = parse_rules(text);
        let numbers: Vec<&str> = rules.iter().map(|r| r.rule_number.as_str()).collect();
        assert_eq!(numbers, vec!["508", "508.1", "508.1a", "508.1b"]);

        assert_eq!(rules[1].content, "First, the active player declares attackers.");
        assert_eq!(rules[2].parent_rule.as_deref(), Some("508.1"));
        assert_eq!(rules[2].base_rule, "508");
        assert_eq!(
            rules[2].content,
            "The active player chooses which creatures will attack."
        );
    }

    #[test]
    fn test_cross_references_are_not_split() {
        let text = "702.19. Trample\n702.19a Trample is a static ability. See rule 702.19b for details.";
        let rules = parse_rules(text);
        assert_eq!(rules.len(), 2);
        assert!(rules[1].content.contains("See rule 702.19b for details."));
    }

    #[test]
    fn test_no_markers_yields_empty() {
        assert!(parse_rules("Magic: The Gathering Comprehensive Rules\n\nIntroduction").is_empty());
        assert!(parse_rules("").is_empty());
    }

    #[test]
    fn test_parent_rule_number() {
        assert_eq!(parent_rule_number("100"), None);
        assert_eq!(parent_rule_number("100.1").as_deref(), Some("100"));
        assert_eq!(parent_rule_number("100.1a").as_deref(), Some("100.1"));
        assert_eq!(parent_rule_number("100.1.2").as_deref(), Some("100.1"));
    }

    #[test]
    fn test_compare_rule_numbers() {
        let mut numbers = vec!["100.10", "100.2", "100.1b", "100.1", "100.1a", "99"];
        numbers.sort_by(|a, b| compare_rule_numbers(a, b));
        assert_eq!(numbers, vec!["99", "100.1", "100.1a", "100.1b", "100.2", "100.10"]);
    }

    #[test]
    fn test_is_rule_number() {
        assert!(is_rule_number("702.19b"));
        assert!(is_rule_number("100"));
        assert!(!is_rule_number("702.19B"));
        assert!(!is_rule_number("rule 100"));
    }
}
