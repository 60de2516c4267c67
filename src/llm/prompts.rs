//! Prompt templates for LLM interactions

use crate::index::SearchHit;
use crate::storage::{CardDetails, RuleWithChildren};

/// Reply the model is told to give when the context does not cover the question
pub const INSUFFICIENT_INFORMATION: &str = "I don't have enough information to answer that.";

/// Prompt for answering a rules question from retrieved context
pub struct AnswerPrompt;

impl AnswerPrompt {
    /// Generate a prompt from the question and everything retrieved for it
    pub fn generate(
        question: &str,
        cards: &[CardDetails],
        rules: &[RuleWithChildren],
        passages: &[SearchHit],
    ) -> String {
        let mut prompt = String::new();

        prompt.push_str(ANSWER_SYSTEM_PROMPT);
        prompt.push('\n');

        if !cards.is_empty() {
            prompt.push_str("## Cards\n\n");
            for card in cards {
                prompt.push_str(&card.to_context());
                prompt.push_str("\n\n");
            }
        }

        if !rules.is_empty() {
            prompt.push_str("## Referenced Rules\n\n");
            for rule in rules {
                prompt.push_str(&rule.render());
                prompt.push_str("\n\n");
            }
        }

        prompt.push_str("## Retrieved Passages\n\n");
        if passages.is_empty() {
            prompt.push_str("(none)\n\n");
        }
        for (i, passage) in passages.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n\n", i + 1, passage.content));
        }

        prompt.push_str("## Question\n\n");
        prompt.push_str(question.trim());
        prompt.push_str("\n\n");

        prompt.push_str(ANSWER_INSTRUCTIONS);
        prompt.push_str(&format!(
            "- If the context above does not contain what you need, reply exactly: \"{}\"\n",
            INSUFFICIENT_INFORMATION
        ));

        prompt
    }
}

const ANSWER_SYSTEM_PROMPT: &str = r#"You are a Magic: The Gathering rules expert. Your task is to answer a player's rules question using only the reference material provided.

You will be given:
1. Oracle text and official rulings for any cards the question mentions
2. Comprehensive rules the question cites directly
3. Passages retrieved from the comprehensive rules, the glossary and card rulings
"#;

const ANSWER_INSTRUCTIONS: &str = r#"## Instructions

Answer the question in plain language.

Guidelines:
- Base the answer only on the cards, rules and passages above
- Cite rule numbers when a passage supports a statement
- Prefer a card's official rulings over general rules when they conflict
- Keep the answer short; explain the interaction, not the whole rules section
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{Card, Metadata, Rule, Ruling};

    #[test]
    fn test_answer_prompt_generation() {
        let card = CardDetails {
            card: Card {
                oracle_id: "abc".to_string(),
                name: "Youthful Knight".to_string(),
                oracle_text: Some("First strike".to_string()),
                ..Default::default()
            },
            rulings: vec![Ruling {
                oracle_id: "abc".to_string(),
                comment: "It deals combat damage before creatures without first strike.".to_string(),
                ..Default::default()
            }],
        };
        let rule = RuleWithChildren {
            rule: Rule::new("702.7", "First Strike"),
            children: vec![Rule::new("702.7a", "First strike is a static ability.")],
        };
        let passage = SearchHit {
            id: "rule_510_4".to_string(),
            content: "Rule 510.4: If at least one attacking or blocking creature has first strike...".to_string(),
            metadata: Metadata::new(),
            score: 0.8,
        };

        let prompt = AnswerPrompt::generate(
            "How does first strike work?",
            &[card],
            &[rule],
            &[passage],
        );

        assert!(prompt.contains("## Cards\n\nYouthful Knight"));
        assert!(prompt.contains("- 702.7a: First strike is a static ability."));
        assert!(prompt.contains("[1] Rule 510.4"));
        assert!(prompt.contains("How does first strike work?"));
        assert!(prompt.contains(INSUFFICIENT_INFORMATION));
    }

    #[test]
    fn test_prompt_without_context() {
        let prompt = AnswerPrompt::generate("Can I do this?", &[], &[], &[]);
        assert!(!prompt.contains("## Cards"));
        assert!(!prompt.contains("## Referenced Rules"));
        assert!(prompt.contains("(none)"));
    }
}
