//! End-to-end checks from source text to answers

use mtgsage::extract::{parse_rules, Document};
use mtgsage::index::{MockEmbedding, Retriever, VectorIndex};
use mtgsage::ingest::{cards_from_text, rules_from_text, write_store, IngestReport};
use mtgsage::llm::MockLlmClient;
use mtgsage::query::QueryPipeline;
use mtgsage::storage::Database;

const RULES: &str = "\
100. General
100.1 A game of Magic is played by two or more players.
100.1a A turn-based action happens automatically when a step begins.
702. Keyword Abilities
702.7 First Strike
702.7a First strike is a static ability that modifies the rules for the combat damage step.
702.7b If at least one attacking or blocking creature has first strike, creatures without first strike don't assign combat damage in the first combat damage step.
";

const CARDS: &str = r#"[
    {"oracle_id": "abc", "name": "Grizzly Bears", "type_line": "Creature — Bear", "power": "2", "toughness": "2"},
    {"oracle_id": "def", "name": "Llanowar Elves", "oracle_text": "{T}: Add {G}."},
    {"oracle_id": "ghi", "name": "Giant Growth", "oracle_text": "Target creature gets +3/+3 until end of turn."}
]"#;

const RULINGS: &str = r#"[
    {"oracle_id": "def", "comment": "Llanowar Elves can't use its ability the turn it comes under your control.", "published_at": "2019-07-12"}
]"#;

fn report() -> IngestReport {
    IngestReport {
        outputs: vec![cards_from_text(CARDS, RULINGS), rules_from_text(RULES)],
        failures: Vec::new(),
    }
}

#[test]
fn test_rule_hierarchy_from_text() {
    let rules = parse_rules("100. General\n100.1 A game of Magic...\n100.1a A turn-based action...\n");

    assert_eq!(rules.len(), 3);
    assert_eq!(rules[0].rule_number, "100");
    assert_eq!(rules[1].rule_number, "100.1");
    assert_eq!(rules[2].rule_number, "100.1a");
    assert!(rules.iter().all(|r| r.base_rule == "100"));
    assert_eq!(rules[2].parent_rule.as_deref(), Some("100.1"));
}

#[test]
fn test_card_without_rulings() {
    let output = cards_from_text(CARDS, RULINGS);
    let bears = output
        .documents
        .iter()
        .find_map(|doc| match doc {
            Document::Card(card) if card.card.oracle_id == "abc" => Some(card.clone()),
            _ => None,
        })
        .unwrap();

    assert!(!bears.has_rulings());
    assert_eq!(bears.ruling_count(), 0);

    let document = Document::Card(bears);
    assert!(!document.render().contains("Rulings:"));
    let metadata = document.metadata();
    assert_eq!(metadata.get("has_rulings").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(metadata.get("ruling_count").and_then(|v| v.as_i64()), Some(0));

    let db = Database::open_in_memory().unwrap();
    write_store(&db, &report()).unwrap();
    let stored = db.get_card_by_oracle_id("abc").unwrap().unwrap();
    assert!(stored.rulings.is_empty());
    assert!(!stored.to_context().contains("Rulings:"));
}

#[tokio::test]
async fn test_first_strike_question_finds_rule() {
    let report = report();
    let embedder = MockEmbedding::new(1024);
    let index = VectorIndex::build("mtg", &report.normalized(), &embedder, 4)
        .await
        .unwrap();

    let hits = Retriever::new(3, 0.0)
        .retrieve(&index, "What does First Strike do?", &embedder)
        .await
        .unwrap();
    assert!(hits.iter().any(|hit| hit.id.starts_with("rule_702_7")));

    let db = Database::open_in_memory().unwrap();
    write_store(&db, &report).unwrap();

    let mut model = MockLlmClient::new();
    model.add_response("First strike is a static ability", "A creature with first strike deals combat damage before creatures without it.");

    let outcome = QueryPipeline::new(&db, &index, &embedder, &model)
        .answer("What does First Strike do?")
        .await
        .unwrap();

    assert!(outcome.context.cards.is_empty());
    assert!(outcome
        .context
        .passages
        .iter()
        .take(3)
        .any(|hit| hit.id.starts_with("rule_702_7")));
    assert!(outcome.answer.text.contains("before creatures without it"));
    assert!(!outcome.answer.is_insufficient());
}

#[tokio::test]
async fn test_card_question_uses_rulings() {
    let report = report();
    let embedder = MockEmbedding::new(1024);
    let index = VectorIndex::build("mtg", &report.normalized(), &embedder, 16)
        .await
        .unwrap();
    let db = Database::open_in_memory().unwrap();
    write_store(&db, &report).unwrap();

    let model = MockLlmClient::new();
    let outcome = QueryPipeline::new(&db, &index, &embedder, &model)
        .answer("Can I tap Llanowar Elves the turn I cast it?")
        .await
        .unwrap();

    assert_eq!(outcome.context.cards.len(), 1);
    assert_eq!(outcome.context.cards[0].card.name, "Llanowar Elves");
    assert!(outcome.answer.is_insufficient());

    let prompt = &model.prompts()[0];
    assert!(prompt.contains("can't use its ability the turn it comes under your control"));
}
