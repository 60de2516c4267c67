//! SQLite storage layer for mtgsage
//!
//! This module handles persistent storage of:
//! - Cards, one representative printing per oracle id
//! - Rulings attached to cards
//! - The comprehensive rules hierarchy
//! - Glossary terms

mod schema;

pub use schema::SCHEMA;

use crate::extract::rules::compare_rule_numbers;
use crate::extract::{Card, CardWithRulings, GlossaryTerm, Rule, Ruling};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;

const CARD_COLUMNS: &str = r#"
    oracle_id, name, released_at, mana_cost, cmc, type_line, oracle_text,
    power, toughness, colors, color_identity, keywords, legalities, games,
    set_name, set_code, rarity, extra
"#;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", path.as_ref()))?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Self { conn };
        db.initialize()?;

        Ok(db)
    }

    /// Initialize the database schema
    fn initialize(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;
        Ok(())
    }

    // ==================== Cards ====================

    /// Insert or update a card, keyed by oracle id
    pub fn upsert_card(&self, card: &Card) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO cards (
                    oracle_id, name, released_at, mana_cost, cmc, type_line,
                    oracle_text, power, toughness, colors, color_identity,
                    keywords, legalities, games, set_name, set_code, rarity,
                    extra, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, datetime('now'))
                ON CONFLICT(oracle_id) DO UPDATE SET
                    name = excluded.name,
                    released_at = excluded.released_at,
                    mana_cost = excluded.mana_cost,
                    cmc = excluded.cmc,
                    type_line = excluded.type_line,
                    oracle_text = excluded.oracle_text,
                    power = excluded.power,
                    toughness = excluded.toughness,
                    colors = excluded.colors,
                    color_identity = excluded.color_identity,
                    keywords = excluded.keywords,
                    legalities = excluded.legalities,
                    games = excluded.games,
                    set_name = excluded.set_name,
                    set_code = excluded.set_code,
                    rarity = excluded.rarity,
                    extra = excluded.extra,
                    updated_at = datetime('now')
                "#,
                params![
                    card.oracle_id,
                    card.name,
                    card.released_at,
                    card.mana_cost,
                    card.cmc,
                    card.type_line,
                    card.oracle_text,
                    card.power,
                    card.toughness,
                    serde_json::to_string(&card.colors)?,
                    serde_json::to_string(&card.color_identity)?,
                    serde_json::to_string(&card.keywords)?,
                    serde_json::to_string(&card.legalities)?,
                    serde_json::to_string(&card.games)?,
                    card.set_name,
                    card.set_code,
                    card.rarity,
                    serde_json::to_string(&card.extra)?,
                ],
            )
            .with_context(|| format!("Failed to upsert card {}", card.oracle_id))?;

        Ok(())
    }

    /// Get a card and its rulings by oracle id
    pub fn get_card_by_oracle_id(&self, oracle_id: &str) -> Result<Option<CardDetails>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM cards WHERE oracle_id = ?1", CARD_COLUMNS),
                params![oracle_id],
                CardRow::from_row,
            )
            .optional()
            .context("Failed to get card")?;

        match row {
            Some(row) => {
                let card = row.into_card()?;
                let rulings = self.get_rulings(&card.oracle_id)?;
                Ok(Some(CardDetails { card, rulings }))
            }
            None => Ok(None),
        }
    }

    /// Get every card whose name matches exactly, ignoring case
    pub fn get_cards_by_name(&self, name: &str) -> Result<Vec<CardDetails>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM cards WHERE name = ?1 COLLATE NOCASE ORDER BY oracle_id",
            CARD_COLUMNS
        ))?;

        let rows = stmt.query_map(params![name.trim()], CardRow::from_row)?;

        let mut cards = Vec::new();
        for row in rows {
            let card = row?.into_card()?;
            let rulings = self.get_rulings(&card.oracle_id)?;
            cards.push(CardDetails { card, rulings });
        }

        Ok(cards)
    }

    // ==================== Rulings ====================

    /// Insert a ruling, ignoring an identical one already stored
    ///
    /// Returns whether a new row was written.
    pub fn insert_ruling(&self, ruling: &Ruling) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                r#"
                INSERT OR IGNORE INTO rulings (oracle_id, object, source, published_at, comment)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    ruling.oracle_id,
                    ruling.object,
                    ruling.source,
                    ruling.published_at.as_deref().unwrap_or_default(),
                    ruling.comment,
                ],
            )
            .context("Failed to insert ruling")?;

        Ok(inserted > 0)
    }

    /// Get the rulings for a card, oldest first
    pub fn get_rulings(&self, oracle_id: &str) -> Result<Vec<Ruling>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT oracle_id, object, source, published_at, comment
            FROM rulings WHERE oracle_id = ?1
            ORDER BY published_at, id
            "#,
        )?;

        let rows = stmt.query_map(params![oracle_id], |row| {
            let published_at: String = row.get(3)?;
            Ok(Ruling {
                oracle_id: row.get(0)?,
                object: row.get(1)?,
                source: row.get(2)?,
                published_at: (!published_at.is_empty()).then_some(published_at),
                comment: row.get(4)?,
            })
        })?;

        let mut rulings = Vec::new();
        for row in rows {
            rulings.push(row?);
        }

        Ok(rulings)
    }

    // ==================== Rules ====================

    /// Insert or update a rule, keyed by rule number
    pub fn upsert_rule(&self, rule: &Rule) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO rules (rule_number, id, content, parent_rule, base_rule, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
                ON CONFLICT(rule_number) DO UPDATE SET
                    id = excluded.id,
                    content = excluded.content,
                    parent_rule = excluded.parent_rule,
                    base_rule = excluded.base_rule,
                    updated_at = datetime('now')
                "#,
                params![
                    rule.rule_number,
                    rule.id,
                    rule.content,
                    rule.parent_rule,
                    rule.base_rule,
                ],
            )
            .with_context(|| format!("Failed to upsert rule {}", rule.rule_number))?;

        Ok(())
    }

    /// Get a rule by number
    pub fn get_rule(&self, rule_number: &str) -> Result<Option<Rule>> {
        let rule = self
            .conn
            .query_row(
                r#"
                SELECT id, rule_number, content, base_rule, parent_rule
                FROM rules WHERE rule_number = ?1
                "#,
                params![rule_number],
                rule_from_row,
            )
            .optional()
            .context("Failed to get rule")?;

        Ok(rule)
    }

    /// Get a rule together with its direct children, in numeric order
    pub fn get_rule_with_children(&self, rule_number: &str) -> Result<Option<RuleWithChildren>> {
        let Some(rule) = self.get_rule(rule_number)? else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, rule_number, content, base_rule, parent_rule
            FROM rules WHERE parent_rule = ?1
            "#,
        )?;

        let rows = stmt.query_map(params![rule_number], rule_from_row)?;

        let mut children = Vec::new();
        for row in rows {
            children.push(row?);
        }
        children.sort_by(|a, b| compare_rule_numbers(&a.rule_number, &b.rule_number));

        Ok(Some(RuleWithChildren { rule, children }))
    }

    // ==================== Glossary ====================

    /// Insert or update a glossary term, keyed by term
    pub fn upsert_glossary_term(&self, term: &GlossaryTerm) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO glossary (term, id, definition, rule_refs, updated_at)
                VALUES (?1, ?2, ?3, ?4, datetime('now'))
                ON CONFLICT(term) DO UPDATE SET
                    id = excluded.id,
                    definition = excluded.definition,
                    rule_refs = excluded.rule_refs,
                    updated_at = datetime('now')
                "#,
                params![
                    term.term,
                    term.id,
                    term.definition,
                    serde_json::to_string(&term.rule_refs)?,
                ],
            )
            .with_context(|| format!("Failed to upsert glossary term {}", term.term))?;

        Ok(())
    }

    /// Get a glossary term, ignoring case
    pub fn get_glossary_term(&self, term: &str) -> Result<Option<GlossaryTerm>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT id, term, definition, rule_refs
                FROM glossary WHERE term = ?1 COLLATE NOCASE
                LIMIT 1
                "#,
                params![term.trim()],
                |row| {
                    Ok(GlossaryRow {
                        id: row.get(0)?,
                        term: row.get(1)?,
                        definition: row.get(2)?,
                        rule_refs: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("Failed to get glossary term")?;

        row.map(GlossaryRow::into_term).transpose()
    }

    // ==================== Statistics ====================

    /// Get database statistics
    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = self
                .conn
                .query_row(sql, [], |row| row.get(0))
                .with_context(|| format!("Failed to run '{}'", sql))?;
            Ok(n as usize)
        };

        Ok(DatabaseStats {
            cards: count("SELECT COUNT(*) FROM cards")?,
            rulings: count("SELECT COUNT(*) FROM rulings")?,
            cards_with_rulings: count("SELECT COUNT(DISTINCT oracle_id) FROM rulings")?,
            rules: count("SELECT COUNT(*) FROM rules")?,
            base_rules: count("SELECT COUNT(*) FROM rules WHERE parent_rule IS NULL")?,
            glossary_terms: count("SELECT COUNT(*) FROM glossary")?,
        })
    }
}

/// A stored card with its rulings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardDetails {
    pub card: Card,
    /// Ordered by publication date, then insertion order
    pub rulings: Vec<Ruling>,
}

impl CardDetails {
    /// Card summary followed by its rulings, for use as prompt context
    pub fn to_context(&self) -> String {
        let mut text = self.card.summary();
        if !self.rulings.is_empty() {
            text.push_str("\nRulings:");
            for ruling in &self.rulings {
                match ruling.published_at {
                    Some(ref date) => text.push_str(&format!("\n- ({}) {}", date, ruling.comment)),
                    None => text.push_str(&format!("\n- {}", ruling.comment)),
                }
            }
        }
        text
    }
}

impl From<CardDetails> for CardWithRulings {
    fn from(details: CardDetails) -> Self {
        CardWithRulings {
            card: details.card,
            rulings: details.rulings,
        }
    }
}

/// A rule and its direct children
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleWithChildren {
    pub rule: Rule,
    pub children: Vec<Rule>,
}

impl RuleWithChildren {
    /// `Rule N: text` followed by one line per sub-rule
    pub fn render(&self) -> String {
        let mut text = format!("Rule {}: {}", self.rule.rule_number, self.rule.content);
        if !self.children.is_empty() {
            text.push_str("\n\nSub-rules:");
            for child in &self.children {
                text.push_str(&format!("\n- {}: {}", child.rule_number, child.content));
            }
        }
        text
    }
}

/// Database statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub cards: usize,
    pub rulings: usize,
    pub cards_with_rulings: usize,
    pub rules: usize,
    pub base_rules: usize,
    pub glossary_terms: usize,
}

// Internal row types for database mapping

struct CardRow {
    oracle_id: String,
    name: String,
    released_at: Option<String>,
    mana_cost: Option<String>,
    cmc: Option<f64>,
    type_line: Option<String>,
    oracle_text: Option<String>,
    power: Option<String>,
    toughness: Option<String>,
    colors: String,
    color_identity: String,
    keywords: String,
    legalities: String,
    games: String,
    set_name: Option<String>,
    set_code: Option<String>,
    rarity: Option<String>,
    extra: String,
}

impl CardRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(CardRow {
            oracle_id: row.get(0)?,
            name: row.get(1)?,
            released_at: row.get(2)?,
            mana_cost: row.get(3)?,
            cmc: row.get(4)?,
            type_line: row.get(5)?,
            oracle_text: row.get(6)?,
            power: row.get(7)?,
            toughness: row.get(8)?,
            colors: row.get(9)?,
            color_identity: row.get(10)?,
            keywords: row.get(11)?,
            legalities: row.get(12)?,
            games: row.get(13)?,
            set_name: row.get(14)?,
            set_code: row.get(15)?,
            rarity: row.get(16)?,
            extra: row.get(17)?,
        })
    }

    fn into_card(self) -> Result<Card> {
        let context = || format!("Corrupt JSON column for card {}", self.oracle_id);

        Ok(Card {
            colors: serde_json::from_str(&self.colors).with_context(context)?,
            color_identity: serde_json::from_str(&self.color_identity).with_context(context)?,
            keywords: serde_json::from_str(&self.keywords).with_context(context)?,
            legalities: serde_json::from_str(&self.legalities).with_context(context)?,
            games: serde_json::from_str(&self.games).with_context(context)?,
            extra: serde_json::from_str(&self.extra).with_context(context)?,
            oracle_id: self.oracle_id,
            name: self.name,
            released_at: self.released_at,
            mana_cost: self.mana_cost,
            cmc: self.cmc,
            type_line: self.type_line,
            oracle_text: self.oracle_text,
            power: self.power,
            toughness: self.toughness,
            set_name: self.set_name,
            set_code: self.set_code,
            rarity: self.rarity,
        })
    }
}

struct GlossaryRow {
    id: String,
    term: String,
    definition: String,
    rule_refs: String,
}

impl GlossaryRow {
    fn into_term(self) -> Result<GlossaryTerm> {
        let rule_refs: Vec<String> = serde_json::from_str(&self.rule_refs)
            .with_context(|| format!("Corrupt rule references for term {}", self.term))?;

        Ok(GlossaryTerm {
            id: self.id,
            term: self.term,
            definition: self.definition,
            rule_refs,
        })
    }
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: row.get(0)?,
        rule_number: row.get(1)?,
        content: row.get(2)?,
        base_rule: row.get(3)?,
        parent_rule: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::parse_rules;

    fn sample_card() -> Card {
        Card {
            oracle_id: "def".to_string(),
            name: "Serra Angel".to_string(),
            mana_cost: Some("{3}{W}{W}".to_string()),
            cmc: Some(5.0),
            type_line: Some("Creature — Angel".to_string()),
            oracle_text: Some("Flying, vigilance".to_string()),
            power: Some("4".to_string()),
            toughness: Some("4".to_string()),
            colors: vec!["W".to_string()],
            keywords: vec!["Flying".to_string(), "Vigilance".to_string()],
            ..Default::default()
        }
    }

    fn ruling(comment: &str, date: Option<&str>) -> Ruling {
        Ruling {
            oracle_id: "def".to_string(),
            object: Some("ruling".to_string()),
            source: Some("wotc".to_string()),
            published_at: date.map(str::to_string),
            comment: comment.to_string(),
        }
    }

    #[test]
    fn test_database_creation() {
        let db = Database::open_in_memory().unwrap();
        let stats = db.get_stats().unwrap();
        assert_eq!(stats, DatabaseStats::default());
    }

    #[test]
    fn test_card_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let mut card = sample_card();
        card.extra.insert("artist".to_string(), serde_json::json!("Douglas Shuler"));
        db.upsert_card(&card).unwrap();

        let details = db.get_card_by_oracle_id("def").unwrap().unwrap();
        assert_eq!(details.card, card);
        assert_eq!(details.card.keywords, vec!["Flying", "Vigilance"]);
        assert!(details.rulings.is_empty());
    }

    #[test]
    fn test_card_upsert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let mut card = sample_card();
        db.upsert_card(&card).unwrap();

        card.oracle_text = Some("Flying\nVigilance".to_string());
        db.upsert_card(&card).unwrap();

        assert_eq!(db.get_stats().unwrap().cards, 1);
        let details = db.get_card_by_oracle_id("def").unwrap().unwrap();
        assert_eq!(details.card.oracle_text.as_deref(), Some("Flying\nVigilance"));
    }

    #[test]
    fn test_rulings_are_deduplicated_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_card(&sample_card()).unwrap();

        assert!(db.insert_ruling(&ruling("Later ruling.", Some("2020-01-01"))).unwrap());
        assert!(db.insert_ruling(&ruling("Earlier ruling.", Some("2004-10-04"))).unwrap());
        assert!(!db.insert_ruling(&ruling("Later ruling.", Some("2020-01-01"))).unwrap());
        assert!(db.insert_ruling(&ruling("Undated ruling.", None)).unwrap());
        assert!(!db.insert_ruling(&ruling("Undated ruling.", None)).unwrap());

        let details = db.get_card_by_oracle_id("def").unwrap().unwrap();
        let comments: Vec<&str> = details.rulings.iter().map(|r| r.comment.as_str()).collect();
        assert_eq!(comments, vec!["Undated ruling.", "Earlier ruling.", "Later ruling."]);
        assert_eq!(details.rulings[0].published_at, None);
        assert_eq!(details.rulings[1].source.as_deref(), Some("wotc"));

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.rulings, 3);
        assert_eq!(stats.cards_with_rulings, 1);
    }

    #[test]
    fn test_cards_by_name_ignores_case() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_card(&sample_card()).unwrap();

        assert_eq!(db.get_cards_by_name("serra angel").unwrap().len(), 1);
        assert_eq!(db.get_cards_by_name("SERRA ANGEL ").unwrap().len(), 1);
        assert!(db.get_cards_by_name("Serra").unwrap().is_empty());
    }

    #[test]
    fn test_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_card_by_oracle_id("missing").unwrap().is_none());
        assert!(db.get_rule_with_children("999.9").unwrap().is_none());
        assert!(db.get_glossary_term("Nothing").unwrap().is_none());
    }

    #[test]
    fn test_rule_with_children() {
        let db = Database::open_in_memory().unwrap();
        let text = "702. Keyword Abilities\n702.19. Trample\n702.19a Trample is a static ability.\n702.19b The controller assigns damage.\n702.19c More trample text.\n702.2. Deathtouch";
        let rules = parse_rules(text);
        for rule in rules.iter().rev() {
            db.upsert_rule(rule).unwrap();
        }
        for rule in &rules {
            db.upsert_rule(rule).unwrap();
        }

        assert_eq!(db.get_stats().unwrap().rules, rules.len());

        let base = db.get_rule_with_children("702").unwrap().unwrap();
        let numbers: Vec<&str> = base.children.iter().map(|r| r.rule_number.as_str()).collect();
        assert_eq!(numbers, vec!["702.2", "702.19"]);

        let trample = db.get_rule_with_children("702.19").unwrap().unwrap();
        assert_eq!(trample.rule.content, "Trample");
        assert_eq!(trample.children.len(), 3);

        let rendered = trample.render();
        assert!(rendered.starts_with("Rule 702.19: Trample"));
        assert!(rendered.contains("Sub-rules:\n- 702.19a: Trample is a static ability."));
    }

    #[test]
    fn test_glossary_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let term = GlossaryTerm::new("First Strike", "Deals combat damage first. See rule 702.7.");
        db.upsert_glossary_term(&term).unwrap();
        db.upsert_glossary_term(&term).unwrap();

        let stored = db.get_glossary_term("first strike").unwrap().unwrap();
        assert_eq!(stored, term);
        assert_eq!(db.get_stats().unwrap().glossary_terms, 1);
    }

    #[test]
    fn test_card_context() {
        let details = CardDetails {
            card: sample_card(),
            rulings: vec![ruling("It can block flyers.", Some("2004-10-04"))],
        };
        let context = details.to_context();
        assert!(context.starts_with("Serra Angel {3}{W}{W}"));
        assert!(context.contains("Rulings:\n- (2004-10-04) It can block flyers."));
    }

    #[test]
    fn test_on_disk_database_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mtg.db");

        {
            let db = Database::open(&path).unwrap();
            db.upsert_card(&sample_card()).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_stats().unwrap().cards, 1);
    }
}
