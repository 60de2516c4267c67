//! Database schema definition

/// SQL schema for the mtgsage database
pub const SCHEMA: &str = r#"
-- One representative printing per oracle id
CREATE TABLE IF NOT EXISTS cards (
    oracle_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    released_at TEXT,
    mana_cost TEXT,
    cmc REAL,
    type_line TEXT,
    oracle_text TEXT,
    power TEXT,
    toughness TEXT,
    colors TEXT NOT NULL DEFAULT '[]',
    color_identity TEXT NOT NULL DEFAULT '[]',
    keywords TEXT NOT NULL DEFAULT '[]',
    legalities TEXT NOT NULL DEFAULT '{}',
    games TEXT NOT NULL DEFAULT '[]',
    set_name TEXT,
    set_code TEXT,
    rarity TEXT,
    extra TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cards_name ON cards(name COLLATE NOCASE);

-- Official clarifications, many per card
-- published_at is '' when unknown so the uniqueness key also covers it
CREATE TABLE IF NOT EXISTS rulings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    oracle_id TEXT NOT NULL,
    object TEXT,
    source TEXT,
    published_at TEXT NOT NULL DEFAULT '',
    comment TEXT NOT NULL,
    FOREIGN KEY (oracle_id) REFERENCES cards(oracle_id),
    UNIQUE (oracle_id, comment, published_at)
);

CREATE INDEX IF NOT EXISTS idx_rulings_oracle ON rulings(oracle_id);

-- Comprehensive rules hierarchy
CREATE TABLE IF NOT EXISTS rules (
    rule_number TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    content TEXT NOT NULL,
    parent_rule TEXT,
    base_rule TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rules_parent ON rules(parent_rule);
CREATE INDEX IF NOT EXISTS idx_rules_base ON rules(base_rule);

-- Glossary terms and the rules they point at
CREATE TABLE IF NOT EXISTS glossary (
    term TEXT PRIMARY KEY,
    id TEXT NOT NULL,
    definition TEXT NOT NULL,
    rule_refs TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_glossary_term ON glossary(term COLLATE NOCASE);
"#;
