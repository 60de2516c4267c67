//! Card and ruling loading
//!
//! Cards and rulings arrive as JSON, either a single array or one object per
//! line (the bulk-data layout, where each line may end with a comma). Cards
//! are joined with their rulings through the oracle id.

use super::{SourceKind, Warning};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One representative printing of a card
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Card {
    /// Identity shared by every printing of the card
    #[serde(deserialize_with = "null_as_default")]
    pub oracle_id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    pub released_at: Option<String>,
    pub mana_cost: Option<String>,
    /// Mana value
    pub cmc: Option<f64>,
    pub type_line: Option<String>,
    pub oracle_text: Option<String>,
    pub power: Option<String>,
    pub toughness: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub colors: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub color_identity: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub keywords: Vec<String>,
    /// Format name to legality (`legal`, `banned`...)
    #[serde(deserialize_with = "null_as_default")]
    pub legalities: BTreeMap<String, String>,
    #[serde(deserialize_with = "null_as_default")]
    pub games: Vec<String>,
    pub set_name: Option<String>,
    #[serde(rename = "set")]
    pub set_code: Option<String>,
    pub rarity: Option<String>,
    /// Every other print-specific field, kept so the store round-trips it
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Card {
    /// Short human-readable summary used in prompts
    pub fn summary(&self) -> String {
        let mut text = self.name.clone();
        if let Some(ref cost) = self.mana_cost {
            if !cost.is_empty() {
                text.push_str(&format!(" {}", cost));
            }
        }
        if let Some(ref type_line) = self.type_line {
            text.push_str(&format!("\nType: {}", type_line));
        }
        if let Some(ref oracle_text) = self.oracle_text {
            text.push_str(&format!("\nOracle Text: {}", oracle_text));
        }
        if let (Some(power), Some(toughness)) = (&self.power, &self.toughness) {
            text.push_str(&format!("\nP/T: {}/{}", power, toughness));
        }
        if !self.keywords.is_empty() {
            text.push_str(&format!("\nKeywords: {}", self.keywords.join(", ")));
        }
        if !self.color_identity.is_empty() {
            text.push_str(&format!("\nColor Identity: {}", self.color_identity.join("")));
        }
        if !self.legalities.is_empty() {
            let legalities: Vec<String> = self
                .legalities
                .iter()
                .map(|(format, status)| format!("{}: {}", format, status))
                .collect();
            text.push_str(&format!("\nLegalities: {}", legalities.join(", ")));
        }
        text
    }
}

/// An official clarification attached to a card
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ruling {
    #[serde(deserialize_with = "null_as_default")]
    pub oracle_id: String,
    pub object: Option<String>,
    /// Who published it (`wotc`, `scryfall`)
    pub source: Option<String>,
    pub published_at: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub comment: String,
}

/// Treat an explicit JSON `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A card together with every ruling that shares its oracle id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardWithRulings {
    pub card: Card,
    pub rulings: Vec<Ruling>,
}

impl CardWithRulings {
    pub fn has_rulings(&self) -> bool {
        !self.rulings.is_empty()
    }

    pub fn ruling_count(&self) -> usize {
        self.rulings.len()
    }
}

/// Parse JSON records from either an array or one object per line
///
/// Records that fail to decode are skipped with a warning.
pub fn load_records<T: DeserializeOwned>(text: &str, source: SourceKind) -> (Vec<T>, Vec<Warning>) {
    let mut records = Vec::new();
    let mut warnings = Vec::new();

    if text.trim_start().starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(text) {
            for (index, value) in values.into_iter().enumerate() {
                match serde_json::from_value::<T>(value) {
                    Ok(record) => records.push(record),
                    Err(e) => warnings.push(
                        Warning::new(source, format!("undecodable record: {}", e))
                            .at(format!("record {}", index + 1)),
                    ),
                }
            }
            return (records, warnings);
        }
    }

    for (index, line) in text.lines().enumerate() {
        let mut line = line.trim();
        if let Some(stripped) = line.strip_suffix(',') {
            line = stripped.trim_end();
        }
        if !(line.starts_with('{') && line.ends_with('}')) {
            continue;
        }

        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => warnings.push(
                Warning::new(source, format!("undecodable line: {}", e))
                    .at(format!("line {}", index + 1)),
            ),
        }
    }

    (records, warnings)
}

/// Load cards, skipping records without an oracle id or name
pub fn load_cards(text: &str) -> (Vec<Card>, Vec<Warning>) {
    let (cards, mut warnings) = load_records::<Card>(text, SourceKind::Cards);

    let mut kept = Vec::with_capacity(cards.len());
    for (index, card) in cards.into_iter().enumerate() {
        if card.oracle_id.trim().is_empty() {
            warnings.push(
                Warning::new(SourceKind::Cards, format!("card '{}' has no oracle id", card.name))
                    .at(format!("record {}", index + 1)),
            );
        } else if card.name.trim().is_empty() {
            warnings.push(
                Warning::new(SourceKind::Cards, "card has no name").at(card.oracle_id.clone()),
            );
        } else {
            kept.push(card);
        }
    }

    tracing::debug!("Loaded {} cards", kept.len());
    (kept, warnings)
}

/// Load rulings; rulings without an oracle id are kept here and dropped when joining
pub fn load_rulings(text: &str) -> (Vec<Ruling>, Vec<Warning>) {
    let (rulings, warnings) = load_records::<Ruling>(text, SourceKind::Cards);
    tracing::debug!("Loaded {} rulings", rulings.len());
    (rulings, warnings)
}

/// Join cards with their rulings by oracle id
///
/// Every card yields exactly one record; a card without rulings gets an
/// empty list. Rulings lacking an oracle id are ignored.
pub fn combine_cards_and_rulings(cards: Vec<Card>, rulings: Vec<Ruling>) -> Vec<CardWithRulings> {
    let mut rulings_by_oracle_id: HashMap<String, Vec<Ruling>> = HashMap::new();
    for ruling in rulings {
        if ruling.oracle_id.is_empty() {
            continue;
        }
        rulings_by_oracle_id
            .entry(ruling.oracle_id.clone())
            .or_default()
            .push(ruling);
    }

    let card_ids: HashSet<&str> = cards.iter().map(|c| c.oracle_id.as_str()).collect();
    let orphaned: usize = rulings_by_oracle_id
        .iter()
        .filter(|(oracle_id, _)| !card_ids.contains(oracle_id.as_str()))
        .map(|(_, rulings)| rulings.len())
        .sum();
    if orphaned > 0 {
        tracing::debug!("{} rulings reference oracle ids with no card", orphaned);
    }

    let combined = cards
        .into_iter()
        .map(|card| {
            let rulings = rulings_by_oracle_id
                .get(&card.oracle_id)
                .cloned()
                .unwrap_or_default();
            CardWithRulings { card, rulings }
        })
        .collect();

    combined
}
