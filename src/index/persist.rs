//! On-disk index format
//!
//! One SQLite file per index directory. Entries keep their insertion order
//! through `position`; embeddings are little-endian f32 blobs.

use super::{IndexEntry, VectorIndex};
use crate::extract::{sanitize_metadata, Metadata};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "index.db";

const INDEX_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS entries (
    position INTEGER PRIMARY KEY,
    id TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL,
    embedding BLOB NOT NULL
);
"#;

pub(super) fn index_path(dir: &Path) -> PathBuf {
    dir.join(INDEX_FILE)
}

fn open(dir: &Path) -> Result<Connection> {
    let path = index_path(dir);
    let conn = Connection::open(&path)
        .with_context(|| format!("Failed to open index at {:?}", path))?;
    conn.execute_batch(INDEX_SCHEMA)
        .context("Failed to initialize index schema")?;
    Ok(conn)
}

/// Replace whatever is stored in `dir` with `index`
pub(super) fn save(index: &VectorIndex, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create index directory {:?}", dir))?;

    let mut conn = open(dir)?;
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM entries", [])?;
    tx.execute("DELETE FROM index_meta", [])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO entries (position, id, content, metadata, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (position, entry) in index.entries.iter().enumerate() {
            stmt.execute(params![
                position as i64,
                entry.id,
                entry.content,
                serde_json::to_string(&entry.metadata)?,
                encode_embedding(&entry.embedding),
            ])
            .with_context(|| format!("Failed to write index entry {}", entry.id))?;
        }
    }

    let meta = [
        ("collection", Some(index.collection.clone())),
        ("dimension", index.dimension().map(|d| d.to_string())),
        ("content_hash", index.content_hash.clone()),
        ("entry_count", Some(index.entries.len().to_string())),
        ("built_at", index.built_at.map(|t| t.to_rfc3339())),
    ];
    for (key, value) in meta {
        if let Some(value) = value {
            tx.execute(
                "INSERT INTO index_meta (key, value) VALUES (?1, ?2)",
                params![key, value],
            )?;
        }
    }

    tx.commit().context("Failed to commit index")?;

    tracing::debug!("Persisted {} entries to {:?}", index.entries.len(), dir);
    Ok(())
}

pub(super) fn load(dir: &Path) -> Result<VectorIndex> {
    let conn = open(dir)?;

    let collection = read_meta(&conn, "collection")?.unwrap_or_default();
    let content_hash = read_meta(&conn, "content_hash")?;
    let built_at = read_meta(&conn, "built_at")?
        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
        .map(|t| t.with_timezone(&Utc));

    let mut stmt = conn.prepare(
        "SELECT id, content, metadata, embedding FROM entries ORDER BY position",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Vec<u8>>(3)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, content, metadata, embedding) = row?;
        let metadata = read_metadata(&id, &metadata);
        entries.push(IndexEntry {
            id,
            content,
            metadata,
            embedding: decode_embedding(&embedding),
        });
    }

    if let Some(expected) = read_meta(&conn, "entry_count")? {
        if expected != entries.len().to_string() {
            anyhow::bail!(
                "Index at {:?} is truncated: expected {} entries, found {}",
                dir,
                expected,
                entries.len()
            );
        }
    }

    Ok(VectorIndex {
        collection,
        entries,
        content_hash,
        built_at,
    })
}

/// Content hash of the index stored in `dir`, if one exists for `collection`
pub(super) fn stored_hash(dir: &Path, collection: &str) -> Result<Option<String>> {
    if !index_path(dir).exists() {
        return Ok(None);
    }

    let conn = open(dir)?;
    if read_meta(&conn, "collection")?.as_deref() != Some(collection) {
        return Ok(None);
    }
    read_meta(&conn, "content_hash")
}

fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM index_meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("Failed to read index metadata '{}'", key))
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}

/// Decode stored metadata, stringifying nested values
///
/// Metadata that is not a JSON object is replaced by an empty map; the entry
/// itself is still usable.
fn read_metadata(id: &str, raw: &str) -> Metadata {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => sanitize_metadata(&value),
        _ => {
            tracing::warn!("Index entry {} has unreadable metadata, dropping it", id);
            Metadata::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::MetadataValue;

    #[test]
    fn test_embedding_encoding() {
        let embedding = vec![0.25, -1.5, 3.0e-8, f32::MAX];
        assert_eq!(decode_embedding(&encode_embedding(&embedding)), embedding);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut metadata = Metadata::new();
        metadata.insert("document_type".to_string(), MetadataValue::from("card"));
        metadata.insert("ruling_count".to_string(), MetadataValue::Integer(2));
        metadata.insert("cmc".to_string(), MetadataValue::Float(5.0));

        let mut index = VectorIndex::new("mtg");
        index.entries.push(IndexEntry {
            id: "def".to_string(),
            content: "Card: Serra Angel".to_string(),
            metadata,
            embedding: vec![0.5, 0.5],
        });
        index.content_hash = Some("abc".to_string());

        save(&index, dir.path()).unwrap();
        let loaded = load(dir.path()).unwrap();

        assert_eq!(loaded.collection(), "mtg");
        assert_eq!(loaded.entries(), index.entries());
        assert_eq!(loaded.content_hash(), Some("abc"));
        assert_eq!(stored_hash(dir.path(), "mtg").unwrap().as_deref(), Some("abc"));
        assert_eq!(stored_hash(dir.path(), "other").unwrap(), None);
    }

    #[test]
    fn test_load_tolerates_foreign_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = VectorIndex::new("mtg");
        for id in ["nested", "broken"] {
            index.entries.push(IndexEntry {
                id: id.to_string(),
                content: format!("Entry {}", id),
                metadata: Metadata::new(),
                embedding: vec![1.0, 0.0],
            });
        }
        save(&index, dir.path()).unwrap();

        let conn = Connection::open(dir.path().join(INDEX_FILE)).unwrap();
        conn.execute(
            "UPDATE entries SET metadata = ?1 WHERE id = 'nested'",
            params![r#"{"colors": ["G"], "cmc": 1, "gone": null}"#],
        )
        .unwrap();
        conn.execute("UPDATE entries SET metadata = 'not json' WHERE id = 'broken'", [])
            .unwrap();
        drop(conn);

        let loaded = load(dir.path()).unwrap();
        let nested = &loaded.entries()[0].metadata;
        assert_eq!(nested["colors"].as_str(), Some(r#"["G"]"#));
        assert_eq!(nested["cmc"], MetadataValue::Integer(1));
        assert!(!nested.contains_key("gone"));
        assert!(loaded.entries()[1].metadata.is_empty());
        assert_eq!(loaded.entries()[1].content, "Entry broken");
    }
}
